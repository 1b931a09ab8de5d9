//! Index catalog: files, chunks, term vectors, IDF and metadata.
//!
//! All §-level write contracts run inside single transactions so a batch is
//! either fully visible or absent. Term vectors are written with `tfidf = 0`
//! and filled in by the IDF recompute that closes every write batch.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::params;

use crate::error::Result;
use crate::storage::sqlite::OptionalExt;
use crate::storage::sqlite::SqliteStore;
use crate::types::Candidate;
use crate::types::Chunk;
use crate::types::FileRecord;
use crate::types::FileState;
use crate::types::unix_now;

/// Metadata key for the mean chunk token count.
pub const META_AVG_DOC_LENGTH: &str = "avg_doc_length";
/// Metadata key for the total chunk count.
pub const META_CORPUS_SIZE: &str = "corpus_size";

/// Per-term statistics for one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermEntry {
    /// Occurrences of the term in the chunk.
    pub raw_freq: i64,
    /// Normalized term frequency (raw / token_count).
    pub tf: f64,
    /// tf × idf as of the last IDF rebuild.
    pub tfidf: f64,
}

/// One chunk ready for storage, with its term vector.
#[derive(Debug, Clone)]
pub struct ChunkWrite {
    pub chunk: Chunk,
    pub token_count: i64,
    pub terms: HashMap<String, TermEntry>,
}

/// A file together with its chunks, applied atomically.
#[derive(Debug, Clone)]
pub struct FileApply {
    pub record: FileRecord,
    pub chunks: Vec<ChunkWrite>,
}

/// IDF row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdfScore {
    pub idf: f64,
    pub document_frequency: i64,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub file_count: i64,
    pub chunk_count: i64,
    pub term_count: i64,
    pub last_indexed: Option<i64>,
}

/// Smoothed IDF: `ln((N+1)/(df+1)) + 1`, strictly positive for any observed
/// term.
pub fn smoothed_idf(corpus_size: i64, document_frequency: i64) -> f64 {
    ((corpus_size as f64 + 1.0) / (document_frequency as f64 + 1.0)).ln() + 1.0
}

/// Catalog over the relational store.
pub struct IndexStore {
    db: Arc<SqliteStore>,
}

impl IndexStore {
    /// Create a catalog over an open store.
    pub fn new(db: Arc<SqliteStore>) -> Self {
        Self { db }
    }

    /// Underlying store handle.
    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.db
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Upsert file rows in one transaction. Returns path → file id.
    pub async fn upsert_files(&self, files: Vec<FileRecord>) -> Result<HashMap<String, i64>> {
        self.db
            .transaction(move |conn| {
                let mut ids = HashMap::with_capacity(files.len());
                for record in &files {
                    let id = upsert_file(conn, record)?;
                    ids.insert(record.path.clone(), id);
                }
                Ok(ids)
            })
            .await
    }

    /// Atomically replace a file's chunks. Returns the new chunk ids.
    pub async fn replace_chunks(&self, file_id: i64, chunks: Vec<ChunkWrite>) -> Result<Vec<i64>> {
        self.db
            .transaction(move |conn| replace_chunks_inner(conn, file_id, &chunks))
            .await
    }

    /// Write term vectors for existing chunks; idempotent on (chunk, term).
    pub async fn write_vectors(
        &self,
        batch: Vec<(i64, HashMap<String, TermEntry>)>,
    ) -> Result<()> {
        self.db
            .transaction(move |conn| {
                for (chunk_id, terms) in &batch {
                    write_terms(conn, *chunk_id, terms)?;
                }
                Ok(())
            })
            .await
    }

    /// Apply a batch of files (rows, chunks and term vectors) in a single
    /// transaction: either the whole group commits or none of it does.
    /// Returns path to new chunk ids.
    pub async fn apply_file_batch(&self, batch: Vec<FileApply>) -> Result<HashMap<String, Vec<i64>>> {
        self.db
            .transaction(move |conn| {
                let mut ids = HashMap::with_capacity(batch.len());
                for apply in &batch {
                    let file_id = upsert_file(conn, &apply.record)?;
                    let chunk_ids = replace_chunks_inner(conn, file_id, &apply.chunks)?;
                    ids.insert(apply.record.path.clone(), chunk_ids);
                }
                Ok(ids)
            })
            .await
    }

    /// Chunk ids currently stored for the given files.
    ///
    /// Used to purge vector-store entries before chunks are replaced or
    /// deleted.
    pub async fn chunk_ids_for_files(&self, paths: Vec<String>) -> Result<Vec<i64>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        self.db
            .read(move |conn| {
                let sql = format!(
                    "SELECT c.id FROM chunks c
                     JOIN files f ON f.id = c.file_id
                     WHERE f.path IN ({})",
                    placeholders(paths.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(paths.iter()), |row| {
                    row.get::<_, i64>(0)
                })?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                Ok(ids)
            })
            .await
    }

    /// Delete files by path; chunks and term vectors cascade.
    pub async fn delete_files(&self, paths: Vec<String>) -> Result<usize> {
        self.db
            .transaction(move |conn| {
                let mut deleted = 0;
                let mut stmt = conn.prepare("DELETE FROM files WHERE path = ?")?;
                for path in &paths {
                    deleted += stmt.execute([path])?;
                }
                Ok(deleted)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Diff support
    // ------------------------------------------------------------------

    /// Load the persisted file index: path → (hash, size, mtime).
    pub async fn load_file_index(&self) -> Result<HashMap<String, FileState>> {
        self.db
            .read(|conn| {
                let mut stmt =
                    conn.prepare("SELECT path, content_hash, size, mtime FROM files")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        FileState {
                            content_hash: row.get(1)?,
                            size: row.get::<_, i64>(2)? as u64,
                            mtime: row.get(3)?,
                        },
                    ))
                })?;
                let mut index = HashMap::new();
                for row in rows {
                    let (path, state) = row?;
                    index.insert(path, state);
                }
                Ok(index)
            })
            .await
    }

    /// Union of terms stored for chunks of the given files.
    ///
    /// Used for targeted IDF recompute; must run before deletions are
    /// applied when the set includes files about to disappear.
    pub async fn terms_by_files(&self, paths: Vec<String>) -> Result<HashSet<String>> {
        if paths.is_empty() {
            return Ok(HashSet::new());
        }
        self.db
            .read(move |conn| {
                let sql = format!(
                    "SELECT DISTINCT ct.term
                     FROM chunk_terms ct
                     JOIN chunks c ON c.id = ct.chunk_id
                     JOIN files f ON f.id = c.file_id
                     WHERE f.path IN ({})",
                    placeholders(paths.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(paths.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                let mut terms = HashSet::new();
                for row in rows {
                    terms.insert(row?);
                }
                Ok(terms)
            })
            .await
    }

    // ------------------------------------------------------------------
    // IDF / TF-IDF maintenance
    // ------------------------------------------------------------------

    /// Full replacement of IDF rows for the listed terms.
    pub async fn write_idf(&self, scores: HashMap<String, IdfScore>) -> Result<()> {
        self.db
            .transaction(move |conn| {
                let mut stmt = conn.prepare(
                    "INSERT INTO idf_scores (term, idf, document_frequency)
                     VALUES (?, ?, ?)
                     ON CONFLICT(term) DO UPDATE SET
                         idf = excluded.idf,
                         document_frequency = excluded.document_frequency",
                )?;
                for (term, score) in &scores {
                    stmt.execute(params![term, score.idf, score.document_frequency])?;
                }
                Ok(())
            })
            .await
    }

    /// IDF values for the given terms. Missing terms are absent.
    pub async fn idf_for_terms(&self, terms: Vec<String>) -> Result<HashMap<String, f64>> {
        if terms.is_empty() {
            return Ok(HashMap::new());
        }
        self.db
            .read(move |conn| {
                let sql = format!(
                    "SELECT term, idf FROM idf_scores WHERE term IN ({})",
                    placeholders(terms.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(terms.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?;
                let mut map = HashMap::new();
                for row in rows {
                    let (term, idf) = row?;
                    map.insert(term, idf);
                }
                Ok(map)
            })
            .await
    }

    /// Recompute document frequency, IDF and dependent TF-IDF values for the
    /// affected terms, in one transaction.
    ///
    /// Terms that no longer occur in any chunk lose their IDF row.
    pub async fn recompute_idf(&self, affected: Vec<String>) -> Result<()> {
        if affected.is_empty() {
            return Ok(());
        }
        self.db
            .transaction(move |conn| {
                let corpus_size: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

                let in_clause = placeholders(affected.len());
                let sql = format!(
                    "SELECT term, COUNT(DISTINCT chunk_id) FROM chunk_terms
                     WHERE term IN ({in_clause}) GROUP BY term"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(affected.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                let mut frequencies: HashMap<String, i64> = HashMap::new();
                for row in rows {
                    let (term, df) = row?;
                    frequencies.insert(term, df);
                }
                drop(stmt);

                let mut upsert = conn.prepare(
                    "INSERT INTO idf_scores (term, idf, document_frequency)
                     VALUES (?, ?, ?)
                     ON CONFLICT(term) DO UPDATE SET
                         idf = excluded.idf,
                         document_frequency = excluded.document_frequency",
                )?;
                let mut remove = conn.prepare("DELETE FROM idf_scores WHERE term = ?")?;
                let mut retfidf = conn.prepare(
                    "UPDATE chunk_terms SET tfidf = tf * ? WHERE term = ?",
                )?;

                for term in &affected {
                    match frequencies.get(term) {
                        Some(&df) => {
                            let idf = smoothed_idf(corpus_size, df);
                            upsert.execute(params![term, idf, df])?;
                            retfidf.execute(params![idf, term])?;
                        }
                        None => {
                            remove.execute([term])?;
                        }
                    }
                }
                Ok(())
            })
            .await
    }

    /// Recompute magnitudes for every chunk containing one of the affected
    /// terms.
    pub async fn recompute_magnitudes_for_terms(&self, affected: Vec<String>) -> Result<()> {
        if affected.is_empty() {
            return Ok(());
        }
        self.db
            .transaction(move |conn| {
                let sql = format!(
                    "SELECT chunk_id, SUM(tfidf * tfidf) FROM chunk_terms
                     WHERE chunk_id IN (
                         SELECT DISTINCT chunk_id FROM chunk_terms WHERE term IN ({})
                     )
                     GROUP BY chunk_id",
                    placeholders(affected.len())
                );
                let magnitudes = collect_magnitudes(conn, &sql, &affected)?;
                apply_magnitudes(conn, &magnitudes)
            })
            .await
    }

    /// Recompute every chunk's magnitude from its term vector.
    pub async fn recompute_magnitudes(&self) -> Result<()> {
        self.db
            .transaction(|conn| {
                let sql =
                    "SELECT chunk_id, SUM(tfidf * tfidf) FROM chunk_terms GROUP BY chunk_id";
                let magnitudes = collect_magnitudes(conn, sql, &[])?;
                apply_magnitudes(conn, &magnitudes)
            })
            .await
    }

    /// Recompute and persist the mean chunk token count.
    pub async fn update_average_doc_length(&self) -> Result<f64> {
        self.db
            .transaction(|conn| {
                let avg: f64 = conn.query_row(
                    "SELECT COALESCE(AVG(token_count), 0.0) FROM chunks",
                    [],
                    |row| row.get(0),
                )?;
                set_metadata(conn, META_AVG_DOC_LENGTH, &avg.to_string())?;
                Ok(avg)
            })
            .await
    }

    /// Recompute and persist the total chunk count.
    pub async fn update_corpus_size(&self) -> Result<i64> {
        self.db
            .transaction(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                set_metadata(conn, META_CORPUS_SIZE, &count.to_string())?;
                Ok(count)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Read a metadata value.
    pub async fn get_metadata(&self, key: &'static str) -> Result<Option<String>> {
        self.db
            .read(move |conn| {
                conn.query_row(
                    "SELECT value FROM index_metadata WHERE key = ?",
                    [key],
                    |row| row.get(0),
                )
                .optional()
            })
            .await
    }

    /// Write a metadata value.
    pub async fn set_metadata(&self, key: &'static str, value: String) -> Result<()> {
        self.db
            .write(move |conn| set_metadata(conn, key, &value))
            .await
    }

    /// The persisted average document length, defaulting to 0.
    pub async fn average_doc_length(&self) -> Result<f64> {
        Ok(self
            .get_metadata(META_AVG_DOC_LENGTH)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0))
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Chunks containing at least one of the query terms, grouped per chunk
    /// with all matched terms at once. Bounded to `limit` distinct chunks in
    /// ascending chunk-id order for determinism.
    pub async fn search_candidates(
        &self,
        terms: Vec<String>,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.db
            .read(move |conn| {
                let sql = format!(
                    "SELECT ct.chunk_id, f.path, f.language, c.content, c.type,
                            c.start_line, c.end_line, c.magnitude, c.token_count,
                            ct.term, ct.raw_freq
                     FROM chunk_terms ct
                     JOIN chunks c ON c.id = ct.chunk_id
                     JOIN files f ON f.id = c.file_id
                     WHERE ct.term IN ({})
                     ORDER BY ct.chunk_id",
                    placeholders(terms.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params_from_iter(terms.iter()))?;

                let mut candidates: Vec<Candidate> = Vec::new();
                while let Some(row) = rows.next()? {
                    let chunk_id: i64 = row.get(0)?;
                    let term: String = row.get(9)?;
                    let raw_freq: i64 = row.get(10)?;

                    match candidates.last_mut() {
                        Some(last) if last.chunk_id == chunk_id => {
                            last.matched_terms.insert(term, raw_freq);
                        }
                        _ => {
                            if candidates.len() >= limit {
                                break;
                            }
                            let mut matched = HashMap::new();
                            matched.insert(term, raw_freq);
                            candidates.push(Candidate {
                                chunk_id,
                                file_path: row.get(1)?,
                                language: row.get(2)?,
                                content: row.get(3)?,
                                chunk_type: row.get(4)?,
                                start_line: row.get(5)?,
                                end_line: row.get(6)?,
                                matched_terms: matched,
                                magnitude: row.get(7)?,
                                token_count: row.get(8)?,
                            });
                        }
                    }
                }
                Ok(candidates)
            })
            .await
    }

    /// Fetch chunks by id (for vector hits); `matched_terms` is empty.
    pub async fn chunks_by_ids(&self, ids: Vec<i64>) -> Result<Vec<Candidate>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.db
            .read(move |conn| {
                let sql = format!(
                    "SELECT c.id, f.path, f.language, c.content, c.type,
                            c.start_line, c.end_line, c.magnitude, c.token_count
                     FROM chunks c
                     JOIN files f ON f.id = c.file_id
                     WHERE c.id IN ({})
                     ORDER BY c.id",
                    placeholders(ids.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                    Ok(Candidate {
                        chunk_id: row.get(0)?,
                        file_path: row.get(1)?,
                        language: row.get(2)?,
                        content: row.get(3)?,
                        chunk_type: row.get(4)?,
                        start_line: row.get(5)?,
                        end_line: row.get(6)?,
                        matched_terms: HashMap::new(),
                        magnitude: row.get(7)?,
                        token_count: row.get(8)?,
                    })
                })?;
                let mut candidates = Vec::new();
                for row in rows {
                    candidates.push(row?);
                }
                Ok(candidates)
            })
            .await
    }

    /// Aggregate counts for the status surface.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.db
            .read(|conn| {
                let file_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
                let chunk_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                let term_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM idf_scores", [], |row| row.get(0))?;
                let last_indexed: Option<i64> = conn
                    .query_row("SELECT MAX(indexed_at) FROM files", [], |row| row.get(0))
                    .ok()
                    .flatten();
                Ok(StoreStats {
                    file_count,
                    chunk_count,
                    term_count,
                    last_indexed,
                })
            })
            .await
    }
}

// ----------------------------------------------------------------------
// Connection-level helpers shared by the transactional entry points
// ----------------------------------------------------------------------

fn upsert_file(conn: &Connection, record: &FileRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO files (path, content_hash, size, mtime, language, indexed_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(path) DO UPDATE SET
             content_hash = excluded.content_hash,
             size = excluded.size,
             mtime = excluded.mtime,
             language = excluded.language,
             indexed_at = excluded.indexed_at",
        params![
            record.path,
            record.content_hash,
            record.size as i64,
            record.mtime,
            record.language,
            record.indexed_at,
        ],
    )?;
    let id = conn.query_row("SELECT id FROM files WHERE path = ?", [&record.path], |row| {
        row.get(0)
    })?;
    Ok(id)
}

fn replace_chunks_inner(
    conn: &Connection,
    file_id: i64,
    chunks: &[ChunkWrite],
) -> Result<Vec<i64>> {
    conn.execute("DELETE FROM chunks WHERE file_id = ?", [file_id])?;

    let mut insert = conn.prepare(
        "INSERT INTO chunks (file_id, content, type, start_line, end_line,
                             metadata, magnitude, token_count)
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
    )?;

    let mut ids = Vec::with_capacity(chunks.len());
    for write in chunks {
        let metadata = serde_json::to_string(&write.chunk.metadata).unwrap_or_default();
        insert.execute(params![
            file_id,
            write.chunk.content,
            write.chunk.chunk_type,
            write.chunk.start_line,
            write.chunk.end_line,
            metadata,
            write.token_count,
        ])?;
        let chunk_id = conn.last_insert_rowid();
        write_terms(conn, chunk_id, &write.terms)?;
        ids.push(chunk_id);
    }
    Ok(ids)
}

fn write_terms(conn: &Connection, chunk_id: i64, terms: &HashMap<String, TermEntry>) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO chunk_terms (chunk_id, term, raw_freq, tf, tfidf)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(chunk_id, term) DO UPDATE SET
             raw_freq = excluded.raw_freq,
             tf = excluded.tf,
             tfidf = excluded.tfidf",
    )?;
    for (term, entry) in terms {
        stmt.execute(params![chunk_id, term, entry.raw_freq, entry.tf, entry.tfidf])?;
    }
    Ok(())
}

fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO index_metadata (key, value, updated_at)
         VALUES (?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![key, value, unix_now()],
    )?;
    Ok(())
}

fn collect_magnitudes(
    conn: &Connection,
    sql: &str,
    bind: &[String],
) -> Result<Vec<(i64, f64)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
    })?;
    let mut magnitudes = Vec::new();
    for row in rows {
        let (chunk_id, sum_squares) = row?;
        magnitudes.push((chunk_id, sum_squares.sqrt()));
    }
    Ok(magnitudes)
}

fn apply_magnitudes(conn: &Connection, magnitudes: &[(i64, f64)]) -> Result<()> {
    let mut stmt = conn.prepare("UPDATE chunks SET magnitude = ? WHERE id = ?")?;
    for (chunk_id, magnitude) in magnitudes {
        stmt.execute(params![magnitude, chunk_id])?;
    }
    Ok(())
}

/// Comma-separated `?` placeholders for an IN clause.
fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}
