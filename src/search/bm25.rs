//! BM25 lexical retrieval over the persisted inverted index.
//!
//! Query terms come from the same tokenizer as indexing. Candidates are
//! fetched from the store grouped per chunk, scored with BM25 (`k1 = 1.2`,
//! `b = 0.75` by default) using the smoothed IDF table, and ordered
//! deterministically: score descending, then `(file_path, start_line)`
//! ascending.

use std::sync::Arc;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::storage::IndexStore;
use crate::tokenizer::CodeTokenizer;
use crate::types::Candidate;

/// Minimum candidate pool regardless of the requested limit.
const MIN_CANDIDATE_POOL: usize = 50;

/// One scored lexical hit.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub candidate: Candidate,
    pub score: f64,
    /// Query terms present in the chunk, sorted.
    pub matched_terms: Vec<String>,
}

/// BM25 searcher.
pub struct Bm25Searcher {
    store: Arc<IndexStore>,
    tokenizer: CodeTokenizer,
    k1: f64,
    b: f64,
    candidate_multiplier: usize,
}

impl Bm25Searcher {
    /// Create a searcher with the configured parameters.
    pub fn new(store: Arc<IndexStore>, config: &SearchConfig) -> Self {
        Self {
            store,
            tokenizer: CodeTokenizer::new(config.fold_numbers),
            k1: config.k1,
            b: config.b,
            candidate_multiplier: config.candidate_multiplier.max(1) as usize,
        }
    }

    /// Tokenize a query into unique terms, preserving first-seen order.
    pub fn query_terms(&self, query: &str) -> Vec<String> {
        let mut terms = Vec::new();
        for term in self.tokenizer.tokenize(query) {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }

    /// Rank chunks for a query, best first.
    ///
    /// Returns up to `limit` hits; the candidate pool is oversampled so
    /// post-ranking filters still have enough to choose from.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let terms = self.query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_limit = (limit * self.candidate_multiplier).max(MIN_CANDIDATE_POOL);
        let candidates = self
            .store
            .search_candidates(terms.clone(), candidate_limit)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let idf = self.store.idf_for_terms(terms).await?;
        let avgdl = self.store.average_doc_length().await?;

        let mut hits: Vec<LexicalHit> = candidates
            .into_iter()
            .map(|candidate| {
                let score = self.score(&candidate, &idf, avgdl);
                let mut matched_terms: Vec<String> =
                    candidate.matched_terms.keys().cloned().collect();
                matched_terms.sort();
                LexicalHit {
                    candidate,
                    score,
                    matched_terms,
                }
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate.file_path.cmp(&b.candidate.file_path))
                .then_with(|| a.candidate.start_line.cmp(&b.candidate.start_line))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// BM25 score for one candidate.
    ///
    /// `score = Σ idf(t) · f·(k1+1) / (f + k1·(1 − b + b·|c|/avgdl))` over
    /// the query terms present in the chunk, with `f` the raw frequency and
    /// `|c|` the chunk token count.
    fn score(
        &self,
        candidate: &Candidate,
        idf: &std::collections::HashMap<String, f64>,
        avgdl: f64,
    ) -> f64 {
        let length_norm = if avgdl > 0.0 {
            1.0 - self.b + self.b * (candidate.token_count as f64 / avgdl)
        } else {
            1.0
        };

        candidate
            .matched_terms
            .iter()
            .map(|(term, &raw_freq)| {
                let term_idf = idf.get(term).copied().unwrap_or(0.0);
                let f = raw_freq as f64;
                term_idf * (f * (self.k1 + 1.0)) / (f + self.k1 * length_norm)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ChunkWrite;
    use crate::storage::FileApply;
    use crate::storage::SqliteStore;
    use crate::storage::TermEntry;
    use crate::storage::run_migrations;
    use crate::types::Chunk;
    use crate::types::ChunkMetadata;
    use crate::types::FileRecord;
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn store_with(
        files: Vec<(&str, Vec<(&str, &[(&str, i64)])>)>,
    ) -> (TempDir, Arc<IndexStore>) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(SqliteStore::open(&dir.path().join("index.db")).unwrap());
        run_migrations(&db, &dir.path().join("migrations"))
            .await
            .unwrap();
        let store = Arc::new(IndexStore::new(db));

        let mut applies = Vec::new();
        let mut all_terms: Vec<String> = Vec::new();
        for (path, chunks) in files {
            let chunk_writes = chunks
                .into_iter()
                .map(|(content, terms)| {
                    let token_count: i64 = terms.iter().map(|(_, n)| n).sum();
                    let term_map: HashMap<String, TermEntry> = terms
                        .iter()
                        .map(|(term, raw)| {
                            all_terms.push(term.to_string());
                            (
                                term.to_string(),
                                TermEntry {
                                    raw_freq: *raw,
                                    tf: *raw as f64 / token_count as f64,
                                    tfidf: 0.0,
                                },
                            )
                        })
                        .collect();
                    ChunkWrite {
                        chunk: Chunk {
                            content: content.to_string(),
                            chunk_type: "function".to_string(),
                            start_line: 1,
                            end_line: 2,
                            metadata: ChunkMetadata::default(),
                        },
                        token_count,
                        terms: term_map,
                    }
                })
                .collect();
            applies.push(FileApply {
                record: FileRecord {
                    path: path.to_string(),
                    content_hash: format!("hash-{path}"),
                    size: 10,
                    mtime: 0,
                    language: Some("rust".to_string()),
                    indexed_at: 0,
                },
                chunks: chunk_writes,
            });
        }
        store.apply_file_batch(applies).await.unwrap();
        store.recompute_idf(all_terms).await.unwrap();
        store.update_average_doc_length().await.unwrap();
        store.update_corpus_size().await.unwrap();
        (dir, store)
    }

    fn searcher(store: Arc<IndexStore>) -> Bm25Searcher {
        Bm25Searcher::new(store, &SearchConfig::default())
    }

    #[tokio::test]
    async fn test_ranking_prefers_higher_frequency_and_coverage() {
        // login.ts mentions "authenticate" three times and "user" once;
        // utils.ts mentions "authenticate" once.
        let (_dir, store) = store_with(vec![
            (
                "login.ts",
                vec![(
                    "authenticate user session",
                    &[("authenticate", 3), ("user", 1), ("session", 1)][..],
                )],
            ),
            (
                "utils.ts",
                vec![("authenticate helper", &[("authenticate", 1), ("helper", 1)][..])],
            ),
        ])
        .await;

        let hits = searcher(store)
            .search("authenticate user", 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].candidate.file_path, "login.ts");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(
            hits[0].matched_terms,
            vec!["authenticate".to_string(), "user".to_string()]
        );
        assert_eq!(hits[1].matched_terms, vec!["authenticate".to_string()]);
    }

    #[tokio::test]
    async fn test_no_terms_no_results() {
        let (_dir, store) = store_with(vec![(
            "a.rs",
            vec![("content", &[("content", 1)][..])],
        )])
        .await;
        let searcher = searcher(store);

        // Stop words only.
        assert!(searcher.search("the is a", 10).await.unwrap().is_empty());
        assert!(searcher.search("", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_terms_empty() {
        let (_dir, store) = store_with(vec![(
            "a.rs",
            vec![("content", &[("content", 1)][..])],
        )])
        .await;
        let hits = searcher(store).search("nonexistent_token", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_deterministic_tiebreak() {
        // Two identical chunks in different files: path order breaks the tie.
        let (_dir, store) = store_with(vec![
            ("b.rs", vec![("same thing", &[("same", 1), ("thing", 1)][..])]),
            ("a.rs", vec![("same thing", &[("same", 1), ("thing", 1)][..])]),
        ])
        .await;

        let hits = searcher(store).search("same", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].candidate.file_path, "a.rs");
        assert_eq!(hits[1].candidate.file_path, "b.rs");
    }

    #[tokio::test]
    async fn test_limit_respected() {
        let files: Vec<(String, i64)> = (0..20).map(|i| (format!("f{i:02}.rs"), i)).collect();
        let (_dir, store) = store_with(
            files
                .iter()
                .map(|(path, _)| {
                    (
                        path.as_str(),
                        vec![("shared term", &[("shared", 1i64)][..])],
                    )
                })
                .collect(),
        )
        .await;

        let hits = searcher(store).search("shared", 5).await.unwrap();
        assert_eq!(hits.len(), 5);
    }
}
