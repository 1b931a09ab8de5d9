//! Incremental index engine.
//!
//! Orchestrates the three indexing phases:
//! - **Diff**: walk the filesystem and compare against the persisted file
//!   index, producing added/changed/deleted sets.
//! - **Apply**: read, chunk and tokenize files concurrently in bounded
//!   groups; each group commits in a single transaction, so interrupting
//!   the process never leaves a partial group behind.
//! - **Recompute**: targeted IDF rebuild for the affected terms, dependent
//!   TF-IDF and magnitude refresh, average document length, corpus size,
//!   and a query-cache epoch bump.
//!
//! Search stays available throughout: reads see whatever was last
//! committed.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;

use crate::chunking::ChunkOptions;
use crate::chunking::Chunker;
use crate::config::Config;
use crate::embeddings::EmbeddingProvider;
use crate::embeddings::FallbackEmbeddings;
use crate::error::CoderagErr;
use crate::error::Result;
use crate::indexing::diff::compute_diff;
use crate::indexing::diff::hash_file;
use crate::indexing::progress::StatusHandle;
use crate::indexing::queue::EventQueue;
use crate::indexing::queue::WatchEventKind;
use crate::indexing::walker::Walker;
use crate::indexing::walker::is_probably_binary;
use crate::language;
use crate::storage::ChunkWrite;
use crate::storage::FileApply;
use crate::storage::IndexStore;
use crate::storage::TermEntry;
use crate::storage::VectorStore;
use crate::tokenizer::CodeTokenizer;
use crate::types::FileRecord;
use crate::types::normalize_rel_path;
use crate::types::unix_now;

/// Rebuild mode for indexing passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildMode {
    /// Only process changed files.
    #[default]
    Incremental,
    /// Drop all index data, then rebuild from scratch.
    Clean,
}

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Default)]
pub struct IndexOutcome {
    pub added: usize,
    pub changed: usize,
    pub deleted: usize,
    pub failed: usize,
    pub chunks_written: u64,
    /// True when the pass stopped early on cancellation; committed groups
    /// stay committed.
    pub cancelled: bool,
}

/// Incremental index engine.
pub struct IndexEngine {
    config: Config,
    root: PathBuf,
    store: Arc<IndexStore>,
    vectors: Option<Arc<dyn VectorStore>>,
    provider: Option<Arc<FallbackEmbeddings>>,
    tokenizer: CodeTokenizer,
    chunk_options: ChunkOptions,
    status: StatusHandle,
    /// Query-cache epoch; bumped on every committed write.
    epoch: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl IndexEngine {
    /// Create an engine over an open store.
    pub fn new(
        config: Config,
        store: Arc<IndexStore>,
        vectors: Option<Arc<dyn VectorStore>>,
        provider: Option<Arc<FallbackEmbeddings>>,
        status: StatusHandle,
        epoch: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) -> Self {
        let tokenizer = CodeTokenizer::new(config.search.fold_numbers);
        let chunk_options = ChunkOptions::from(&config.chunking);
        let root = config.root.clone();
        Self {
            config,
            root,
            store,
            vectors,
            provider,
            tokenizer,
            chunk_options,
            status,
            epoch,
            cancel,
        }
    }

    /// Shared status handle.
    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Run one full incremental pass: diff the filesystem against the store
    /// and apply the differences.
    pub async fn index(&self) -> Result<IndexOutcome> {
        let root = self.root.clone();
        let max = self.config.indexing.max_file_size;
        let scanned = spawn_blocking(move || Walker::new(max).scan(&root))
            .await
            .map_err(|e| CoderagErr::Io {
                path: self.root.clone(),
                cause: format!("scan task failed: {e}"),
            })??;

        let persisted = self.store.load_file_index().await?;
        let root = self.root.clone();
        let trust_mtime = self.config.indexing.trust_mtime;
        let diff = spawn_blocking(move || compute_diff(&root, &scanned, &persisted, trust_mtime))
            .await
            .map_err(|e| CoderagErr::Io {
                path: self.root.clone(),
                cause: format!("diff task failed: {e}"),
            })?;

        tracing::info!(
            added = diff.added.len(),
            changed = diff.changed.len(),
            deleted = diff.deleted.len(),
            "filesystem diff complete"
        );

        self.apply_changes(diff.added, diff.changed, diff.deleted)
            .await
    }

    /// Run a pass in the given mode. `Clean` drops all persisted index data
    /// first.
    pub async fn rebuild(&self, mode: RebuildMode) -> Result<IndexOutcome> {
        if mode == RebuildMode::Clean {
            self.clean().await?;
        }
        self.index().await
    }

    /// Drop all index data.
    pub async fn clean(&self) -> Result<()> {
        self.store
            .store()
            .transaction(|conn| {
                conn.execute("DELETE FROM files", [])?;
                conn.execute("DELETE FROM idf_scores", [])?;
                conn.execute("DELETE FROM index_metadata", [])?;
                Ok(())
            })
            .await?;
        if let Some(vectors) = &self.vectors {
            vectors.clear().await?;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::info!("cleaned all index data");
        Ok(())
    }

    /// Apply explicit change sets (Phase B + Phase C).
    pub async fn apply_changes(
        &self,
        added: Vec<String>,
        changed: Vec<String>,
        deleted: Vec<String>,
    ) -> Result<IndexOutcome> {
        let mut outcome = IndexOutcome {
            added: added.len(),
            changed: changed.len(),
            deleted: deleted.len(),
            ..Default::default()
        };

        if added.is_empty() && changed.is_empty() && deleted.is_empty() {
            return Ok(outcome);
        }

        // Terms of files about to change or disappear must be captured
        // before their rows go away.
        let mut pre_paths = changed.clone();
        pre_paths.extend(deleted.iter().cloned());
        let affected_pre = self.store.terms_by_files(pre_paths.clone()).await?;
        let stale_chunk_ids = self.store.chunk_ids_for_files(pre_paths).await?;

        let upserts: Vec<String> = added.iter().chain(changed.iter()).cloned().collect();
        self.status.begin(upserts.len() as u64);

        let mut processed: u64 = 0;
        let mut chunks_written: u64 = 0;
        let mut any_commit = false;

        for batch in upserts.chunks(self.config.indexing.batch_size) {
            if self.cancel.is_cancelled() {
                tracing::info!("indexing cancelled between groups");
                outcome.cancelled = true;
                break;
            }

            let applies = self.prepare_batch(batch, &mut outcome).await;
            let current = batch.last().cloned();

            if !applies.is_empty() {
                let embeddable: Vec<(String, Vec<String>)> = applies
                    .iter()
                    .map(|apply| {
                        (
                            apply.record.path.clone(),
                            apply
                                .chunks
                                .iter()
                                .map(|c| c.chunk.content.clone())
                                .collect(),
                        )
                    })
                    .collect();

                let ids_by_path = self.store.apply_file_batch(applies).await?;
                any_commit = true;
                chunks_written += ids_by_path.values().map(|ids| ids.len() as u64).sum::<u64>();

                self.write_embeddings(&embeddable, &ids_by_path).await;
            }

            processed += batch.len() as u64;
            self.status.advance(processed, chunks_written, current);
        }

        // Deletions: drop rows (chunks cascade) and purge stale vectors.
        if !outcome.cancelled && !deleted.is_empty() {
            self.store.delete_files(deleted.clone()).await?;
            any_commit = true;
        }
        if !stale_chunk_ids.is_empty()
            && let Some(vectors) = &self.vectors
            && let Err(e) = vectors.delete(stale_chunk_ids).await
        {
            tracing::warn!(error = %e, "failed to purge stale vectors");
        }

        if any_commit {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }

        // Phase C runs only for complete passes; a cancelled pass leaves
        // recompute to the next run, which sees the same affected files.
        if !outcome.cancelled {
            let mut post_paths = added;
            post_paths.extend(changed);
            let affected_post = self.store.terms_by_files(post_paths).await?;
            let affected: HashSet<String> =
                affected_pre.union(&affected_post).cloned().collect();
            self.recompute(affected).await?;
        }

        let stats = self.store.stats().await?;
        outcome.chunks_written = chunks_written;
        self.status.finish(stats.chunk_count.max(0) as u64);

        Ok(outcome)
    }

    /// Phase C: targeted IDF rebuild and dependent refreshes.
    async fn recompute(&self, affected: HashSet<String>) -> Result<()> {
        if !affected.is_empty() {
            let terms: Vec<String> = affected.into_iter().collect();
            self.store.recompute_idf(terms.clone()).await?;
            self.store.recompute_magnitudes_for_terms(terms).await?;
        }
        self.store.update_average_doc_length().await?;
        self.store.update_corpus_size().await?;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Read, chunk and tokenize a group of files on the blocking pool,
    /// bounded by the configured worker count.
    async fn prepare_batch(&self, batch: &[String], outcome: &mut IndexOutcome) -> Vec<FileApply> {
        let mut applies = Vec::with_capacity(batch.len());

        for group in batch.chunks(self.config.indexing.worker_count.max(1)) {
            let mut handles = Vec::with_capacity(group.len());
            for path in group {
                let root = self.root.clone();
                let rel = path.clone();
                let max = self.config.indexing.max_file_size;
                let options = self.chunk_options.clone();
                let tokenizer = self.tokenizer.clone();
                handles.push(spawn_blocking(move || {
                    prepare_file(&root, &rel, max, &options, &tokenizer)
                }));
            }
            for (handle, path) in handles.into_iter().zip(group) {
                match handle.await {
                    Ok(Ok(Some(apply))) => applies.push(apply),
                    Ok(Ok(None)) => {
                        tracing::debug!(path = %path, "skipped non-text or oversized file");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(path = %path, error = %e, "failed to read file, skipping");
                        outcome.failed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "chunk worker panicked, skipping");
                        outcome.failed += 1;
                    }
                }
            }
        }

        applies
    }

    /// Embed new chunks and upsert them into the vector store.
    ///
    /// Failures degrade inside the provider; a hard error here only loses
    /// vector freshness, never indexing progress.
    async fn write_embeddings(
        &self,
        contents: &[(String, Vec<String>)],
        ids_by_path: &std::collections::HashMap<String, Vec<i64>>,
    ) {
        let (Some(provider), Some(vectors)) = (&self.provider, &self.vectors) else {
            return;
        };

        for (path, chunk_contents) in contents {
            let Some(ids) = ids_by_path.get(path) else {
                continue;
            };
            if ids.len() != chunk_contents.len() || ids.is_empty() {
                continue;
            }
            match provider.embed_batch(chunk_contents).await {
                Ok(embeddings) => {
                    let items: Vec<(i64, Vec<f32>)> =
                        ids.iter().copied().zip(embeddings).collect();
                    if let Err(e) = vectors.upsert(items).await {
                        tracing::warn!(path = %path, error = %e, "vector upsert failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "embedding failed for file");
                }
            }
        }
    }

    /// Consume watcher events until cancelled.
    ///
    /// Each drain groups pending events into change sets, verifies them
    /// against the persisted hashes (watchers fire on touches too), and
    /// runs the normal apply/recompute pipeline.
    pub async fn run_watch_loop(self: Arc<Self>, queue: Arc<EventQueue>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("watch loop cancelled");
                    return;
                }
                _ = queue.notified() => {}
            }

            let events = queue.drain();
            if events.is_empty() {
                continue;
            }

            match self.apply_events(events).await {
                Ok(outcome) if outcome.cancelled => return,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "watch update failed");
                }
            }
        }
    }

    /// Turn drained watcher events into change sets and apply them.
    async fn apply_events(
        &self,
        events: Vec<(PathBuf, WatchEventKind)>,
    ) -> Result<IndexOutcome> {
        let persisted = self.store.load_file_index().await?;

        let mut added = Vec::new();
        let mut changed = Vec::new();
        let mut deleted = Vec::new();

        for (path, kind) in events {
            let rel = normalize_rel_path(&self.root, &path);
            match kind {
                WatchEventKind::Deleted => {
                    if persisted.contains_key(&rel) {
                        deleted.push(rel);
                    }
                }
                WatchEventKind::Created | WatchEventKind::Modified => {
                    match persisted.get(&rel) {
                        None => added.push(rel),
                        Some(state) => {
                            // Skip touches that did not change content.
                            match hash_file(&path) {
                                Some(hash) if hash == state.content_hash => {}
                                Some(_) => changed.push(rel),
                                None => deleted.push(rel),
                            }
                        }
                    }
                }
            }
        }

        self.apply_changes(added, changed, deleted).await
    }
}

/// Read, chunk and tokenize one file.
///
/// Returns `Ok(None)` for files that should be silently skipped: oversized,
/// binary, or not valid UTF-8.
fn prepare_file(
    root: &Path,
    rel_path: &str,
    max_file_size: u64,
    options: &ChunkOptions,
    tokenizer: &CodeTokenizer,
) -> Result<Option<FileApply>> {
    let abs = root.join(rel_path);
    let bytes = std::fs::read(&abs).map_err(|e| CoderagErr::io(&abs, e))?;

    if bytes.len() as u64 > max_file_size {
        return Ok(None);
    }
    if is_probably_binary(&bytes) {
        return Ok(None);
    }
    let Ok(content) = String::from_utf8(bytes) else {
        return Ok(None);
    };

    let metadata = std::fs::metadata(&abs).map_err(|e| CoderagErr::io(&abs, e))?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let chunker = Chunker::new(options.clone());
    let chunks = chunker.chunk(&content, Path::new(rel_path));

    let chunk_writes: Vec<ChunkWrite> = chunks
        .into_iter()
        .map(|chunk| {
            let freqs = tokenizer.term_frequencies(&chunk.content);
            let token_count: i64 = freqs.values().sum();
            let terms = freqs
                .into_iter()
                .map(|(term, raw_freq)| {
                    let tf = if token_count > 0 {
                        raw_freq as f64 / token_count as f64
                    } else {
                        0.0
                    };
                    (
                        term,
                        TermEntry {
                            raw_freq,
                            tf,
                            tfidf: 0.0,
                        },
                    )
                })
                .collect();
            ChunkWrite {
                chunk,
                token_count,
                terms,
            }
        })
        .collect();

    let record = FileRecord {
        path: rel_path.to_string(),
        content_hash: crate::types::content_hash(content.as_bytes()),
        size: metadata.len(),
        mtime,
        language: language::detect(Path::new(rel_path)).map(|spec| spec.name.to_string()),
        indexed_at: unix_now(),
    };

    Ok(Some(FileApply {
        record,
        chunks: chunk_writes,
    }))
}
