//! High-level search service.
//!
//! Owns the store, the index engine, the watcher and the query cache.
//! Startup order: open store → run migrations (fatal on failure) → spawn
//! the background indexing task → start the file watcher. Queries stay
//! available throughout and read whatever is committed.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embeddings::EmbeddingProvider;
use crate::embeddings::provider_from_config;
use crate::error::Result;
use crate::indexing::EventQueue;
use crate::indexing::FileWatcher;
use crate::indexing::IndexEngine;
use crate::indexing::IndexOutcome;
use crate::indexing::IndexStatus;
use crate::indexing::RebuildMode;
use crate::indexing::StatusHandle;
use crate::indexing::render_progress_bar;
use crate::search::HybridSearcher;
use crate::search::QueryCache;
use crate::storage::IndexStore;
use crate::storage::SqliteStore;
use crate::storage::SqliteVectorStore;
use crate::storage::StoreStats;
use crate::storage::VectorStore;
use crate::storage::catalog::META_CORPUS_SIZE;
use crate::storage::run_migrations;
use crate::types::SearchRequest;
use crate::types::SearchResponse;

/// Default fusion weight when an embedding provider is configured.
const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;

/// Search service over one repository.
pub struct SearchService {
    config: Config,
    store: Arc<IndexStore>,
    engine: Arc<IndexEngine>,
    searcher: HybridSearcher,
    cache: QueryCache,
    status: StatusHandle,
    cancel: CancellationToken,
    watcher: Mutex<Option<FileWatcher>>,
    default_vector_weight: f32,
}

impl SearchService {
    /// Open the store, migrate, and start background work per the config.
    pub async fn start(config: Config) -> Result<Arc<Self>> {
        config.validate()?;

        let data_dir = config.resolve_data_dir();
        let db = Arc::new(SqliteStore::open(&data_dir.join("index.db"))?);
        run_migrations(&db, &data_dir.join("migrations")).await?;
        let store = Arc::new(IndexStore::new(db));

        let provider = provider_from_config(
            config.embedding.as_ref(),
            Duration::from_secs(config.search.embed_timeout_secs),
        );
        let vectors: Option<Arc<dyn VectorStore>> = match &provider {
            Some(provider) => Some(Arc::new(
                SqliteVectorStore::open(&data_dir, provider.dimension()).await?,
            )),
            None => None,
        };

        let epoch = Arc::new(AtomicU64::new(0));
        let status = StatusHandle::new();
        let cancel = CancellationToken::new();

        let engine = Arc::new(IndexEngine::new(
            config.clone(),
            store.clone(),
            vectors.clone(),
            provider.clone(),
            status.clone(),
            epoch.clone(),
            cancel.clone(),
        ));

        let mut searcher = HybridSearcher::new(store.clone(), &config.search);
        if let (Some(vectors), Some(provider)) = (vectors, provider) {
            searcher = searcher.with_vector_search(vectors, provider);
        }
        let default_vector_weight = if searcher.has_vector_search() {
            DEFAULT_VECTOR_WEIGHT
        } else {
            0.0
        };

        let cache = QueryCache::new(
            config.search.cache_capacity,
            Duration::from_secs(config.search.cache_ttl_secs),
            epoch,
        );

        let service = Arc::new(Self {
            store,
            engine: engine.clone(),
            searcher,
            cache,
            status,
            cancel,
            watcher: Mutex::new(None),
            default_vector_weight,
            config,
        });

        if service.config.auto_index {
            let engine = engine.clone();
            tokio::spawn(async move {
                match engine.index().await {
                    Ok(outcome) => {
                        tracing::info!(
                            added = outcome.added,
                            changed = outcome.changed,
                            deleted = outcome.deleted,
                            failed = outcome.failed,
                            cancelled = outcome.cancelled,
                            "initial indexing finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "initial indexing failed");
                    }
                }
            });
        }

        if service.config.indexing.watch_enabled {
            let queue = Arc::new(EventQueue::new());
            let watcher = FileWatcher::start(
                &service.config.root,
                Duration::from_millis(service.config.indexing.watch_debounce_ms),
                queue.clone(),
            )?;
            *service
                .watcher
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(watcher);
            tokio::spawn(engine.run_watch_loop(queue));
        }

        Ok(service)
    }

    /// Run a search.
    ///
    /// Before the first indexing pass completes, returns an empty hit list
    /// with `index_ready = false` instead of an error; the shell renders an
    /// "indexing in progress" view from it.
    pub async fn search(&self, mut request: SearchRequest) -> Result<SearchResponse> {
        request.validate()?;
        if request.vector_weight.is_none() {
            request.vector_weight = Some(self.default_vector_weight);
        }

        if let Some(cached) = self.cache.get(&request) {
            return Ok(cached);
        }

        let index_ready = self.store.get_metadata(META_CORPUS_SIZE).await?.is_some();
        let hits = if index_ready {
            let weight = request.vector_weight.unwrap_or(self.default_vector_weight);
            self.searcher.search(&request, weight).await?
        } else {
            Vec::new()
        };

        let response = SearchResponse { hits, index_ready };
        self.cache.put(&request, response.clone());
        Ok(response)
    }

    /// Current indexing status snapshot.
    pub fn status(&self) -> IndexStatus {
        self.status.snapshot()
    }

    /// Status as a human-readable report with a progress bar.
    pub fn status_report(&self) -> String {
        let status = self.status();
        let bar = render_progress_bar(status.progress, 24);
        let state = if status.indexing { "indexing" } else { "idle" };
        let current = status
            .current_file
            .as_deref()
            .map(|file| format!("\ncurrent: {file}"))
            .unwrap_or_default();
        format!(
            "{bar} {state}\nfiles: {}/{}  chunks: {}{current}",
            status.processed_files, status.total_files, status.indexed_chunks
        )
    }

    /// Aggregate store statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Run an indexing pass now.
    pub async fn reindex(&self, mode: RebuildMode) -> Result<IndexOutcome> {
        self.engine.rebuild(mode).await
    }

    /// Configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop background work: cancels indexing after the current group and
    /// stops the watcher.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(watcher) = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            watcher.stop();
        }
    }
}

impl Drop for SearchService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config_for(root: &TempDir, data: &TempDir) -> Config {
        let mut config = Config {
            root: root.path().to_path_buf(),
            data_dir: Some(PathBuf::from(data.path())),
            auto_index: false,
            ..Default::default()
        };
        config.indexing.watch_enabled = false;
        config
    }

    #[tokio::test]
    async fn test_not_ready_before_first_pass() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let service = SearchService::start(config_for(&root, &data)).await.unwrap();

        let response = service
            .search(SearchRequest::new("anything"))
            .await
            .unwrap();
        assert!(!response.index_ready);
        assert!(response.hits.is_empty());
    }

    #[tokio::test]
    async fn test_index_then_search() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        std::fs::write(
            root.path().join("login.ts"),
            "export function authenticateUser(){ return authenticate(session) }",
        )
        .unwrap();

        let service = SearchService::start(config_for(&root, &data)).await.unwrap();
        service.reindex(RebuildMode::Incremental).await.unwrap();

        let response = service
            .search(SearchRequest::new("authenticate"))
            .await
            .unwrap();
        assert!(response.index_ready);
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].path, "login.ts");
        assert!(response.hits[0].snippet.is_some());

        service.shutdown();
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_queries() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        std::fs::write(root.path().join("a.rs"), "pub fn cached_thing() {}").unwrap();

        let service = SearchService::start(config_for(&root, &data)).await.unwrap();
        service.reindex(RebuildMode::Incremental).await.unwrap();

        let first = service
            .search(SearchRequest::new("cached_thing"))
            .await
            .unwrap();
        let second = service
            .search(SearchRequest::new("cached_thing"))
            .await
            .unwrap();
        assert_eq!(first.hits.len(), second.hits.len());

        // A new pass bumps the epoch; the cached entry is dropped and the
        // query re-runs against fresh data.
        std::fs::write(root.path().join("b.rs"), "pub fn cached_thing_too() {}").unwrap();
        service.reindex(RebuildMode::Incremental).await.unwrap();
        let third = service
            .search(SearchRequest::new("cached_thing"))
            .await
            .unwrap();
        assert!(third.hits.len() >= first.hits.len());

        service.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let service = SearchService::start(config_for(&root, &data)).await.unwrap();

        let mut request = SearchRequest::new("");
        assert!(service.search(request.clone()).await.is_err());
        request.query = "ok".to_string();
        request.limit = 0;
        assert!(service.search(request).await.is_err());
    }

    #[tokio::test]
    async fn test_status_report_renders() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let service = SearchService::start(config_for(&root, &data)).await.unwrap();

        let report = service.status_report();
        assert!(report.contains('['));
        assert!(report.contains("idle"));
    }
}
