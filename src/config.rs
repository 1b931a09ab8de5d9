//! Configuration for the index and search core.
//!
//! A configuration record is built once at startup (defaults, then an
//! optional `coderag.toml` in the repo root, then environment variables for
//! the embedding provider) and threaded through construction immutably.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::CoderagErr;
use crate::error::Result;

/// Main configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Repository root to index.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Directory for persisted state. Derived from the root path when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Start background indexing on startup.
    #[serde(default = "default_true")]
    pub auto_index: bool,

    /// Indexing configuration.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Embedding provider configuration (None = lexical only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            data_dir: None,
            auto_index: true,
            indexing: IndexingConfig::default(),
            chunking: ChunkingConfig::default(),
            search: SearchConfig::default(),
            embedding: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration for a repository root.
    ///
    /// Merge order: defaults, then `{root}/coderag.toml` when present, then
    /// embedding settings from the environment. Callers (the CLI) apply flag
    /// overrides on the returned record.
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let file = root.join("coderag.toml");
        if file.is_file() {
            let text = std::fs::read_to_string(&file).map_err(|e| CoderagErr::io(&file, e))?;
            config = toml::from_str(&text).map_err(|e| CoderagErr::Config {
                field: file.display().to_string(),
                cause: e.to_string(),
            })?;
        }

        config.root = root.to_path_buf();
        if config.embedding.is_none() {
            config.embedding = EmbeddingConfig::from_env();
        }
        config.validate()?;
        Ok(config)
    }

    /// Resolve the data directory for this repository.
    ///
    /// Defaults to `~/.coderag/<hash>` where the hash is derived from the
    /// absolute root path, so two checkouts never share an index.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let abs = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let digest = Sha256::digest(abs.to_string_lossy().as_bytes());
        let tag = &hex::encode(digest)[..16];
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".coderag")
            .join(tag)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<()> {
        self.indexing.validate()?;
        self.chunking.validate()?;
        self.search.validate()?;
        Ok(())
    }
}

/// Indexing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingConfig {
    /// Per-file size cap in bytes; larger files are skipped.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Files per write transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent chunk/tokenize workers within a batch.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Watch the filesystem for changes after the initial pass.
    #[serde(default = "default_true")]
    pub watch_enabled: bool,

    /// Watcher debounce window in milliseconds (minimum 200).
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// Assume files with unchanged mtime and size are unchanged,
    /// skipping the content hash.
    #[serde(default)]
    pub trust_mtime: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            batch_size: default_batch_size(),
            worker_count: default_worker_count(),
            watch_enabled: true,
            watch_debounce_ms: default_watch_debounce_ms(),
            trust_mtime: false,
        }
    }
}

impl IndexingConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(CoderagErr::Config {
                field: "indexing.max_file_size".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(CoderagErr::Config {
                field: "indexing.batch_size".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.worker_count == 0 {
            return Err(CoderagErr::Config {
                field: "indexing.worker_count".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.watch_debounce_ms < 200 {
            return Err(CoderagErr::Config {
                field: "indexing.watch_debounce_ms".to_string(),
                cause: format!("must be >= 200, got {}", self.watch_debounce_ms),
            });
        }
        Ok(())
    }
}

fn default_max_file_size() -> u64 {
    1_048_576
}
fn default_batch_size() -> usize {
    50
}
fn default_worker_count() -> usize {
    4
}
fn default_watch_debounce_ms() -> u64 {
    500
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters before recursive splitting.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Adjacent non-semantic fragments below this size are merged.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Prepend imports/type aliases/namespace openers to every chunk.
    #[serde(default = "default_true")]
    pub preserve_context: bool,

    /// Recursively parse embedded code blocks.
    #[serde(default = "default_true")]
    pub parse_embedded: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            preserve_context: true,
            parse_embedded: true,
        }
    }
}

impl ChunkingConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(CoderagErr::Config {
                field: "chunking.max_chunk_size".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(CoderagErr::Config {
                field: "chunking.min_chunk_size".to_string(),
                cause: format!(
                    "must not exceed max_chunk_size ({} > {})",
                    self.min_chunk_size, self.max_chunk_size
                ),
            });
        }
        Ok(())
    }
}

fn default_max_chunk_size() -> usize {
    1000
}
fn default_min_chunk_size() -> usize {
    100
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// BM25 term-frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f64,

    /// BM25 length normalization.
    #[serde(default = "default_b")]
    pub b: f64,

    /// Candidate pool multiplier over the requested limit.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: i32,

    /// Fold numeric literals into a single token class.
    #[serde(default = "default_true")]
    pub fold_numbers: bool,

    /// Vector candidate oversampling factor.
    #[serde(default = "default_oversample")]
    pub oversample: i32,

    /// Per-call embedding timeout in seconds.
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    /// Query cache capacity (entries).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Query cache TTL in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
            candidate_multiplier: default_candidate_multiplier(),
            fold_numbers: true,
            oversample: default_oversample(),
            embed_timeout_secs: default_embed_timeout_secs(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl SearchConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.k1 <= 0.0 {
            return Err(CoderagErr::Config {
                field: "search.k1".to_string(),
                cause: format!("must be positive, got {}", self.k1),
            });
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(CoderagErr::Config {
                field: "search.b".to_string(),
                cause: format!("must be in 0..=1, got {}", self.b),
            });
        }
        if self.candidate_multiplier < 1 {
            return Err(CoderagErr::Config {
                field: "search.candidate_multiplier".to_string(),
                cause: "must be >= 1".to_string(),
            });
        }
        if self.cache_capacity == 0 {
            return Err(CoderagErr::Config {
                field: "search.cache_capacity".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_k1() -> f64 {
    1.2
}
fn default_b() -> f64 {
    0.75
}
fn default_candidate_multiplier() -> i32 {
    5
}
fn default_oversample() -> i32 {
    4
}
fn default_embed_timeout_secs() -> u64 {
    10
}
fn default_cache_capacity() -> usize {
    128
}
fn default_cache_ttl_secs() -> u64 {
    60
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// API key; the provider is disabled without one.
    pub api_key: String,

    /// API base URL.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension.
    #[serde(default = "default_embedding_dimension")]
    pub dimensions: i32,
}

impl EmbeddingConfig {
    /// Build from environment variables, if an API key is present.
    ///
    /// Reads `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `EMBEDDING_MODEL`,
    /// `EMBEDDING_DIMENSIONS`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        if api_key.is_empty() {
            return None;
        }
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| default_embedding_base_url());
        let model = std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| default_embedding_model());
        let dimensions = std::env::var("EMBEDDING_DIMENSIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_embedding_dimension);
        Some(Self {
            api_key,
            base_url,
            model,
            dimensions,
        })
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default embedding dimension.
pub fn default_embedding_dimension() -> i32 {
    1536
}
