//! Core data types shared across the indexing and search subsystems.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Compute a content hash (first 16 hex chars of SHA-256).
///
/// Short enough to store per file row, long enough that collisions within
/// one repository are not a practical concern.
pub fn content_hash(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    hex::encode(hash)[..16].to_string()
}

/// A chunk emitted by the chunker, before storage assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Chunk text, including the context prefix when enabled.
    pub content: String,
    /// Normalized node kind ("function", "class", ...) or "fallback".
    pub chunk_type: String,
    /// Start line in the source file (1-based, inclusive).
    pub start_line: i32,
    /// End line in the source file (1-based, inclusive).
    pub end_line: i32,
    /// Language-specific metadata.
    pub metadata: ChunkMetadata,
}

/// Metadata bag attached to every chunk.
///
/// Serialized to JSON in the chunks table; absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// True when the chunk came from the character-window fallback path.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    /// Parse error kind when the fallback was caused by a failed parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    /// True when an oversized chunk was split below node granularity.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub split: bool,
    /// Kind of the container node this chunk was embedded in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_in: Option<String>,
    /// Language the embedded body was parsed as (info string, verbatim).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_language: Option<String>,
}

impl ChunkMetadata {
    /// Metadata for a character-window fallback chunk.
    pub fn fallback(parse_error: Option<String>) -> Self {
        Self {
            fallback: true,
            parse_error,
            ..Default::default()
        }
    }
}

/// A file observed on disk during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the repository root.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Modification time as Unix seconds.
    pub mtime: i64,
}

/// Persisted per-file index state, loaded for diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub content_hash: String,
    pub size: u64,
    pub mtime: i64,
}

/// A file row ready for upsert.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub size: u64,
    pub mtime: i64,
    pub language: Option<String>,
    pub indexed_at: i64,
}

/// A search candidate returned by the store, grouped per chunk.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: i64,
    pub file_path: String,
    pub language: Option<String>,
    pub content: String,
    pub chunk_type: String,
    pub start_line: i32,
    pub end_line: i32,
    /// Query terms present in this chunk, with their raw frequencies.
    pub matched_terms: HashMap<String, i64>,
    pub magnitude: f64,
    pub token_count: i64,
}

/// How a search hit was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Lexical,
    Vector,
    Hybrid,
}

/// Search request accepted by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text (required, non-empty).
    pub query: String,
    /// Maximum results, 1..=100.
    #[serde(default = "default_limit")]
    pub limit: i32,
    /// Attach snippets to hits.
    #[serde(default = "default_true")]
    pub include_content: bool,
    /// Extension whitelist, e.g. [".rs", ".py"].
    #[serde(default)]
    pub file_extensions: Option<Vec<String>>,
    /// Substring that must appear in the hit path.
    #[serde(default)]
    pub path_filter: Option<String>,
    /// Substrings that must not appear in the hit path (OR semantics).
    #[serde(default)]
    pub exclude_paths: Option<Vec<String>>,
    /// Context lines around matched lines in snippets, 0..=20.
    #[serde(default = "default_context_lines")]
    pub context_lines: i32,
    /// Snippet length cap in characters.
    #[serde(default = "default_max_snippet_chars")]
    pub max_snippet_chars: usize,
    /// Maximum contiguous snippet blocks, 1..=10.
    #[serde(default = "default_max_snippet_blocks")]
    pub max_snippet_blocks: usize,
    /// Lexical vs vector balance, 0.0..=1.0.
    ///
    /// Defaults to 0.7 when an embedding provider is configured, 0 otherwise;
    /// the service fills it in when absent.
    #[serde(default)]
    pub vector_weight: Option<f32>,
}

fn default_limit() -> i32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_context_lines() -> i32 {
    3
}
fn default_max_snippet_chars() -> usize {
    2000
}
fn default_max_snippet_blocks() -> usize {
    4
}

impl SearchRequest {
    /// Create a request with defaults for everything but the query.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
            include_content: default_true(),
            file_extensions: None,
            path_filter: None,
            exclude_paths: None,
            context_lines: default_context_lines(),
            max_snippet_chars: default_max_snippet_chars(),
            max_snippet_blocks: default_max_snippet_blocks(),
            vector_weight: None,
        }
    }

    /// Validate field ranges.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::CoderagErr;

        if self.query.trim().is_empty() {
            return Err(CoderagErr::InvalidRequest {
                cause: "query must be non-empty".to_string(),
            });
        }
        if !(1..=100).contains(&self.limit) {
            return Err(CoderagErr::InvalidRequest {
                cause: format!("limit must be 1..=100, got {}", self.limit),
            });
        }
        if !(0..=20).contains(&self.context_lines) {
            return Err(CoderagErr::InvalidRequest {
                cause: format!("context_lines must be 0..=20, got {}", self.context_lines),
            });
        }
        if !(1..=10).contains(&self.max_snippet_blocks) {
            return Err(CoderagErr::InvalidRequest {
                cause: format!(
                    "max_snippet_blocks must be 1..=10, got {}",
                    self.max_snippet_blocks
                ),
            });
        }
        if let Some(w) = self.vector_weight
            && !(0.0..=1.0).contains(&w)
        {
            return Err(CoderagErr::InvalidRequest {
                cause: format!("vector_weight must be 0..=1, got {w}"),
            });
        }
        Ok(())
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub score: f32,
    pub method: MatchMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_terms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub chunk_type: String,
    pub start_line: i32,
    pub end_line: i32,
    /// Present iff the request asked for content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Response for a search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// False until the first index batch has committed.
    pub index_ready: bool,
}

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Normalize a path to the forward-slash relative form stored in the index.
pub fn normalize_rel_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}
