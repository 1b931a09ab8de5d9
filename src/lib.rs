//! Coderag
//!
//! Incremental code index with AST-aware chunking and hybrid retrieval.
//!
//! ## Features
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | **AST Chunking** | tree-sitter boundary chunks with context prefixes | On |
//! | **BM25 Search** | chunk-level inverted index with smoothed IDF | On |
//! | **Vector Search** | embedding similarity via an OpenAI-compatible API | Off (needs `OPENAI_API_KEY`) |
//! | **Hybrid Fusion** | weighted normalized score fusion | On when vectors are |
//! | **Incremental Update** | content-hash diffing + debounced file watching | On |
//!
//! ## Quick Start
//!
//! ```ignore
//! use coderag::Config;
//! use coderag::SearchService;
//! use coderag::types::SearchRequest;
//!
//! let config = Config::load(std::path::Path::new("."))?;
//! let service = SearchService::start(config).await?;
//! let results = service.search(SearchRequest::new("parse config file")).await?;
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod service;
pub mod types;

// Subsystems
pub mod chunking;
pub mod embeddings;
pub mod indexing;
pub mod language;
pub mod search;
pub mod storage;
pub mod tokenizer;

// Re-exports
pub use config::Config;
pub use error::CoderagErr;
pub use error::Result;
pub use service::SearchService;
pub use types::SearchHit;
pub use types::SearchRequest;
pub use types::SearchResponse;

// Chunking exports
pub use chunking::ChunkOptions;
pub use chunking::Chunker;

// Indexing exports
pub use indexing::FileWatcher;
pub use indexing::IndexEngine;
pub use indexing::IndexStatus;
pub use indexing::RebuildMode;

// Storage exports
pub use storage::IndexStore;
pub use storage::SqliteStore;
