//! AST-aware chunking.
//!
//! Splits source text into size-bounded semantic chunks at AST node
//! boundaries, with context preservation and recursive embedded-language
//! parsing. Unknown languages and unparseable input fall back to character
//! windows.

pub mod chunker;
pub mod markdown;

pub use chunker::ChunkOptions;
pub use chunker::Chunker;
pub use chunker::EMBEDDED_DEPTH_CAP;
