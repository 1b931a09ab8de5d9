//! Retrieval: BM25 lexical search, vector search, hybrid fusion, filters,
//! snippets, and the query cache.

pub mod bm25;
pub mod cache;
pub mod filters;
pub mod hybrid;
pub mod snippet;

pub use bm25::Bm25Searcher;
pub use bm25::LexicalHit;
pub use cache::QueryCache;
pub use filters::SearchFilters;
pub use hybrid::HybridSearcher;
pub use snippet::SnippetOptions;
pub use snippet::build_snippet;
