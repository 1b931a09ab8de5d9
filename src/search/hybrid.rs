//! Hybrid retrieval: weighted fusion of BM25 and vector similarity.
//!
//! Each side is normalized to [0, 1] by its own maximum, then combined as
//! `final = w·vec + (1 − w)·lex`. Weights at the extremes short-circuit to
//! a single side. The lexical and vector sub-queries run concurrently; an
//! embedding timeout empties the vector side and the results degrade to
//! lexical.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::embeddings::EmbeddingProvider;
use crate::embeddings::FallbackEmbeddings;
use crate::error::Result;
use crate::search::bm25::Bm25Searcher;
use crate::search::bm25::LexicalHit;
use crate::search::filters::SearchFilters;
use crate::search::snippet::SnippetOptions;
use crate::search::snippet::build_snippet;
use crate::storage::IndexStore;
use crate::storage::VectorStore;
use crate::types::Candidate;
use crate::types::MatchMethod;
use crate::types::SearchHit;
use crate::types::SearchRequest;

/// Weight at or above which fusion is pure vector.
const PURE_VECTOR_THRESHOLD: f32 = 0.99;
/// Weight at or below which fusion is pure lexical.
const PURE_LEXICAL_THRESHOLD: f32 = 0.01;

/// Hybrid searcher.
pub struct HybridSearcher {
    store: Arc<IndexStore>,
    lexical: Bm25Searcher,
    vectors: Option<Arc<dyn VectorStore>>,
    provider: Option<Arc<FallbackEmbeddings>>,
    oversample: usize,
    embed_timeout: Duration,
}

/// One side's contribution to a fused hit.
#[derive(Debug, Default)]
struct Fused {
    lexical_norm: Option<f32>,
    vector_norm: Option<f32>,
    similarity: Option<f32>,
}

impl HybridSearcher {
    /// Create a lexical-only searcher.
    pub fn new(store: Arc<IndexStore>, config: &SearchConfig) -> Self {
        Self {
            lexical: Bm25Searcher::new(store.clone(), config),
            store,
            vectors: None,
            provider: None,
            oversample: config.oversample.max(1) as usize,
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
        }
    }

    /// Enable the vector side.
    pub fn with_vector_search(
        mut self,
        vectors: Arc<dyn VectorStore>,
        provider: Arc<FallbackEmbeddings>,
    ) -> Self {
        self.vectors = Some(vectors);
        self.provider = Some(provider);
        self
    }

    /// Whether a vector side is configured.
    pub fn has_vector_search(&self) -> bool {
        self.vectors.is_some() && self.provider.is_some()
    }

    /// Run a search with the resolved fusion weight.
    pub async fn search(&self, request: &SearchRequest, weight: f32) -> Result<Vec<SearchHit>> {
        let limit = request.limit.max(1) as usize;
        let pool = limit * self.oversample;

        let vector_available = self.has_vector_search()
            && self
                .provider
                .as_ref()
                .is_some_and(|provider| provider.healthy());
        let pure_lexical = weight <= PURE_LEXICAL_THRESHOLD || !vector_available;
        let pure_vector = weight >= PURE_VECTOR_THRESHOLD && vector_available;

        let lexical_side = async {
            if pure_vector {
                Ok(Vec::new())
            } else {
                self.lexical.search(&request.query, pool).await
            }
        };
        let vector_side = async {
            if pure_lexical {
                Vec::new()
            } else {
                self.vector_hits(&request.query, pool).await
            }
        };

        let (lexical_hits, vector_hits) = tokio::join!(lexical_side, vector_side);
        let lexical_hits = lexical_hits?;

        self.fuse(request, weight, lexical_hits, vector_hits, pure_lexical, pure_vector)
            .await
    }

    /// Embed the query and fetch nearest chunks; empty on failure or
    /// timeout.
    async fn vector_hits(&self, query: &str, pool: usize) -> Vec<(i64, f32)> {
        let (Some(provider), Some(vectors)) = (&self.provider, &self.vectors) else {
            return Vec::new();
        };

        let embedding = match tokio::time::timeout(self.embed_timeout, provider.embed(query)).await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "query embedding failed, vector side empty");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.embed_timeout.as_secs(),
                    "query embedding timed out, vector side empty"
                );
                return Vec::new();
            }
        };

        match vectors.query(embedding, pool).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "vector query failed, vector side empty");
                Vec::new()
            }
        }
    }

    /// Combine both sides, filter, rank, snippetize.
    async fn fuse(
        &self,
        request: &SearchRequest,
        weight: f32,
        lexical_hits: Vec<LexicalHit>,
        vector_hits: Vec<(i64, f32)>,
        pure_lexical: bool,
        pure_vector: bool,
    ) -> Result<Vec<SearchHit>> {
        // Normalize each side by its own maximum (identity when empty).
        let max_lexical = lexical_hits
            .iter()
            .map(|hit| hit.score)
            .fold(0.0f64, f64::max);
        let max_vector = vector_hits
            .iter()
            .map(|&(_, similarity)| similarity)
            .fold(0.0f32, f32::max);

        let mut fused: HashMap<i64, Fused> = HashMap::new();
        let mut candidates: HashMap<i64, Candidate> = HashMap::new();
        let mut matched_by_chunk: HashMap<i64, Vec<String>> = HashMap::new();

        for hit in lexical_hits {
            let norm = if max_lexical > 0.0 {
                (hit.score / max_lexical) as f32
            } else {
                0.0
            };
            fused.entry(hit.candidate.chunk_id).or_default().lexical_norm = Some(norm);
            matched_by_chunk.insert(hit.candidate.chunk_id, hit.matched_terms);
            candidates.insert(hit.candidate.chunk_id, hit.candidate);
        }

        for (chunk_id, similarity) in &vector_hits {
            let norm = if max_vector > 0.0 {
                similarity / max_vector
            } else {
                0.0
            };
            let entry = fused.entry(*chunk_id).or_default();
            entry.vector_norm = Some(norm);
            entry.similarity = Some(*similarity);
        }

        // Vector-only hits still need chunk rows.
        let missing: Vec<i64> = fused
            .keys()
            .filter(|id| !candidates.contains_key(id))
            .copied()
            .collect();
        for candidate in self.store.chunks_by_ids(missing).await? {
            candidates.insert(candidate.chunk_id, candidate);
        }

        let filters = SearchFilters::from_request(request);
        let snippet_options = SnippetOptions {
            context_lines: request.context_lines.max(0) as usize,
            max_chars: request.max_snippet_chars,
            max_blocks: request.max_snippet_blocks,
        };

        let mut hits: Vec<SearchHit> = Vec::new();
        for (chunk_id, sides) in fused {
            let Some(candidate) = candidates.get(&chunk_id) else {
                // A stale vector entry pointing at a deleted chunk.
                continue;
            };
            if !filters.matches(&candidate.file_path) {
                continue;
            }

            let (score, method, similarity) = if pure_vector {
                match sides.vector_norm {
                    Some(norm) => (norm, MatchMethod::Vector, sides.similarity),
                    None => continue,
                }
            } else if pure_lexical {
                match sides.lexical_norm {
                    Some(norm) => (norm, MatchMethod::Lexical, None),
                    None => continue,
                }
            } else {
                let lex = sides.lexical_norm.unwrap_or(0.0);
                let vec = sides.vector_norm.unwrap_or(0.0);
                let method = match (sides.lexical_norm, sides.vector_norm) {
                    (Some(_), Some(_)) => MatchMethod::Hybrid,
                    (Some(_), None) => MatchMethod::Lexical,
                    _ => MatchMethod::Vector,
                };
                (
                    weight * vec + (1.0 - weight) * lex,
                    method,
                    sides.similarity,
                )
            };

            let matched_terms = matched_by_chunk.get(&chunk_id).cloned();
            let snippet = if request.include_content {
                Some(build_snippet(
                    &candidate.content,
                    candidate.start_line,
                    matched_terms.as_deref().unwrap_or(&[]),
                    snippet_options,
                ))
            } else {
                None
            };

            hits.push(SearchHit {
                path: candidate.file_path.clone(),
                score,
                method,
                matched_terms,
                similarity,
                language: candidate.language.clone(),
                chunk_type: candidate.chunk_type.clone(),
                start_line: candidate.start_line,
                end_line: candidate.end_line,
                snippet,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        hits.truncate(request.limit.max(1) as usize);
        Ok(hits)
    }
}
