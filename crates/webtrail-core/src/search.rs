//! Search engine with lexical, semantic, and hybrid retrieval modes.
//!
//! The engine works entirely through the [`RecordStore`] trait and an
//! optional [`EmbeddingProvider`] for query embedding.
//!
//! # Hybrid Scoring
//!
//! 1. Fetch `2 × limit` lexical candidates.
//! 2. Embed the query and fetch `2 × limit` vector candidates.
//! 3. Reciprocal Rank Fusion: a candidate at 0-indexed rank `r` in a list
//!    gains `1 / (k + r + 1)`; contributions sum across lists.
//! 4. Sort by fused score (desc), capture time (desc), id (asc).
//! 5. Truncate to `limit`.
//!
//! Raw scores from the two methods are never compared, only ranks.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::embedding::EmbeddingProvider;
use crate::error::TrailError;
use crate::models::{SearchFilters, SearchResult};
use crate::store::{sort_hits, tokenize_query, RecordStore};

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Lexical,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Lexical => "lexical",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexical" | "keyword" => Ok(SearchMode::Lexical),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            _ => bail!(
                "Unknown search mode: {}. Use lexical, semantic, or hybrid.",
                s
            ),
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub filters: SearchFilters,
    pub limit: usize,
    pub rrf_k: u32,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, mode: SearchMode, limit: usize) -> Self {
        Self {
            query: query.into(),
            mode,
            filters: SearchFilters::default(),
            limit,
            rrf_k: DEFAULT_RRF_K,
        }
    }
}

/// Run a search against a [`RecordStore`].
///
/// `embedder` is `None` when embeddings are disabled. Semantic mode then
/// fails with [`TrailError::EmbeddingFailure`]; hybrid mode fuses the
/// lexical list alone.
pub async fn search(
    store: &dyn RecordStore,
    embedder: Option<&dyn EmbeddingProvider>,
    req: &SearchRequest,
) -> Result<Vec<SearchResult>> {
    if req.query.trim().is_empty() || req.limit == 0 {
        return Ok(Vec::new());
    }
    let terms = tokenize_query(&req.query);

    match req.mode {
        SearchMode::Lexical => store.lexical_search(&terms, &req.filters, req.limit).await,
        SearchMode::Semantic => {
            let Some(embedder) = embedder else {
                return Err(TrailError::EmbeddingFailure {
                    reason: "semantic search requires an embedding provider".into(),
                }
                .into());
            };
            let qv = embed_query(embedder, &req.query).await?;
            store.vector_search(&qv, &req.filters, req.limit).await
        }
        SearchMode::Hybrid => {
            let candidate_k = req.limit.saturating_mul(2);
            let lexical = store.lexical_search(&terms, &req.filters, candidate_k).await?;
            let mut lists = vec![lexical];
            match embedder {
                Some(embedder) => {
                    let qv = embed_query(embedder, &req.query).await?;
                    lists.push(store.vector_search(&qv, &req.filters, candidate_k).await?);
                }
                None => {
                    tracing::debug!("embeddings disabled; hybrid search uses the lexical list only");
                }
            }
            Ok(rrf_fuse(&lists, req.rrf_k, req.limit))
        }
    }
}

async fn embed_query(embedder: &dyn EmbeddingProvider, query: &str) -> Result<Vec<f32>> {
    let vectors = embedder
        .embed(&[query.to_string()])
        .await
        .map_err(|e| TrailError::EmbeddingFailure {
            reason: e.to_string(),
        })?;
    match vectors.into_iter().next() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(TrailError::EmbeddingFailure {
            reason: "provider returned no vector for the query".into(),
        }
        .into()),
    }
}

/// The RRF contribution of a 0-indexed rank.
pub fn rrf_contribution(rank: usize, k: u32) -> f64 {
    1.0 / (k as f64 + rank as f64 + 1.0)
}

/// Fuse ranked lists with Reciprocal Rank Fusion.
///
/// The fused result carries the RRF score and the snippet from the first
/// list that contained the record, so lexical snippets win in hybrid mode.
pub fn rrf_fuse(lists: &[Vec<SearchResult>], k: u32, limit: usize) -> Vec<SearchResult> {
    let mut fused: HashMap<String, SearchResult> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = rrf_contribution(rank, k);
            fused
                .entry(hit.record.id.clone())
                .and_modify(|existing| existing.score += contribution)
                .or_insert_with(|| SearchResult {
                    record: hit.record.clone(),
                    score: contribution,
                    snippet: hit.snippet.clone(),
                });
        }
    }

    let mut results: Vec<SearchResult> = fused.into_values().collect();
    sort_hits(&mut results);
    results.truncate(limit);
    results
}
