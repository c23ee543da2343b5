//! Answer orchestration over hybrid retrieval.
//!
//! `ask` retrieves a bounded set of records, formats them into a context
//! block, and asks the completion provider to answer from that context
//! alone. The returned sources are exactly the records placed in the
//! context, in the same order.

use anyhow::Result;
use serde::Serialize;

use crate::completion::CompletionProvider;
use crate::embedding::{truncate_chars, EmbeddingProvider};
use crate::error::TrailError;
use crate::models::{format_ts_iso, Category, EnrichedRecord, SearchFilters};
use crate::search::{search, SearchMode, SearchRequest, DEFAULT_RRF_K};
use crate::store::RecordStore;

/// Answer returned when retrieval finds nothing.
pub const NOT_FOUND_ANSWER: &str =
    "I couldn't find anything in your browsing history related to that question.";

const PROMPT_TEMPLATE: &str = "You answer questions about the user's own browsing history.\n\
Use ONLY the context below. If the context does not contain the answer, say you don't know.\n\
Cite sources by their bracketed number, e.g. [2].\n\n\
Context:\n{context}\n\
Question: {question}\n\
Answer:";

#[derive(Debug, Clone)]
pub struct AskOptions {
    pub result_limit: usize,
    pub max_chars_per_item: usize,
    pub rrf_k: u32,
    pub filters: SearchFilters,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            result_limit: 10,
            max_chars_per_item: 1500,
            rrf_k: DEFAULT_RRF_K,
            filters: SearchFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub category: Category,
    pub title: String,
    pub url: String,
    pub captured_at: String,
}

impl Source {
    fn from_record(r: &EnrichedRecord) -> Self {
        Self {
            id: r.id.clone(),
            category: r.category,
            title: r.title.clone(),
            url: r.url.clone(),
            captured_at: format_ts_iso(r.captured_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    /// False when retrieval returned nothing and the fixed answer was used.
    pub found: bool,
}

impl Answer {
    pub fn not_found() -> Self {
        Self {
            answer: NOT_FOUND_ANSWER.to_string(),
            sources: Vec::new(),
            found: false,
        }
    }
}

/// Format records into the numbered context block.
pub fn build_context(records: &[EnrichedRecord], max_chars_per_item: usize) -> String {
    let mut out = String::new();
    for (i, r) in records.iter().enumerate() {
        let body = match r.summary.as_deref() {
            Some(s) if !s.trim().is_empty() => format!("Summary: {}\n{}", s.trim(), r.text),
            _ => r.text.clone(),
        };
        out.push_str(&format!(
            "[{}] ({}, {}, {}) {}\n{}\n\n",
            i + 1,
            r.category,
            format_ts_iso(r.captured_at),
            r.domain,
            r.title,
            truncate_chars(&body, max_chars_per_item)
        ));
    }
    out
}

pub fn build_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question.trim())
}

/// Answer a question from stored records.
///
/// No retrieval hits yields [`Answer::not_found`], not an error. Completion
/// failures surface as [`TrailError::CompletionFailure`].
pub async fn ask(
    store: &dyn RecordStore,
    embedder: Option<&dyn EmbeddingProvider>,
    completer: &dyn CompletionProvider,
    question: &str,
    opts: &AskOptions,
) -> Result<Answer> {
    let req = SearchRequest {
        query: question.to_string(),
        mode: SearchMode::Hybrid,
        filters: opts.filters.clone(),
        limit: opts.result_limit,
        rrf_k: opts.rrf_k,
    };
    let hits = search(store, embedder, &req).await?;

    let mut records = Vec::with_capacity(hits.len());
    for hit in &hits {
        // A record deleted between search and fetch is skipped.
        if let Some(r) = store.get_record(&hit.record.id).await? {
            records.push(r);
        }
    }
    if records.is_empty() {
        return Ok(Answer::not_found());
    }

    let context = build_context(&records, opts.max_chars_per_item);
    let prompt = build_prompt(&context, question);
    tracing::debug!(items = records.len(), prompt_chars = prompt.len(), "sending ask prompt");

    let answer = completer
        .complete(&prompt)
        .await
        .map_err(|e| TrailError::CompletionFailure {
            reason: e.to_string(),
        })?;

    Ok(Answer {
        answer: answer.trim().to_string(),
        sources: records.iter().map(Source::from_record).collect(),
        found: true,
    })
}
