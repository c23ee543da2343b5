//! Storage abstraction for Webtrail.
//!
//! The [`RecordStore`] trait owns enriched records together with their
//! lexical and vector indexes. Implementations keep all three in step:
//! inserts and deletes touch the primary table and both indexes in one
//! unit of work, so a search never returns a record that `get_record`
//! cannot find.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{EnrichedRecord, SearchFilters, SearchResult};

/// Result of [`RecordStore::insert_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchInsert {
    pub inserted: usize,
    /// Records skipped because their fingerprint was already stored.
    pub duplicates: usize,
}

/// Aggregate counts reported by `trail stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub records: u64,
    pub embedded: u64,
    pub summarized: u64,
    pub sensitive: u64,
    pub blocked_domains: u64,
    pub by_category: BTreeMap<String, u64>,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

/// Abstract record store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](RecordStore::insert) | Persist one record; duplicate fingerprints fail |
/// | [`insert_batch`](RecordStore::insert_batch) | Persist many in one transaction; duplicates counted |
/// | [`lexical_search`](RecordStore::lexical_search) | BM25-style ranking over title, text, summary |
/// | [`vector_search`](RecordStore::vector_search) | Cosine similarity over stored vectors |
/// | [`delete`](RecordStore::delete) | Remove from the table and both indexes |
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a record. Fails with
    /// [`TrailError::DuplicateFingerprint`](crate::error::TrailError::DuplicateFingerprint)
    /// when the fingerprint is already stored.
    async fn insert(&self, record: &EnrichedRecord) -> Result<()>;

    /// Persist records atomically. Duplicates (against the store or earlier
    /// entries of the batch) are skipped and counted.
    async fn insert_batch(&self, records: &[EnrichedRecord]) -> Result<BatchInsert>;

    async fn exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool>;

    async fn get_record(&self, id: &str) -> Result<Option<EnrichedRecord>>;

    /// Delete one record. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete every record whose domain is `domain` or a subdomain of it.
    async fn delete_by_domain(&self, domain: &str) -> Result<u64>;

    async fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<()>;

    async fn set_summary(&self, id: &str, summary: &str) -> Result<()>;

    /// Records without a vector, oldest first.
    async fn records_missing_embedding(&self, limit: usize) -> Result<Vec<EnrichedRecord>>;

    /// Records without a summary, oldest first.
    async fn records_missing_summary(&self, limit: usize) -> Result<Vec<EnrichedRecord>>;

    /// Drop every stored vector. Returns how many were removed.
    async fn clear_embeddings(&self) -> Result<u64>;

    /// Ranked full-text search. `terms` come from [`tokenize_query`]; an
    /// empty slice yields no results.
    async fn lexical_search(
        &self,
        terms: &[String],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    async fn vector_search(
        &self,
        query_vec: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    async fn list_blocked_domains(&self) -> Result<Vec<String>>;

    /// Returns `false` if the domain was already blocked.
    async fn add_blocked_domain(&self, domain: &str) -> Result<bool>;

    /// Returns `false` if the domain was not blocked.
    async fn remove_blocked_domain(&self, domain: &str) -> Result<bool>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Split a free-text query into lowercase alphanumeric terms.
///
/// ```rust
/// use webtrail_core::store::tokenize_query;
///
/// assert_eq!(tokenize_query("Q3 Invoice, ACME-corp!"), vec!["q3", "invoice", "acme", "corp"]);
/// ```
pub fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Order hits by descending score, then newest capture, then id.
pub fn sort_hits(hits: &mut [SearchResult]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.captured_at.cmp(&a.record.captured_at))
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
}
