//! In-memory [`RecordStore`] for tests and embedding in other hosts.
//!
//! All state sits behind one `RwLock`, so every mutation updates the
//! record map, the term index, and the vector map together. Lexical
//! ranking is BM25 over title, text, and summary tokens; vector search is
//! brute-force cosine similarity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::blocklist::{is_same_or_subdomain, normalize_domain, BlockedDomainSet};
use crate::embedding::cosine_similarity;
use crate::error::TrailError;
use crate::models::{EnrichedRecord, SearchFilters, SearchResult};

use super::{sort_hits, tokenize_query, BatchInsert, RecordStore, StoreStats};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;
const TITLE_WEIGHT: f64 = 2.0;
const SNIPPET_CHARS: usize = 240;

/// Token frequencies for one record, title counted separately.
struct TermIndex {
    title: HashMap<String, usize>,
    body: HashMap<String, usize>,
    len: usize,
}

impl TermIndex {
    fn build(record: &EnrichedRecord) -> Self {
        let mut title = HashMap::new();
        let mut body = HashMap::new();
        let mut len = 0;
        for t in tokenize_query(&record.title) {
            *title.entry(t).or_insert(0) += 1;
            len += 1;
        }
        let summary = record.summary.as_deref().unwrap_or("");
        for t in tokenize_query(&record.text).into_iter().chain(tokenize_query(summary)) {
            *body.entry(t).or_insert(0) += 1;
            len += 1;
        }
        Self { title, body, len }
    }

    fn weighted_tf(&self, term: &str) -> f64 {
        let t = self.title.get(term).copied().unwrap_or(0) as f64;
        let b = self.body.get(term).copied().unwrap_or(0) as f64;
        TITLE_WEIGHT * t + b
    }
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, EnrichedRecord>,
    by_fingerprint: HashMap<String, String>,
    terms: HashMap<String, TermIndex>,
    vectors: HashMap<String, Vec<f32>>,
    blocked: BlockedDomainSet,
}

impl Inner {
    fn insert(&mut self, record: &EnrichedRecord) {
        let mut stored = record.clone();
        if let Some(v) = stored.embedding.take().filter(|v| !v.is_empty()) {
            self.vectors.insert(stored.id.clone(), v);
        }
        self.by_fingerprint
            .insert(stored.fingerprint.clone(), stored.id.clone());
        self.terms.insert(stored.id.clone(), TermIndex::build(&stored));
        self.records.insert(stored.id.clone(), stored);
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.records.remove(id) {
            Some(r) => {
                self.by_fingerprint.remove(&r.fingerprint);
                self.terms.remove(id);
                self.vectors.remove(id);
                true
            }
            None => false,
        }
    }

    fn hydrate(&self, record: &EnrichedRecord) -> EnrichedRecord {
        let mut out = record.clone();
        out.embedding = self.vectors.get(&record.id).cloned();
        out
    }
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!(TrailError::StoreUnavailable {
                reason: "in-memory store lock poisoned".into()
            }))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!(TrailError::StoreUnavailable {
                reason: "in-memory store lock poisoned".into()
            }))
    }
}

fn snippet_for(record: &EnrichedRecord, terms: &[String]) -> String {
    let lower = record.text.to_lowercase();
    let hit = terms.iter().filter_map(|t| lower.find(t.as_str())).min();
    let start_char = match hit {
        // Byte offsets in the lowercased text only approximate the
        // original, so convert through char counts.
        Some(byte) => lower[..byte].chars().count().saturating_sub(SNIPPET_CHARS / 4),
        None => 0,
    };
    let snippet: String = record
        .text
        .chars()
        .skip(start_char)
        .take(SNIPPET_CHARS)
        .collect();
    if snippet.is_empty() {
        record.title.clone()
    } else {
        snippet
    }
}

fn missing<F>(inner: &Inner, limit: usize, pred: F) -> Vec<EnrichedRecord>
where
    F: Fn(&EnrichedRecord) -> bool,
{
    let mut out: Vec<&EnrichedRecord> = inner.records.values().filter(|r| pred(r)).collect();
    out.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then_with(|| a.id.cmp(&b.id)));
    out.into_iter().take(limit).map(|r| inner.hydrate(r)).collect()
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, record: &EnrichedRecord) -> Result<()> {
        let mut inner = self.write()?;
        if inner.by_fingerprint.contains_key(&record.fingerprint) {
            return Err(TrailError::DuplicateFingerprint {
                fingerprint: record.fingerprint.clone(),
            }
            .into());
        }
        inner.insert(record);
        Ok(())
    }

    async fn insert_batch(&self, records: &[EnrichedRecord]) -> Result<BatchInsert> {
        let mut inner = self.write()?;
        let mut report = BatchInsert::default();
        for record in records {
            if inner.by_fingerprint.contains_key(&record.fingerprint) {
                report.duplicates += 1;
                continue;
            }
            inner.insert(record);
            report.inserted += 1;
        }
        Ok(report)
    }

    async fn exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.read()?.by_fingerprint.contains_key(fingerprint))
    }

    async fn get_record(&self, id: &str) -> Result<Option<EnrichedRecord>> {
        let inner = self.read()?;
        Ok(inner.records.get(id).map(|r| inner.hydrate(r)))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove(id))
    }

    async fn delete_by_domain(&self, domain: &str) -> Result<u64> {
        let mut inner = self.write()?;
        let ids: Vec<String> = inner
            .records
            .values()
            .filter(|r| is_same_or_subdomain(&r.domain, domain))
            .map(|r| r.id.clone())
            .collect();
        for id in &ids {
            inner.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.records.contains_key(id) {
            bail!("record not found: {}", id);
        }
        inner.vectors.insert(id.to_string(), vector.to_vec());
        Ok(())
    }

    async fn set_summary(&self, id: &str, summary: &str) -> Result<()> {
        let mut inner = self.write()?;
        let updated = match inner.records.get_mut(id) {
            Some(r) => {
                r.summary = Some(summary.to_string());
                TermIndex::build(r)
            }
            None => bail!("record not found: {}", id),
        };
        inner.terms.insert(id.to_string(), updated);
        Ok(())
    }

    async fn records_missing_embedding(&self, limit: usize) -> Result<Vec<EnrichedRecord>> {
        let inner = self.read()?;
        Ok(missing(&inner, limit, |r| !inner.vectors.contains_key(&r.id)))
    }

    async fn records_missing_summary(&self, limit: usize) -> Result<Vec<EnrichedRecord>> {
        let inner = self.read()?;
        Ok(missing(&inner, limit, |r| r.summary.is_none()))
    }

    async fn clear_embeddings(&self) -> Result<u64> {
        let mut inner = self.write()?;
        let n = inner.vectors.len() as u64;
        inner.vectors.clear();
        Ok(n)
    }

    async fn lexical_search(
        &self,
        terms: &[String],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let n = inner.records.len() as f64;
        if n == 0.0 {
            return Ok(Vec::new());
        }
        let avg_len = inner.terms.values().map(|t| t.len).sum::<usize>() as f64 / n;
        let unique: HashSet<&str> = terms.iter().map(String::as_str).collect();

        let idf: HashMap<&str, f64> = unique
            .iter()
            .map(|&term| {
                let df = inner
                    .terms
                    .values()
                    .filter(|t| t.weighted_tf(term) > 0.0)
                    .count() as f64;
                (term, (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let mut hits: Vec<SearchResult> = inner
            .records
            .values()
            .filter(|r| filters.matches(r.category, &r.domain, r.captured_at))
            .filter_map(|r| {
                let index = inner.terms.get(&r.id)?;
                let norm = 1.0 - BM25_B + BM25_B * (index.len as f64 / avg_len.max(1.0));
                let score: f64 = unique
                    .iter()
                    .map(|&term| {
                        let tf = index.weighted_tf(term);
                        if tf == 0.0 {
                            0.0
                        } else {
                            idf[term] * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm)
                        }
                    })
                    .sum();
                (score > 0.0).then(|| SearchResult {
                    record: r.to_ref(),
                    score,
                    snippet: snippet_for(r, terms),
                })
            })
            .collect();

        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        if query_vec.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let mut hits: Vec<SearchResult> = inner
            .vectors
            .iter()
            .filter_map(|(id, v)| {
                let r = inner.records.get(id)?;
                if !filters.matches(r.category, &r.domain, r.captured_at) {
                    return None;
                }
                Some(SearchResult {
                    record: r.to_ref(),
                    score: cosine_similarity(query_vec, v) as f64,
                    snippet: r.text.chars().take(SNIPPET_CHARS).collect(),
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list_blocked_domains(&self) -> Result<Vec<String>> {
        Ok(self.read()?.blocked.iter().map(str::to_string).collect())
    }

    async fn add_blocked_domain(&self, domain: &str) -> Result<bool> {
        if normalize_domain(domain).is_none() {
            bail!("invalid domain: '{}'", domain);
        }
        Ok(self.write()?.blocked.insert(domain))
    }

    async fn remove_blocked_domain(&self, domain: &str) -> Result<bool> {
        Ok(self.write()?.blocked.remove(domain))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        let mut stats = StoreStats {
            records: inner.records.len() as u64,
            embedded: inner.vectors.len() as u64,
            blocked_domains: inner.blocked.len() as u64,
            ..Default::default()
        };
        for r in inner.records.values() {
            *stats
                .by_category
                .entry(r.category.as_str().to_string())
                .or_insert(0) += 1;
            if r.summary.is_some() {
                stats.summarized += 1;
            }
            if r.sensitive {
                stats.sensitive += 1;
            }
            stats.oldest = Some(stats.oldest.map_or(r.captured_at, |o| o.min(r.captured_at)));
            stats.newest = Some(stats.newest.map_or(r.captured_at, |o| o.max(r.captured_at)));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use crate::models::{fingerprint, Category};

    fn record(id: &str, domain: &str, category: Category, captured_at: i64, text: &str) -> EnrichedRecord {
        EnrichedRecord {
            id: id.to_string(),
            url: format!("https://{}/{}", domain, id),
            domain: domain.to_string(),
            title: format!("Title {}", id),
            captured_at,
            received_at: captured_at,
            category,
            text: text.to_string(),
            summary: None,
            metadata: serde_json::json!({}),
            images: vec![],
            sensitive: false,
            redacted: false,
            fingerprint: fingerprint(text),
            embedding: None,
        }
    }

    fn terms(q: &str) -> Vec<String> {
        tokenize_query(q)
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_fingerprint() {
        let store = InMemoryStore::new();
        store
            .insert(&record("a", "x.com", Category::General, 1, "same body"))
            .await
            .unwrap();
        let err = store
            .insert(&record("b", "y.com", Category::General, 2, "same body"))
            .await
            .unwrap_err();
        assert_eq!(kind_of(&err).unwrap().code(), "duplicate_fingerprint");
        assert!(store.exists_by_fingerprint(&fingerprint("same body")).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_batch_counts_duplicates() {
        let store = InMemoryStore::new();
        let batch = vec![
            record("a", "x.com", Category::General, 1, "one"),
            record("b", "x.com", Category::General, 2, "one"),
            record("c", "x.com", Category::General, 3, "two"),
        ];
        let report = store.insert_batch(&batch).await.unwrap();
        assert_eq!(report, BatchInsert { inserted: 2, duplicates: 1 });
    }

    #[tokio::test]
    async fn test_lexical_ranking_and_filters() {
        let store = InMemoryStore::new();
        store
            .insert(&record("a", "billing.acme.com", Category::Email, 100, "invoice invoice due friday"))
            .await
            .unwrap();
        store
            .insert(&record("b", "news.com", Category::Article, 200, "an invoice was mentioned"))
            .await
            .unwrap();
        store
            .insert(&record("c", "news.com", Category::Article, 300, "nothing relevant"))
            .await
            .unwrap();

        let hits = store
            .lexical_search(&terms("invoice"), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "a");
        assert!(hits[0].snippet.contains("invoice"));

        let filtered = store
            .lexical_search(
                &terms("invoice"),
                &SearchFilters {
                    domains: vec!["acme.com".into()],
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].record.id, "a");

        let until = store
            .lexical_search(
                &terms("invoice"),
                &SearchFilters {
                    until: Some(200),
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(until.len(), 1);
        assert_eq!(until[0].record.id, "a");
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let store = InMemoryStore::new();
        let mut near = record("near", "a.com", Category::General, 1, "near");
        near.embedding = Some(vec![1.0, 0.0]);
        let mut far = record("far", "a.com", Category::General, 2, "far");
        far.embedding = Some(vec![0.0, 1.0]);
        store.insert(&far).await.unwrap();
        store.insert(&near).await.unwrap();
        store
            .insert(&record("none", "a.com", Category::General, 3, "none"))
            .await
            .unwrap();

        let hits = store
            .vector_search(&[0.9, 0.1], &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "near");
        assert!(store.get_record("near").await.unwrap().unwrap().has_embedding());
    }

    #[tokio::test]
    async fn test_delete_removes_from_all_indexes() {
        let store = InMemoryStore::new();
        let mut r = record("a", "mail.google.com", Category::Email, 1, "quarterly invoice");
        r.embedding = Some(vec![1.0, 0.0]);
        store.insert(&r).await.unwrap();
        store
            .insert(&record("b", "google.com", Category::Search, 2, "invoice search"))
            .await
            .unwrap();
        store
            .insert(&record("c", "notgoogle.com", Category::General, 3, "invoice elsewhere"))
            .await
            .unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(!store.exists_by_fingerprint(&r.fingerprint).await.unwrap());
        let vec_hits = store
            .vector_search(&[1.0, 0.0], &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert!(vec_hits.is_empty());

        assert_eq!(store.delete_by_domain("google.com").await.unwrap(), 1);
        let hits = store
            .lexical_search(&terms("invoice"), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "c");
    }

    #[tokio::test]
    async fn test_summary_is_indexed() {
        let store = InMemoryStore::new();
        store
            .insert(&record("a", "a.com", Category::General, 1, "plain body"))
            .await
            .unwrap();
        store.set_summary("a", "mentions kubernetes").await.unwrap();
        let hits = store
            .lexical_search(&terms("kubernetes"), &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(store.records_missing_summary(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocklist_and_stats() {
        let store = InMemoryStore::new();
        assert!(store.add_blocked_domain("*.Bank.com").await.unwrap());
        assert!(!store.add_blocked_domain("bank.com").await.unwrap());
        assert!(store.add_blocked_domain("  ").await.is_err());
        assert_eq!(store.list_blocked_domains().await.unwrap(), vec!["bank.com"]);

        let mut r = record("a", "a.com", Category::Chat, 50, "hello");
        r.embedding = Some(vec![1.0]);
        store.insert(&r).await.unwrap();
        store
            .insert(&record("b", "a.com", Category::General, 10, "world"))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.blocked_domains, 1);
        assert_eq!(stats.by_category.get("chat"), Some(&1));
        assert_eq!(stats.oldest, Some(10));
        assert_eq!(stats.newest, Some(50));

        let pending = store.records_missing_embedding(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
        assert_eq!(store.clear_embeddings().await.unwrap(), 1);
        assert!(store.remove_blocked_domain("bank.com").await.unwrap());
    }
}
