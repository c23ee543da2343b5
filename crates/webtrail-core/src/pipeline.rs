//! Ingestion pipeline: raw queue lines → enriched, deduplicated records.
//!
//! Per line, in order: parse, derive the origin domain and drop blocked
//! ones, classify, extract (falling back to the captured text), sanitize,
//! fingerprint and drop duplicates, then build the record. All retained
//! records are embedded before any is persisted, and persistence happens
//! in bounded batches.
//!
//! The pipeline never touches the queue or archive files. It returns the
//! raw lines that should be archived; the caller clears the queue only
//! after this function returns `Ok`.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;

use crate::blocklist::{origin_domain, BlockedDomainSet};
use crate::classify::Classifier;
use crate::embedding::{embed_records, BatchOptions, EmbeddingProvider};
use crate::error::TrailError;
use crate::extract::{Extraction, ExtractorRegistry};
use crate::models::{fingerprint, EnrichedRecord, RawRecord};
use crate::sanitize::Sanitizer;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub batch: BatchOptions,
    /// Records per store transaction.
    pub commit_batch_size: usize,
    /// Process and report without embedding or persisting.
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch: BatchOptions::default(),
            commit_batch_size: 200,
            dry_run: false,
        }
    }
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IngestReport {
    /// Non-blank lines read.
    pub lines: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub blocked: usize,
    pub parse_failures: usize,
    pub extraction_fallbacks: usize,
    pub redacted: usize,
    pub embed_failures: usize,
    /// True when some records were persisted without a vector because
    /// the embedding provider failed.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct IngestOutput {
    pub report: IngestReport,
    /// Raw lines to append to the archive: everything except malformed
    /// and blocked lines, verbatim and in queue order.
    pub archive_lines: Vec<String>,
    /// Records built this run (persisted unless `dry_run`).
    pub records: Vec<EnrichedRecord>,
}

/// Per-record outcome of the synchronous stages.
enum Staged {
    Blocked,
    Ready {
        record: EnrichedRecord,
        fallback: bool,
    },
}

/// Classifier, sanitizer, and extractor table applied to each raw record.
#[derive(Clone, Default)]
pub struct Pipeline {
    classifier: Classifier,
    sanitizer: Sanitizer,
    extractors: ExtractorRegistry,
}

impl Pipeline {
    pub fn new(extractors: ExtractorRegistry) -> Self {
        Self {
            classifier: Classifier::new(),
            sanitizer: Sanitizer::new(),
            extractors,
        }
    }

    /// Blocklist check, classification, extraction, and sanitization for
    /// one raw record. Deduplication needs the store and happens in
    /// [`Pipeline::run`].
    fn stage(&self, raw: &RawRecord, blocked: &BlockedDomainSet, now: i64) -> Result<Staged> {
        let Some(domain) = origin_domain(&raw.url) else {
            return Err(TrailError::MalformedInput {
                reason: format!("no host in url '{}'", raw.url),
            }
            .into());
        };
        if let Some(entry) = blocked.blocking_entry(&domain) {
            tracing::info!(domain = %domain, entry = %entry, "skipping blocked domain");
            return Ok(Staged::Blocked);
        }

        let category = self.classifier.classify(&raw.url);
        let extractor = self.extractors.resolve(category);
        let (extraction, fallback) = match extractor.extract(raw) {
            Ok(ex) => (ex, false),
            Err(e) => {
                let err = TrailError::ExtractionFailure {
                    category: category.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(url = %raw.url, extractor = extractor.name(), error = %err, "extractor failed; using captured text");
                (Extraction::text_only(raw.text.trim()), true)
            }
        };

        let text = self.sanitizer.sanitize(&extraction.text);
        let title = self.sanitizer.sanitize(raw.title.trim());
        let redacted = text.redacted || title.redacted;

        let received_at = raw.received_at.unwrap_or(now);
        let record = EnrichedRecord {
            id: uuid::Uuid::new_v4().to_string(),
            url: raw.url.trim().to_string(),
            domain,
            title: title.text,
            captured_at: raw.timestamp.unwrap_or(received_at),
            received_at,
            category,
            fingerprint: fingerprint(&text.text),
            text: text.text,
            summary: None,
            metadata: serde_json::Value::Object(extraction.metadata),
            images: raw.images.clone(),
            sensitive: redacted || category.is_personal(),
            redacted,
            embedding: None,
        };
        Ok(Staged::Ready { record, fallback })
    }

    /// Process one run's worth of queue lines.
    ///
    /// Fails with [`TrailError::StoreUnavailable`] if the store cannot be
    /// read or written; nothing should be archived or cleared then.
    pub async fn run(
        &self,
        store: &dyn RecordStore,
        embedder: Option<&dyn EmbeddingProvider>,
        blocked: &BlockedDomainSet,
        lines: &[String],
        opts: &PipelineOptions,
    ) -> Result<IngestOutput> {
        let now = chrono::Utc::now().timestamp();
        let mut report = IngestReport::default();
        let mut archive_lines = Vec::new();
        let mut records: Vec<EnrichedRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for line in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            report.lines += 1;

            let staged = RawRecord::from_json_line(trimmed)
                .and_then(|raw| self.stage(&raw, blocked, now));
            let (record, fallback) = match staged {
                Ok(Staged::Ready { record, fallback }) => (record, fallback),
                Ok(Staged::Blocked) => {
                    report.blocked += 1;
                    continue;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed queue line");
                    report.parse_failures += 1;
                    continue;
                }
            };
            archive_lines.push(trimmed.to_string());
            if fallback {
                report.extraction_fallbacks += 1;
            }

            let duplicate = seen.contains(&record.fingerprint)
                || store
                    .exists_by_fingerprint(&record.fingerprint)
                    .await
                    .map_err(store_unavailable)?;
            if duplicate {
                let err = TrailError::DuplicateContent {
                    fingerprint: record.fingerprint.clone(),
                };
                tracing::debug!(url = %record.url, "{}", err);
                report.duplicates += 1;
                continue;
            }
            seen.insert(record.fingerprint.clone());
            if record.redacted {
                report.redacted += 1;
            }
            records.push(record);
        }

        if opts.dry_run {
            report.ingested = records.len();
            return Ok(IngestOutput {
                report,
                archive_lines,
                records,
            });
        }

        if let Some(embedder) = embedder {
            let outcome = embed_records(embedder, &mut records, &opts.batch).await;
            if outcome.is_degraded() {
                report.embed_failures = outcome.failed;
                report.degraded = true;
                tracing::warn!(
                    failed = outcome.failed,
                    sub_batches = outcome.failures.len(),
                    "embedding degraded; affected records stored without vectors"
                );
            }
        }

        let commit = opts.commit_batch_size.max(1);
        for chunk in records.chunks(commit) {
            let result = store.insert_batch(chunk).await.map_err(store_unavailable)?;
            report.ingested += result.inserted;
            report.duplicates += result.duplicates;
        }

        tracing::info!(
            ingested = report.ingested,
            duplicates = report.duplicates,
            blocked = report.blocked,
            parse_failures = report.parse_failures,
            "ingestion run complete"
        );

        Ok(IngestOutput {
            report,
            archive_lines,
            records,
        })
    }
}

fn store_unavailable(e: anyhow::Error) -> anyhow::Error {
    match e.downcast::<TrailError>() {
        Ok(kind @ TrailError::StoreUnavailable { .. }) => kind.into(),
        Ok(other) => TrailError::StoreUnavailable {
            reason: other.to_string(),
        }
        .into(),
        Err(e) => TrailError::StoreUnavailable {
            reason: format!("{:#}", e),
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use crate::store::memory::InMemoryStore;

    fn line(url: &str, text: &str) -> String {
        serde_json::json!({"url": url, "title": "t", "text": text, "timestamp": 1_700_000_000}).to_string()
    }

    #[tokio::test]
    async fn test_staging_sets_flags() {
        let store = InMemoryStore::new();
        let out = Pipeline::default()
            .run(
                &store,
                None,
                &BlockedDomainSet::new(),
                &[line("https://app.slack.com/client/T1/C1", "password: abc123")],
                &PipelineOptions::default(),
            )
            .await
            .unwrap();
        let r = &out.records[0];
        assert_eq!(r.category, Category::Chat);
        assert!(r.redacted);
        assert!(r.sensitive);
        assert_eq!(r.domain, "app.slack.com");
        assert_eq!(r.captured_at, 1_700_000_000);
        assert_eq!(out.report.redacted, 1);
    }

    #[tokio::test]
    async fn test_blank_lines_ignored_and_hostless_urls_malformed() {
        let store = InMemoryStore::new();
        let lines = vec![
            String::new(),
            "   ".to_string(),
            line("about:blank", "x"),
            line("https://example.com", "fine"),
        ];
        let out = Pipeline::default()
            .run(&store, None, &BlockedDomainSet::new(), &lines, &PipelineOptions::default())
            .await
            .unwrap();
        assert_eq!(out.report.lines, 2);
        assert_eq!(out.report.parse_failures, 1);
        assert_eq!(out.report.ingested, 1);
        assert_eq!(out.archive_lines.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_counts_as_parse_failure() {
        let store = InMemoryStore::new();
        let lines = vec![
            r#"{"url":"https://a.com","text":"x","timestamp":-9223372036854775808}"#.to_string(),
            line("https://b.com", "fine"),
        ];
        let out = Pipeline::default()
            .run(&store, None, &BlockedDomainSet::new(), &lines, &PipelineOptions::default())
            .await
            .unwrap();
        assert_eq!(out.report.parse_failures, 1);
        assert_eq!(out.report.ingested, 1);
        assert_eq!(out.archive_lines, vec![line("https://b.com", "fine")]);
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let store = InMemoryStore::new();
        let opts = PipelineOptions {
            dry_run: true,
            ..Default::default()
        };
        let out = Pipeline::default()
            .run(&store, None, &BlockedDomainSet::new(), &[line("https://a.com", "x")], &opts)
            .await
            .unwrap();
        assert_eq!(out.report.ingested, 1);
        assert_eq!(store.stats().await.unwrap().records, 0);
    }
}
