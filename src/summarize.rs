//! `trail summarize`: short generated summaries for stored records.
//!
//! Summaries are written back through the store, which also adds them to
//! the lexical index.

use anyhow::{bail, Result};

use webtrail_core::completion::CompletionProvider;
use webtrail_core::embedding::truncate_chars;
use webtrail_core::models::EnrichedRecord;
use webtrail_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::llm;
use crate::sqlite_store::SqliteStore;

const DEFAULT_LIMIT: usize = 50;

const SUMMARY_TEMPLATE: &str = "Summarize the following page from the user's browsing history \
in at most two sentences. Use only the text provided. Reply with the summary only.\n\n\
Title: {title}\nSite: {domain}\n\n{text}\n";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SummarizeReport {
    pub pending: usize,
    pub summarized: usize,
    pub failed: usize,
}

fn summary_prompt(record: &EnrichedRecord, max_chars: usize) -> String {
    SUMMARY_TEMPLATE
        .replace("{title}", &record.title)
        .replace("{domain}", &record.domain)
        .replace("{text}", truncate_chars(&record.text, max_chars))
}

/// Summarize up to `limit` records lacking a summary. A failed completion
/// is logged and counted; the record stays pending for the next run.
pub async fn summarize_pending(
    store: &dyn RecordStore,
    completer: &dyn CompletionProvider,
    limit: usize,
    max_chars: usize,
) -> Result<SummarizeReport> {
    let records = store.records_missing_summary(limit).await?;
    let mut report = SummarizeReport {
        pending: records.len(),
        ..Default::default()
    };

    for record in &records {
        if record.text.trim().is_empty() {
            continue;
        }
        match completer.complete(&summary_prompt(record, max_chars)).await {
            Ok(summary) if !summary.trim().is_empty() => {
                store.set_summary(&record.id, summary.trim()).await?;
                report.summarized += 1;
            }
            Ok(_) => {
                tracing::warn!(id = %record.id, "completion returned an empty summary");
                report.failed += 1;
            }
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "summary failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

pub async fn run_summarize(config: &Config, limit: Option<usize>) -> Result<()> {
    let Some(completer) = llm::create_completer(&config.llm)? else {
        bail!("summarize requires a completion provider. Set [llm] provider in config.");
    };
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let report = summarize_pending(
        &store,
        completer.as_ref(),
        limit.unwrap_or(DEFAULT_LIMIT),
        config.ask.max_chars_per_item,
    )
    .await?;

    println!("summarize");
    println!("  pending: {}", report.pending);
    println!("  summarized: {}", report.summarized);
    println!("  failed: {}", report.failed);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use webtrail_core::models::{fingerprint, Category, SearchFilters};
    use webtrail_core::store::memory::InMemoryStore;
    use webtrail_core::store::tokenize_query;

    struct Echo;

    #[async_trait]
    impl CompletionProvider for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.contains("explode") {
                return Err(anyhow!("model overloaded"));
            }
            Ok(" Quarterly zebra report. ".to_string())
        }
    }

    fn record(id: &str, text: &str) -> EnrichedRecord {
        EnrichedRecord {
            id: id.into(),
            url: format!("https://example.com/{}", id),
            domain: "example.com".into(),
            title: "Report".into(),
            captured_at: 1_700_000_000,
            received_at: 1_700_000_000,
            category: Category::Article,
            text: text.into(),
            summary: None,
            metadata: serde_json::json!({}),
            images: vec![],
            sensitive: false,
            redacted: false,
            fingerprint: fingerprint(text),
            embedding: None,
        }
    }

    #[tokio::test]
    async fn test_summaries_stored_and_searchable() {
        let store = InMemoryStore::new();
        store.insert(&record("a", "numbers for the quarter")).await.unwrap();
        store.insert(&record("b", "please explode")).await.unwrap();

        let report = summarize_pending(&store, &Echo, 10, 500).await.unwrap();
        assert_eq!(report, SummarizeReport { pending: 2, summarized: 1, failed: 1 });

        let a = store.get_record("a").await.unwrap().unwrap();
        assert_eq!(a.summary.as_deref(), Some("Quarterly zebra report."));

        let hits = store
            .lexical_search(&tokenize_query("zebra"), &SearchFilters::default(), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "a");

        let remaining = store.records_missing_summary(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_summary_prompt_truncates() {
        let r = record("a", &"x".repeat(100));
        let prompt = summary_prompt(&r, 10);
        assert!(prompt.contains(&"x".repeat(10)));
        assert!(!prompt.contains(&"x".repeat(11)));
    }
}
