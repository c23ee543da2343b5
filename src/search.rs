//! `trail search`: filter parsing, the query deadline, and result printing.
//!
//! Ranking lives in `webtrail_core::search`; this module builds the
//! request from CLI or HTTP input and enforces the caller's timeout.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};

use webtrail_core::blocklist::normalize_domain;
use webtrail_core::embedding::EmbeddingProvider;
use webtrail_core::error::TrailError;
use webtrail_core::models::{format_ts_iso, parse_timestamp, Category, SearchFilters, SearchResult};
use webtrail_core::search::{search, SearchMode, SearchRequest};
use webtrail_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Raw filter input as it arrives from flags or a JSON body.
#[derive(Debug, Clone, Default)]
pub struct FilterArgs {
    pub categories: Vec<String>,
    pub domains: Vec<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl FilterArgs {
    /// Validate and normalize into [`SearchFilters`].
    pub fn build(&self) -> Result<SearchFilters> {
        let categories = self
            .categories
            .iter()
            .map(|c| c.parse::<Category>())
            .collect::<Result<Vec<_>>>()?;

        let mut domains = Vec::with_capacity(self.domains.len());
        for d in &self.domains {
            match normalize_domain(d) {
                Some(n) => domains.push(n),
                None => bail!("Invalid domain filter: '{}'", d),
            }
        }

        let since = self.since.as_deref().map(parse_timestamp).transpose()?;
        let until = self.until.as_deref().map(parse_timestamp).transpose()?;
        if let (Some(s), Some(u)) = (since, until) {
            if s >= u {
                bail!("--since must be earlier than --until");
            }
        }

        Ok(SearchFilters {
            categories,
            domains,
            since,
            until,
        })
    }
}

/// Run `fut` under a deadline, mapping expiry to [`TrailError::Timeout`].
pub async fn with_timeout<T, F>(seconds: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
        Ok(result) => result,
        Err(_) => Err(TrailError::Timeout { seconds }.into()),
    }
}

/// Core search under a deadline. Used by the CLI and the HTTP server.
pub async fn search_records(
    store: &dyn RecordStore,
    embedder: Option<&dyn EmbeddingProvider>,
    req: &SearchRequest,
    timeout_secs: u64,
) -> Result<Vec<SearchResult>> {
    with_timeout(timeout_secs, search(store, embedder, req)).await
}

pub struct SearchArgs {
    pub query: String,
    pub mode: SearchMode,
    pub limit: Option<usize>,
    pub filters: FilterArgs,
    pub timeout_secs: Option<u64>,
}

pub async fn run_search(config: &Config, args: SearchArgs) -> Result<()> {
    let filters = args.filters.build()?;
    let limit = args.limit.unwrap_or(config.retrieval.final_limit);
    if limit == 0 {
        bail!("--limit must be >= 1");
    }

    let embedder = embedding::create_provider(&config.embedding)?;
    if args.mode == SearchMode::Semantic && embedder.is_none() {
        bail!("Semantic search requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let req = SearchRequest {
        query: args.query,
        mode: args.mode,
        filters,
        limit,
        rrf_k: config.retrieval.rrf_k,
    };
    let timeout = args.timeout_secs.unwrap_or(config.retrieval.timeout_secs);
    let results = search_records(&store, embedder.as_deref(), &req, timeout).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let r = &result.record;
        let title = if r.title.is_empty() { "(untitled)" } else { &r.title };
        println!("{}. [{:.4}] {} / {}", i + 1, result.score, r.category, title);
        println!("    captured: {}", format_ts_iso(r.captured_at));
        println!("    url: {}", r.url);
        if !result.snippet.is_empty() {
            println!(
                "    excerpt: \"{}\"",
                result.snippet.replace('\n', " ").trim()
            );
        }
        println!("    id: {}", r.id);
        println!();
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_args_normalize() {
        let args = FilterArgs {
            categories: vec!["Email".into(), "chat".into()],
            domains: vec!["https://www.Example.com/path".into()],
            since: Some("2024-03-01".into()),
            until: Some("2024-04-01T00:00:00Z".into()),
        };
        let f = args.build().unwrap();
        assert_eq!(f.categories, vec![Category::Email, Category::Chat]);
        assert_eq!(f.domains, vec!["example.com".to_string()]);
        assert_eq!(f.since, Some(1_709_251_200));
        assert_eq!(f.until, Some(1_711_929_600));
    }

    #[test]
    fn test_filter_args_reject_bad_input() {
        let bad_category = FilterArgs {
            categories: vec!["recipes".into()],
            ..Default::default()
        };
        assert!(bad_category.build().is_err());

        let inverted = FilterArgs {
            since: Some("2024-04-01".into()),
            until: Some("2024-03-01".into()),
            ..Default::default()
        };
        assert!(inverted.build().is_err());
    }

    #[tokio::test]
    async fn test_with_timeout_maps_to_timeout_kind() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, anyhow::Error>(())
        };
        let err = with_timeout(0, slow).await.unwrap_err();
        assert!(matches!(
            webtrail_core::error::kind_of(&err),
            Some(TrailError::Timeout { seconds: 0 })
        ));
    }
}
