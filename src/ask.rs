//! `trail ask`: grounded answers over the archive.

use anyhow::{bail, Result};

use webtrail_core::completion::CompletionProvider;
use webtrail_core::embedding::EmbeddingProvider;
use webtrail_core::rag::{ask, Answer, AskOptions};
use webtrail_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::llm;
use crate::search::{with_timeout, FilterArgs};
use crate::sqlite_store::SqliteStore;

/// Build [`AskOptions`] from config, an optional result limit, and filters.
pub fn ask_options(config: &Config, limit: Option<usize>, filters: &FilterArgs) -> Result<AskOptions> {
    let result_limit = limit.unwrap_or(config.ask.result_limit);
    if result_limit == 0 {
        bail!("--limit must be >= 1");
    }
    Ok(AskOptions {
        result_limit,
        max_chars_per_item: config.ask.max_chars_per_item,
        rrf_k: config.retrieval.rrf_k,
        filters: filters.build()?,
    })
}

/// Core ask under a deadline. Used by the CLI and the HTTP server.
pub async fn answer_question(
    store: &dyn RecordStore,
    embedder: Option<&dyn EmbeddingProvider>,
    completer: &dyn CompletionProvider,
    question: &str,
    opts: &AskOptions,
    timeout_secs: u64,
) -> Result<Answer> {
    with_timeout(timeout_secs, ask(store, embedder, completer, question, opts)).await
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    limit: Option<usize>,
    filters: FilterArgs,
    timeout_secs: Option<u64>,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("Question must not be empty");
    }
    let opts = ask_options(config, limit, &filters)?;
    let Some(completer) = llm::create_completer(&config.llm)? else {
        bail!("ask requires a completion provider. Set [llm] provider in config.");
    };
    let embedder = embedding::create_provider(&config.embedding)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let timeout = timeout_secs.unwrap_or(config.retrieval.timeout_secs);
    let answer = answer_question(
        &store,
        embedder.as_deref(),
        completer.as_ref(),
        question,
        &opts,
        timeout,
    )
    .await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, s) in answer.sources.iter().enumerate() {
            let title = if s.title.is_empty() { "(untitled)" } else { &s.title };
            println!("  [{}] {} / {} ({})", i + 1, s.category, title, s.captured_at);
            println!("      {}", s.url);
            println!("      id: {}", s.id);
        }
    }

    pool.close().await;
    Ok(())
}
