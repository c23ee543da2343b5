//! `trail embed pending` and `trail embed rebuild`.
//!
//! Ingestion leaves records unembedded when a sub-batch fails; these
//! commands are the explicit re-submission path.

use anyhow::{bail, Result};

use webtrail_core::embedding::{embed_records, BatchOptions, EmbeddingProvider};
use webtrail_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Counters printed by both subcommands.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedSummary {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Embed up to `limit` records that have no vector and store the results.
pub async fn embed_pending(
    store: &dyn RecordStore,
    provider: &dyn EmbeddingProvider,
    limit: Option<usize>,
    opts: &BatchOptions,
) -> Result<EmbedSummary> {
    let mut records = store
        .records_missing_embedding(limit.unwrap_or(i64::MAX as usize))
        .await?;
    let outcome = embed_records(provider, &mut records, opts).await;

    let mut embedded = 0;
    for record in &records {
        if let Some(vector) = &record.embedding {
            store.set_embedding(&record.id, vector).await?;
            embedded += 1;
        }
    }

    Ok(EmbedSummary {
        pending: records.len(),
        embedded,
        failed: outcome.failed,
    })
}

fn setup(config: &Config, batch_size: Option<usize>) -> Result<(std::sync::Arc<dyn EmbeddingProvider>, BatchOptions)> {
    let Some(provider) = embedding::create_provider(&config.embedding)? else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };
    let batch_size = batch_size.unwrap_or(config.embedding.batch_size);
    if batch_size == 0 {
        bail!("--batch-size must be >= 1");
    }
    let opts = BatchOptions {
        batch_size,
        max_chars: config.embedding.max_chars,
    };
    Ok((provider, opts))
}

pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size: Option<usize>,
) -> Result<()> {
    let (provider, opts) = setup(config, batch_size)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let summary = embed_pending(&store, provider.as_ref(), limit, &opts).await?;

    println!("embed pending");
    if summary.pending == 0 {
        println!("  all records up to date");
    } else {
        println!("  total pending: {}", summary.pending);
        println!("  embedded: {}", summary.embedded);
        println!("  failed: {}", summary.failed);
    }

    pool.close().await;
    Ok(())
}

/// Drop every vector, then embed everything again with the current model.
pub async fn run_embed_rebuild(config: &Config, batch_size: Option<usize>) -> Result<()> {
    let (provider, opts) = setup(config, batch_size)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let cleared = store.clear_embeddings().await?;
    println!("embed rebuild - cleared {} existing embeddings", cleared);

    let summary = embed_pending(&store, provider.as_ref(), None, &opts).await?;
    println!("embed rebuild");
    println!("  model: {}", provider.model_name());
    println!("  total records: {}", summary.pending);
    println!("  embedded: {}", summary.embedded);
    println!("  failed: {}", summary.failed);

    pool.close().await;
    Ok(())
}
