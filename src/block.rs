//! `trail block`: manage the domain blocklist.
//!
//! Blocking affects future ingestion only, unless `--purge` also deletes
//! the records already stored for the domain and its subdomains.

use anyhow::{bail, Result};

use webtrail_core::blocklist::normalize_domain;
use webtrail_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_block_add(config: &Config, domain: &str, purge: bool) -> Result<()> {
    let Some(normalized) = normalize_domain(domain) else {
        bail!("Invalid domain: '{}'", domain);
    };
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let added = store.add_blocked_domain(&normalized).await?;
    if added {
        println!("blocked {}", normalized);
    } else {
        println!("{} already blocked", normalized);
    }

    if purge {
        let removed = store.delete_by_domain(&normalized).await?;
        tracing::info!(domain = %normalized, removed, "purged blocked domain");
        println!("  purged records: {}", removed);
    }

    pool.close().await;
    Ok(())
}

pub async fn run_block_remove(config: &Config, domain: &str) -> Result<()> {
    let Some(normalized) = normalize_domain(domain) else {
        bail!("Invalid domain: '{}'", domain);
    };
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let removed = store.remove_blocked_domain(&normalized).await?;
    pool.close().await;

    if !removed {
        bail!("{} is not blocked", normalized);
    }
    println!("unblocked {}", normalized);
    Ok(())
}

pub async fn run_block_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let domains = store.list_blocked_domains().await?;
    pool.close().await;

    if domains.is_empty() {
        println!("No blocked domains.");
        return Ok(());
    }
    for d in domains {
        println!("{}", d);
    }
    Ok(())
}
