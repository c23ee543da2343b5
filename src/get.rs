//! Record retrieval and deletion by ID.
//!
//! `trail get` and `GET /records/{id}` share [`RecordResponse`];
//! `trail forget` removes a record from the table and both indexes.

use anyhow::{bail, Result};
use serde::Serialize;

use webtrail_core::models::{format_ts_iso, Category, EnrichedRecord};
use webtrail_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// A stored record as shown to users. The vector itself is omitted.
#[derive(Debug, Clone, Serialize)]
pub struct RecordResponse {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub category: Category,
    pub captured_at: String, // ISO8601
    pub received_at: String, // ISO8601
    pub text: String,
    pub summary: Option<String>,
    pub metadata: serde_json::Value,
    pub images: Vec<String>,
    pub sensitive: bool,
    pub redacted: bool,
    pub fingerprint: String,
    pub embedded: bool,
}

impl From<EnrichedRecord> for RecordResponse {
    fn from(r: EnrichedRecord) -> Self {
        let embedded = r.has_embedding();
        Self {
            captured_at: format_ts_iso(r.captured_at),
            received_at: format_ts_iso(r.received_at),
            id: r.id,
            url: r.url,
            domain: r.domain,
            title: r.title,
            category: r.category,
            text: r.text,
            summary: r.summary,
            metadata: r.metadata,
            images: r.images,
            sensitive: r.sensitive,
            redacted: r.redacted,
            fingerprint: r.fingerprint,
            embedded,
        }
    }
}

/// Core get function (used by CLI and server). `None` when absent.
pub async fn get_record(store: &dyn RecordStore, id: &str) -> Result<Option<RecordResponse>> {
    Ok(store.get_record(id).await?.map(RecordResponse::from))
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let Some(rec) = get_record(&store, id).await? else {
        pool.close().await;
        bail!("Record not found: {}", id);
    };

    println!("--- Record ---");
    println!("id:           {}", rec.id);
    println!(
        "title:        {}",
        if rec.title.is_empty() { "(untitled)" } else { &rec.title }
    );
    println!("url:          {}", rec.url);
    println!("domain:       {}", rec.domain);
    println!("category:     {}", rec.category);
    println!("captured_at:  {}", rec.captured_at);
    println!("received_at:  {}", rec.received_at);
    println!("sensitive:    {}", rec.sensitive);
    println!("redacted:     {}", rec.redacted);
    println!("embedded:     {}", rec.embedded);
    println!("images:       {}", rec.images.len());
    println!("metadata:     {}", rec.metadata);
    println!();

    if let Some(ref summary) = rec.summary {
        println!("--- Summary ---");
        println!("{}", summary);
        println!();
    }

    println!("--- Text ---");
    println!("{}", rec.text);

    pool.close().await;
    Ok(())
}

pub async fn run_forget(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let deleted = store.delete(id).await?;
    pool.close().await;

    if !deleted {
        bail!("Record not found: {}", id);
    }
    tracing::info!(id, "record forgotten");
    println!("forgot {}", id);
    Ok(())
}
