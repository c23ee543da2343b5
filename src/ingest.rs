//! Queue draining for `trail ingest`.
//!
//! Wraps the core pipeline with the file-level concerns it leaves to the
//! application: the run lock on `<db>.ingest.lock`, reading the queue,
//! appending the day's archive file, and clearing the consumed part of the
//! queue. The queue is cleared only after the pipeline has persisted every
//! record, so a failed run is retried in full next time.
//!
//! # Queue lock protocol
//!
//! The capture agent must hold an exclusive advisory lock (`flock`) on the
//! queue file for each append and write whole `\n`-terminated lines.
//! `ingest` takes the same lock while it snapshots the queue and again while
//! it cuts the consumed prefix, which is done in place so appends through an
//! already-open descriptor stay on the same file.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use webtrail_core::blocklist::BlockedDomainSet;
use webtrail_core::embedding::{BatchOptions, EmbeddingProvider};
use webtrail_core::error::TrailError;
use webtrail_core::pipeline::{IngestReport, Pipeline, PipelineOptions};
use webtrail_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::extract::default_registry;
use crate::sqlite_store::SqliteStore;

/// `trail ingest`: drain the queue once and print the run report.
pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let embedder = embedding::create_provider(&config.embedding)?;

    let report = ingest_queue(config, &store, embedder.as_deref(), dry_run).await?;

    println!("ingest{}", if dry_run { " (dry-run)" } else { "" });
    println!("  lines read: {}", report.lines);
    println!("  ingested: {}", report.ingested);
    println!("  duplicates: {}", report.duplicates);
    println!("  blocked: {}", report.blocked);
    println!("  parse failures: {}", report.parse_failures);
    println!("  extraction fallbacks: {}", report.extraction_fallbacks);
    println!("  redacted: {}", report.redacted);
    if config.embedding.is_enabled() && !dry_run {
        println!("  embed failures: {}", report.embed_failures);
    }
    if report.degraded {
        println!("degraded (run `trail embed pending` to retry)");
    } else {
        println!("ok");
    }

    pool.close().await;
    Ok(())
}

/// Run one ingestion pass under the run lock. Fails with
/// [`TrailError::IngestLocked`] if another run holds it.
pub async fn ingest_queue(
    config: &Config,
    store: &dyn RecordStore,
    embedder: Option<&dyn EmbeddingProvider>,
    dry_run: bool,
) -> Result<IngestReport> {
    let lock_path = config.db.ingest_lock_path();
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock.try_write().map_err(|_| TrailError::IngestLocked {
        lock_path: lock_path.display().to_string(),
    })?;

    let snapshot = read_queue(&config.queue.path)?;
    if snapshot.consumed == 0 {
        tracing::debug!(queue = %config.queue.path.display(), "queue empty");
        return Ok(IngestReport::default());
    }
    if snapshot.invalid_utf8 > 0 {
        tracing::warn!(lines = snapshot.invalid_utf8, "skipping queue lines that are not valid UTF-8");
    }

    let blocked: BlockedDomainSet = store.list_blocked_domains().await?.into_iter().collect();
    let opts = PipelineOptions {
        batch: BatchOptions {
            batch_size: config.embedding.batch_size,
            max_chars: config.embedding.max_chars,
        },
        commit_batch_size: config.queue.commit_batch_size,
        dry_run,
    };

    let mut output = Pipeline::new(default_registry())
        .run(store, embedder, &blocked, &snapshot.lines, &opts)
        .await?;
    output.report.lines += snapshot.invalid_utf8;
    output.report.parse_failures += snapshot.invalid_utf8;

    if dry_run {
        return Ok(output.report);
    }

    let archive = archive_path(&config.queue.archive_dir, chrono::Utc::now().date_naive());
    append_archive(&archive, &output.archive_lines)?;
    clear_consumed(&config.queue.path, snapshot.consumed)?;
    tracing::info!(
        archived = output.archive_lines.len(),
        archive = %archive.display(),
        "queue drained"
    );

    Ok(output.report)
}

/// Complete lines of the queue at the moment it was read.
#[derive(Debug, Default)]
struct QueueSnapshot {
    /// Byte length of the complete-line prefix handed to the pipeline.
    consumed: usize,
    lines: Vec<String>,
    /// Lines dropped because they are not valid UTF-8.
    invalid_utf8: usize,
}

fn open_queue(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to open queue: {}", path.display())),
    }
}

/// Snapshot the queue under its lock. A missing queue file is empty.
fn read_queue(path: &Path) -> Result<QueueSnapshot> {
    let Some(file) = open_queue(path)? else {
        return Ok(QueueSnapshot::default());
    };
    let mut lock = fd_lock::RwLock::new(file);
    let mut guard = lock
        .write()
        .with_context(|| format!("Failed to lock queue: {}", path.display()))?;
    let mut bytes = Vec::new();
    guard
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read queue: {}", path.display()))?;
    drop(guard);

    // A trailing partial line is still being written by the producer.
    let consumed = match bytes.iter().rposition(|&b| b == b'\n') {
        Some(idx) => idx + 1,
        None => 0,
    };
    let mut snapshot = QueueSnapshot {
        consumed,
        ..Default::default()
    };
    for raw in bytes[..consumed].split(|&b| b == b'\n') {
        match std::str::from_utf8(raw) {
            Ok(line) => snapshot.lines.push(line.trim_end_matches('\r').to_string()),
            Err(_) => snapshot.invalid_utf8 += 1,
        }
    }
    Ok(snapshot)
}

pub fn archive_path(dir: &Path, date: chrono::NaiveDate) -> PathBuf {
    dir.join(format!("archive-{}.jsonl", date.format("%Y-%m-%d")))
}

fn append_archive(path: &Path, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open archive: {}", path.display()))?;
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Drop the first `consumed` bytes of the queue, keeping anything appended
/// since it was read. Runs under the queue lock and rewrites the file in
/// place.
fn clear_consumed(path: &Path, consumed: usize) -> Result<()> {
    let Some(file) = open_queue(path)? else {
        return Ok(());
    };
    let mut lock = fd_lock::RwLock::new(file);
    let mut guard = lock
        .write()
        .with_context(|| format!("Failed to lock queue: {}", path.display()))?;
    let file: &mut File = &mut guard;

    let mut remainder = Vec::new();
    file.seek(SeekFrom::Start(consumed as u64))?;
    file.read_to_end(&mut remainder)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&remainder)
        .with_context(|| format!("Failed to rewrite queue: {}", path.display()))?;
    file.sync_data()?;
    Ok(())
}
