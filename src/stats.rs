//! Archive statistics for `trail stats`.
//!
//! Record and embedding coverage, per-category counts, the capture time
//! range, and the blocklist size.

use anyhow::Result;

use webtrail_core::store::{RecordStore, StoreStats};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    print_stats(config, &stats, db_size);

    pool.close().await;
    Ok(())
}

fn print_stats(config: &Config, stats: &StoreStats, db_size: u64) {
    println!("Webtrail - Archive Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", stats.records);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.records,
        percent(stats.embedded, stats.records)
    );
    println!("  Summarized:  {}", stats.summarized);
    println!("  Sensitive:   {}", stats.sensitive);
    println!("  Blocked:     {} domains", stats.blocked_domains);

    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!();
        println!("  Oldest:      {}", format_ts(oldest));
        println!("  Newest:      {} ({})", format_ts(newest), format_ts_relative(newest));
    }

    if !stats.by_category.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<12} {:>8}", "CATEGORY", "RECORDS");
        println!("  {}", "-".repeat(21));
        for (category, n) in &stats.by_category {
            println!("  {:<12} {:>8}", category, n);
        }
    }

    println!();
}

fn percent(part: u64, whole: u64) -> u64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_percent_handles_empty() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 4), 25);
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 2 * 3600), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
