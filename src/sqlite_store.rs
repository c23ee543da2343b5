//! SQLite-backed [`RecordStore`] implementation.
//!
//! Records live in `records`, the lexical index in the FTS5 table
//! `records_fts`, and vectors as little-endian f32 BLOBs in
//! `record_vectors`. Every write that touches more than one of them runs
//! in a single transaction.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use webtrail_core::blocklist::normalize_domain;
use webtrail_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use webtrail_core::error::TrailError;
use webtrail_core::models::{Category, EnrichedRecord, RecordRef, SearchFilters, SearchResult};
use webtrail_core::store::{sort_hits, BatchInsert, RecordStore, StoreStats};

const RECORD_COLUMNS: &str = "r.id, r.url, r.domain, r.title, r.captured_at, r.received_at, \
     r.category, r.text, r.summary, r.metadata_json, r.images_json, r.sensitive, r.redacted, \
     r.fingerprint, v.embedding";

/// Column weights for `bm25()`: record_id, title, text, summary.
const BM25_WEIGHTS: &str = "0.0, 2.0, 1.0, 1.0";

/// SQLite implementation of [`RecordStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_category(s: &str) -> Category {
    s.parse().unwrap_or(Category::General)
}

fn row_to_record(row: &SqliteRow) -> EnrichedRecord {
    let metadata_json: String = row.get("metadata_json");
    let images_json: String = row.get("images_json");
    let category: String = row.get("category");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    EnrichedRecord {
        id: row.get("id"),
        url: row.get("url"),
        domain: row.get("domain"),
        title: row.get("title"),
        captured_at: row.get("captured_at"),
        received_at: row.get("received_at"),
        category: parse_category(&category),
        text: row.get("text"),
        summary: row.get("summary"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        images: serde_json::from_str(&images_json).unwrap_or_default(),
        sensitive: row.get("sensitive"),
        redacted: row.get("redacted"),
        fingerprint: row.get("fingerprint"),
        embedding: embedding.map(|b| blob_to_vec(&b)),
    }
}

fn row_to_ref(row: &SqliteRow) -> RecordRef {
    let category: String = row.get("category");
    RecordRef {
        id: row.get("id"),
        url: row.get("url"),
        domain: row.get("domain"),
        title: row.get("title"),
        category: parse_category(&category),
        captured_at: row.get("captured_at"),
    }
}

/// Append `AND ...` clauses for `filters` against the `r` alias.
fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &SearchFilters) {
    if !filters.categories.is_empty() {
        qb.push(" AND r.category IN (");
        let mut sep = qb.separated(", ");
        for c in &filters.categories {
            sep.push_bind(c.as_str().to_string());
        }
        sep.push_unseparated(")");
    }
    if !filters.domains.is_empty() {
        qb.push(" AND (");
        for (i, d) in filters.domains.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            push_domain_match(qb, d);
        }
        qb.push(")");
    }
    if let Some(since) = filters.since {
        qb.push(" AND r.captured_at >= ").push_bind(since);
    }
    if let Some(until) = filters.until {
        qb.push(" AND r.captured_at < ").push_bind(until);
    }
}

/// `r.domain` equals `domain` or ends with `.domain`.
fn push_domain_match(qb: &mut QueryBuilder<'_, Sqlite>, domain: &str) {
    let d = domain.to_ascii_lowercase();
    qb.push("(r.domain = ")
        .push_bind(d.clone())
        .push(" OR substr(r.domain, -(length(")
        .push_bind(d.clone())
        .push(") + 1)) = '.' || ")
        .push_bind(d)
        .push(")");
}

/// Build an FTS5 MATCH expression: each term quoted, joined with OR.
fn fts_match_expr(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn insert_one(conn: &mut SqliteConnection, record: &EnrichedRecord) -> Result<bool> {
    let images_json = serde_json::to_string(&record.images)?;
    let metadata_json = serde_json::to_string(&record.metadata)?;

    let result = sqlx::query(
        r#"
        INSERT INTO records (id, url, domain, title, captured_at, received_at, category,
                             text, summary, metadata_json, images_json, sensitive, redacted,
                             fingerprint)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fingerprint) DO NOTHING
        "#,
    )
    .bind(&record.id)
    .bind(&record.url)
    .bind(&record.domain)
    .bind(&record.title)
    .bind(record.captured_at)
    .bind(record.received_at)
    .bind(record.category.as_str())
    .bind(&record.text)
    .bind(&record.summary)
    .bind(&metadata_json)
    .bind(&images_json)
    .bind(record.sensitive)
    .bind(record.redacted)
    .bind(&record.fingerprint)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("INSERT INTO records_fts (record_id, title, text, summary) VALUES (?, ?, ?, ?)")
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.text)
        .bind(record.summary.as_deref().unwrap_or(""))
        .execute(&mut *conn)
        .await?;

    if let Some(vector) = record.embedding.as_ref().filter(|v| !v.is_empty()) {
        upsert_vector(conn, &record.id, vector).await?;
    }

    Ok(true)
}

async fn upsert_vector(conn: &mut SqliteConnection, id: &str, vector: &[f32]) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO record_vectors (record_id, dims, embedding, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(record_id) DO UPDATE SET
            dims = excluded.dims,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(id)
    .bind(vector.len() as i64)
    .bind(vec_to_blob(vector))
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, record: &EnrichedRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !insert_one(&mut tx, record).await? {
            return Err(TrailError::DuplicateFingerprint {
                fingerprint: record.fingerprint.clone(),
            }
            .into());
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_batch(&self, records: &[EnrichedRecord]) -> Result<BatchInsert> {
        let mut report = BatchInsert::default();
        if records.is_empty() {
            return Ok(report);
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            if insert_one(&mut tx, record).await? {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }
        tx.commit().await?;
        Ok(report)
    }

    async fn exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM records WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn get_record(&self, id: &str) -> Result<Option<EnrichedRecord>> {
        let sql = format!(
            "SELECT {} FROM records r LEFT JOIN record_vectors v ON v.record_id = r.id WHERE r.id = ?",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM record_vectors WHERE record_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM records_fts WHERE record_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM records WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_domain(&self, domain: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT r.id FROM records r WHERE ");
        push_domain_match(&mut select, domain);
        let ids: Vec<String> = select
            .build_query_scalar::<String>()
            .fetch_all(&mut *tx)
            .await?;

        for id in &ids {
            sqlx::query("DELETE FROM record_vectors WHERE record_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM records_fts WHERE record_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM records WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ids.len() as u64)
    }

    async fn set_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_vector(&mut conn, id, vector).await
    }

    async fn set_summary(&self, id: &str, summary: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE records SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("record not found: {}", id);
        }
        sqlx::query("UPDATE records_fts SET summary = ? WHERE record_id = ?")
            .bind(summary)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn records_missing_embedding(&self, limit: usize) -> Result<Vec<EnrichedRecord>> {
        let sql = format!(
            "SELECT {} FROM records r LEFT JOIN record_vectors v ON v.record_id = r.id \
             WHERE v.record_id IS NULL ORDER BY r.captured_at ASC, r.id ASC LIMIT ?",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn records_missing_summary(&self, limit: usize) -> Result<Vec<EnrichedRecord>> {
        let sql = format!(
            "SELECT {} FROM records r LEFT JOIN record_vectors v ON v.record_id = r.id \
             WHERE r.summary IS NULL ORDER BY r.captured_at ASC, r.id ASC LIMIT ?",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn clear_embeddings(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM record_vectors")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
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

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            r#"
            SELECT r.id, r.url, r.domain, r.title, r.category, r.captured_at,
                   bm25(records_fts, {}) AS rank,
                   snippet(records_fts, 2, '>>>', '<<<', '...', 32) AS snippet
            FROM records_fts
            JOIN records r ON r.id = records_fts.record_id
            WHERE records_fts MATCH "#,
            BM25_WEIGHTS
        ));
        qb.push_bind(fts_match_expr(terms));
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY rank ASC, r.captured_at DESC, r.id ASC LIMIT ")
            .push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;

        let results = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                let snippet: String = row.get("snippet");
                SearchResult {
                    record: row_to_ref(row),
                    // bm25() is lower-is-better; negate so higher is better.
                    score: -rank,
                    snippet,
                }
            })
            .collect();

        Ok(results)
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

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT r.id, r.url, r.domain, r.title, r.category, r.captured_at, v.embedding,
                   COALESCE(substr(r.text, 1, 240), '') AS snippet
            FROM record_vectors v
            JOIN records r ON r.id = v.record_id
            WHERE 1 = 1"#,
        );
        push_filters(&mut qb, filters);

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut results: Vec<SearchResult> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                SearchResult {
                    record: row_to_ref(row),
                    score: cosine_similarity(query_vec, &vec) as f64,
                    snippet: row.get("snippet"),
                }
            })
            .collect();

        sort_hits(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn list_blocked_domains(&self) -> Result<Vec<String>> {
        let domains: Vec<String> =
            sqlx::query_scalar("SELECT domain FROM blocked_domains ORDER BY domain ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(domains)
    }

    async fn add_blocked_domain(&self, domain: &str) -> Result<bool> {
        let Some(normalized) = normalize_domain(domain) else {
            anyhow::bail!("invalid domain: '{}'", domain);
        };
        let result = sqlx::query(
            "INSERT INTO blocked_domains (domain, added_at) VALUES (?, ?) ON CONFLICT(domain) DO NOTHING",
        )
        .bind(&normalized)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_blocked_domain(&self, domain: &str) -> Result<bool> {
        let Some(normalized) = normalize_domain(domain) else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM blocked_domains WHERE domain = ?")
            .bind(&normalized)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS records,
                   COALESCE(SUM(summary IS NOT NULL), 0) AS summarized,
                   COALESCE(SUM(sensitive), 0) AS sensitive,
                   MIN(captured_at) AS oldest,
                   MAX(captured_at) AS newest
            FROM records
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM record_vectors")
            .fetch_one(&self.pool)
            .await?;
        let blocked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocked_domains")
            .fetch_one(&self.pool)
            .await?;

        let category_rows = sqlx::query(
            "SELECT category, COUNT(*) AS n FROM records GROUP BY category ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        let records: i64 = row.get("records");
        let summarized: i64 = row.get("summarized");
        let sensitive: i64 = row.get("sensitive");

        Ok(StoreStats {
            records: records as u64,
            embedded: embedded as u64,
            summarized: summarized as u64,
            sensitive: sensitive as u64,
            blocked_domains: blocked as u64,
            by_category: category_rows
                .iter()
                .map(|r| {
                    let n: i64 = r.get("n");
                    (r.get::<String, _>("category"), n as u64)
                })
                .collect(),
            oldest: row.get("oldest"),
            newest: row.get("newest"),
        })
    }
}
