//! Core data models used throughout Webtrail.
//!
//! These types represent the raw snapshots produced by the capture agent,
//! the enriched records the store owns, and the transient search results
//! that flow through the retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Content-type category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Email,
    Chat,
    Document,
    Social,
    Meeting,
    Article,
    Search,
    General,
}

impl Category {
    /// Every category, in classifier priority order (`General` last).
    pub const ALL: [Category; 8] = [
        Category::Email,
        Category::Chat,
        Category::Document,
        Category::Social,
        Category::Meeting,
        Category::Article,
        Category::Search,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Email => "email",
            Category::Chat => "chat",
            Category::Document => "document",
            Category::Social => "social",
            Category::Meeting => "meeting",
            Category::Article => "article",
            Category::Search => "search",
            Category::General => "general",
        }
    }

    /// Personal-communication categories; records in them are flagged sensitive.
    pub fn is_personal(&self) -> bool {
        matches!(self, Category::Email | Category::Chat | Category::Meeting)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        match Category::ALL.iter().find(|c| c.as_str() == lowered) {
            Some(c) => Ok(*c),
            None => bail!(
                "Unknown category: '{}'. Use one of: email, chat, document, social, meeting, article, search, general.",
                s
            ),
        }
    }
}

/// A page snapshot as written to the queue by the capture agent.
///
/// Timestamps are normalized to Unix seconds on parse. Both RFC 3339
/// strings and epoch numbers are accepted; numbers above `10^11` are read
/// as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub html: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub received_at: Option<i64>,
}

impl RawRecord {
    /// Parse one queue line. Blank URLs count as malformed.
    pub fn from_json_line(line: &str) -> Result<Self> {
        let raw: RawRecord = serde_json::from_str(line)?;
        if raw.url.trim().is_empty() {
            bail!("record has an empty url");
        }
        Ok(raw)
    }
}

const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn de_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => {
            let secs = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .and_then(epoch_to_secs)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", n)))?;
            Ok(Some(secs))
        }
        Some(serde_json::Value::String(s)) => parse_timestamp(&s).map(Some).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!(
            "timestamp must be a string or number, got {}",
            other
        ))),
    }
}

/// Scale milliseconds down to seconds. `None` when the result is outside
/// the range chrono can represent.
fn epoch_to_secs(n: i64) -> Option<i64> {
    let secs = if n.unsigned_abs() > EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
        n / 1000
    } else {
        n
    };
    chrono::DateTime::from_timestamp(secs, 0).map(|_| secs)
}

/// Parse an RFC 3339 string, a `YYYY-MM-DD` date, or a numeric epoch into
/// Unix seconds.
pub fn parse_timestamp(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(n) = s.parse::<i64>() {
        return epoch_to_secs(n).ok_or_else(|| anyhow!("timestamp out of range: '{}'", s));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    bail!("invalid timestamp: '{}'", s)
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Deterministic content fingerprint: SHA-256 of the sanitized text, hex encoded.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A classified, sanitized record owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub captured_at: i64,
    pub received_at: i64,
    pub category: Category,
    pub text: String,
    pub summary: Option<String>,
    pub metadata: serde_json::Value,
    pub images: Vec<String>,
    pub sensitive: bool,
    pub redacted: bool,
    pub fingerprint: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl EnrichedRecord {
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }

    pub fn to_ref(&self) -> RecordRef {
        RecordRef {
            id: self.id.clone(),
            url: self.url.clone(),
            domain: self.domain.clone(),
            title: self.title.clone(),
            category: self.category,
            captured_at: self.captured_at,
        }
    }
}

/// Lightweight record metadata carried by search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRef {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub title: String,
    pub category: Category,
    pub captured_at: i64,
}

/// A ranked hit. `score` is only comparable within one ranking method.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub record: RecordRef,
    pub score: f64,
    pub snippet: String,
}

/// Restrictions applied identically by lexical and vector search.
///
/// `since` is inclusive and `until` is exclusive. A domain entry matches the
/// domain itself and every subdomain of it.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub categories: Vec<Category>,
    pub domains: Vec<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
            && self.domains.is_empty()
            && self.since.is_none()
            && self.until.is_none()
    }

    pub fn matches(&self, category: Category, domain: &str, captured_at: i64) -> bool {
        if !self.categories.is_empty() && !self.categories.contains(&category) {
            return false;
        }
        if !self.domains.is_empty()
            && !self
                .domains
                .iter()
                .any(|d| crate::blocklist::is_same_or_subdomain(domain, d))
        {
            return false;
        }
        if let Some(since) = self.since {
            if captured_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if captured_at >= until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let line = r#"{"url":"https://example.com/a","title":"A","timestamp":"2024-03-01T10:00:00Z","text":"hello","images":["https://example.com/i.png"],"html":"<p>hello</p>","received_at":1709287205000}"#;
        let raw = RawRecord::from_json_line(line).unwrap();
        assert_eq!(raw.title, "A");
        assert_eq!(raw.timestamp, Some(1709287200));
        assert_eq!(raw.received_at, Some(1709287205));
        assert_eq!(raw.images.len(), 1);
    }

    #[test]
    fn test_parse_minimal_line() {
        let raw = RawRecord::from_json_line(r#"{"url":"https://example.com"}"#).unwrap();
        assert!(raw.text.is_empty());
        assert!(raw.timestamp.is_none());
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(RawRecord::from_json_line("not json").is_err());
        assert!(RawRecord::from_json_line(r#"{"title":"no url"}"#).is_err());
        assert!(RawRecord::from_json_line(r#"{"url":"  "}"#).is_err());
        assert!(RawRecord::from_json_line(r#"{"url":"https://a.com","timestamp":"yesterday"}"#).is_err());
        assert!(RawRecord::from_json_line(r#"{"url":"https://a.com","timestamp":[1]}"#).is_err());
    }

    #[test]
    fn test_out_of_range_epochs_rejected() {
        assert!(RawRecord::from_json_line(
            r#"{"url":"https://a.com","timestamp":-9223372036854775808}"#
        )
        .is_err());
        assert!(RawRecord::from_json_line(r#"{"url":"https://a.com","received_at":1e300}"#).is_err());
        assert!(parse_timestamp("-9223372036854775808").is_err());
        assert!(parse_timestamp("9223372036854775807").is_err());
        assert_eq!(parse_timestamp("-1709287200000").unwrap(), -1709287200);
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        assert_eq!(fingerprint("same text"), fingerprint("same text"));
        assert_ne!(fingerprint("same text"), fingerprint("other text"));
        assert_eq!(fingerprint("").len(), 64);
    }

    #[test]
    fn test_category_roundtrip_and_priority() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
        assert_eq!(Category::ALL.last(), Some(&Category::General));
        assert!("nonsense".parse::<Category>().is_err());
    }

    #[test]
    fn test_filters_until_exclusive_since_inclusive() {
        let f = SearchFilters {
            since: Some(100),
            until: Some(200),
            ..Default::default()
        };
        assert!(f.matches(Category::General, "a.com", 100));
        assert!(f.matches(Category::General, "a.com", 199));
        assert!(!f.matches(Category::General, "a.com", 200));
        assert!(!f.matches(Category::General, "a.com", 99));
    }

    #[test]
    fn test_filters_domain_includes_subdomains() {
        let f = SearchFilters {
            domains: vec!["google.com".to_string()],
            categories: vec![Category::Email],
            ..Default::default()
        };
        assert!(f.matches(Category::Email, "mail.google.com", 0));
        assert!(!f.matches(Category::Email, "notgoogle.com", 0));
        assert!(!f.matches(Category::Chat, "google.com", 0));
    }
}
