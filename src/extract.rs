//! Concrete extractors registered for each category.
//!
//! Every extractor shares the same body handling: markup is converted to
//! text with `html2text` when present, otherwise the captured text is used.
//! Category extractors then add their own metadata fields.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use url::Url;

use webtrail_core::blocklist::origin_domain;
use webtrail_core::classify::query_param;
use webtrail_core::extract::{Extraction, Extractor, ExtractorRegistry};
use webtrail_core::models::{Category, RawRecord};

/// Line width passed to `html2text`.
const RENDER_WIDTH: usize = 100;

/// Build the registry used by `trail ingest`.
pub fn default_registry() -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new(Arc::new(GenericExtractor));
    registry
        .register(Category::Email, Arc::new(EmailExtractor))
        .register(Category::Chat, Arc::new(ChatExtractor))
        .register(Category::Search, Arc::new(SearchExtractor))
        .register(Category::Document, Arc::new(DocumentExtractor));
    registry
}

/// Render the record body and start a metadata object with the image count.
fn body(raw: &RawRecord) -> Result<(String, Map<String, Value>)> {
    let text = if raw.html.trim().is_empty() {
        raw.text.clone()
    } else {
        html2text::from_read(raw.html.as_bytes(), RENDER_WIDTH)
            .map_err(|e| anyhow!("html render failed: {}", e))?
    };
    let mut metadata = Map::new();
    metadata.insert("images".to_string(), json!(raw.images.len()));
    Ok((tidy(&text), metadata))
}

/// Trim each line and collapse runs of blank lines.
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Split a page title on the usual separators (`" | "`, `" - "`, `" – "`).
fn title_parts(title: &str) -> Vec<String> {
    title
        .replace(" – ", " | ")
        .replace(" - ", " | ")
        .split(" | ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn insert_opt(metadata: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        metadata.insert(key.to_string(), Value::String(v));
    }
}

pub struct GenericExtractor;

impl Extractor for GenericExtractor {
    fn name(&self) -> &str {
        "generic"
    }

    fn extract(&self, raw: &RawRecord) -> Result<Extraction> {
        let (text, metadata) = body(raw)?;
        Ok(Extraction { text, metadata })
    }
}

/// Webmail: subject from the title, mailbox from the URL fragment.
pub struct EmailExtractor;

impl Extractor for EmailExtractor {
    fn name(&self) -> &str {
        "email"
    }

    fn extract(&self, raw: &RawRecord) -> Result<Extraction> {
        let (text, mut metadata) = body(raw)?;
        let subject = title_parts(&raw.title).into_iter().next();
        let mailbox = raw
            .url
            .split_once('#')
            .and_then(|(_, frag)| frag.split('/').next())
            .map(|m| m.to_ascii_lowercase());
        insert_opt(&mut metadata, "subject", subject);
        insert_opt(&mut metadata, "mailbox", mailbox);
        Ok(Extraction { text, metadata })
    }
}

/// Chat apps: channel from the title, workspace from the title or host.
pub struct ChatExtractor;

impl Extractor for ChatExtractor {
    fn name(&self) -> &str {
        "chat"
    }

    fn extract(&self, raw: &RawRecord) -> Result<Extraction> {
        let (text, mut metadata) = body(raw)?;
        let parts = title_parts(&raw.title);
        let channel = parts
            .first()
            .map(|c| c.trim_start_matches(['#', '@']).to_string());
        let workspace = parts.get(1).cloned().or_else(|| {
            // acme.slack.com → acme; app.slack.com names no workspace.
            let domain = origin_domain(&raw.url)?;
            let (label, rest) = domain.split_once('.')?;
            (rest.contains('.') && label != "app" && label != "web").then(|| label.to_string())
        });
        insert_opt(&mut metadata, "channel", channel);
        insert_opt(&mut metadata, "workspace", workspace);
        Ok(Extraction { text, metadata })
    }
}

/// Search result pages: the query string and engine.
pub struct SearchExtractor;

impl Extractor for SearchExtractor {
    fn name(&self) -> &str {
        "search"
    }

    fn extract(&self, raw: &RawRecord) -> Result<Extraction> {
        let (text, mut metadata) = body(raw)?;
        insert_opt(&mut metadata, "query", query_param(&raw.url, &["q", "query", "p"]));
        insert_opt(&mut metadata, "engine", origin_domain(&raw.url));
        Ok(Extraction { text, metadata })
    }
}

/// Hosted documents: the `/d/<id>/` identifier when the URL has one.
pub struct DocumentExtractor;

impl Extractor for DocumentExtractor {
    fn name(&self) -> &str {
        "document"
    }

    fn extract(&self, raw: &RawRecord) -> Result<Extraction> {
        let (text, mut metadata) = body(raw)?;
        insert_opt(&mut metadata, "document_id", document_id(&raw.url));
        Ok(Extraction { text, metadata })
    }
}

fn document_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let mut segments = parsed.path_segments()?;
    segments.find(|s| *s == "d")?;
    let id = segments.next().filter(|s| !s.is_empty())?.to_string();
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(url: &str, title: &str, text: &str, html: &str) -> RawRecord {
        RawRecord::from_json_line(
            &json!({"url": url, "title": title, "text": text, "html": html, "images": ["a.png"]})
                .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_generic_prefers_markup() {
        let r = raw(
            "https://example.com",
            "Example",
            "captured",
            "<html><body><h1>Hello</h1><p>World</p></body></html>",
        );
        let ex = GenericExtractor.extract(&r).unwrap();
        assert!(ex.text.contains("Hello"));
        assert!(ex.text.contains("World"));
        assert!(!ex.text.contains("<p>"));
        assert_eq!(ex.metadata["images"], json!(1));
    }

    #[test]
    fn test_generic_without_markup_uses_text() {
        let r = raw("https://example.com", "", "line one\n\n\n\nline two  ", "");
        let ex = GenericExtractor.extract(&r).unwrap();
        assert_eq!(ex.text, "line one\n\nline two");
    }

    #[test]
    fn test_email_metadata() {
        let r = raw(
            "https://mail.google.com/mail/u/0/#inbox/FMfcgz",
            "Invoice for March - me@example.com - Gmail",
            "body",
            "",
        );
        let ex = EmailExtractor.extract(&r).unwrap();
        assert_eq!(ex.metadata["subject"], json!("Invoice for March"));
        assert_eq!(ex.metadata["mailbox"], json!("inbox"));
    }

    #[test]
    fn test_chat_metadata() {
        let r = raw("https://app.slack.com/client/T1/C1", "#ops | Acme Corp", "hi", "");
        let ex = ChatExtractor.extract(&r).unwrap();
        assert_eq!(ex.metadata["channel"], json!("ops"));
        assert_eq!(ex.metadata["workspace"], json!("Acme Corp"));

        let r = raw("https://acme.slack.com/archives/C1", "general", "hi", "");
        let ex = ChatExtractor.extract(&r).unwrap();
        assert_eq!(ex.metadata["workspace"], json!("acme"));
    }

    #[test]
    fn test_search_and_document_metadata() {
        let r = raw("https://duckduckgo.com/?q=rust+rrf&ia=web", "rust rrf", "", "");
        let ex = SearchExtractor.extract(&r).unwrap();
        assert_eq!(ex.metadata["query"], json!("rust rrf"));
        assert_eq!(ex.metadata["engine"], json!("duckduckgo.com"));

        let r = raw("https://docs.google.com/document/d/1AbC/edit#heading=h.1", "Plan", "", "");
        let ex = DocumentExtractor.extract(&r).unwrap();
        assert_eq!(ex.metadata["document_id"], json!("1AbC"));

        let r = raw("https://example.com/doc?next=/d/xyz/", "Plan", "", "");
        let ex = DocumentExtractor.extract(&r).unwrap();
        assert!(ex.metadata.get("document_id").is_none());
    }

    #[test]
    fn test_default_registry_covers_categories() {
        let reg = default_registry();
        assert_eq!(reg.resolve(Category::Chat).name(), "chat");
        assert_eq!(reg.resolve(Category::Article).name(), "generic");
        assert_eq!(reg.registered().len(), 4);
    }
}
