//! Extractor capability table.
//!
//! An extractor turns a raw snapshot into cleaned text plus a
//! category-specific metadata object. Extractors are registered per
//! [`Category`]; categories without one use the registry's default.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::models::{Category, RawRecord};

/// Cleaned text and structured metadata for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Extraction {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, raw: &RawRecord) -> Result<Extraction>;
}

/// Returns the captured text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughExtractor;

impl Extractor for PassthroughExtractor {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn extract(&self, raw: &RawRecord) -> Result<Extraction> {
        Ok(Extraction::text_only(raw.text.trim()))
    }
}

/// Category → extractor table with a default.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_category: HashMap<Category, Arc<dyn Extractor>>,
    default: Arc<dyn Extractor>,
}

impl ExtractorRegistry {
    pub fn new(default: Arc<dyn Extractor>) -> Self {
        Self {
            by_category: HashMap::new(),
            default,
        }
    }

    /// Register (or replace) the extractor for a category.
    pub fn register(&mut self, category: Category, extractor: Arc<dyn Extractor>) -> &mut Self {
        self.by_category.insert(category, extractor);
        self
    }

    pub fn resolve(&self, category: Category) -> &dyn Extractor {
        self.by_category
            .get(&category)
            .map(|e| e.as_ref())
            .unwrap_or(self.default.as_ref())
    }

    pub fn registered(&self) -> Vec<(Category, &str)> {
        let mut out: Vec<(Category, &str)> = self
            .by_category
            .iter()
            .map(|(c, e)| (*c, e.name()))
            .collect();
        out.sort_by_key(|(c, _)| c.as_str());
        out
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new(Arc::new(PassthroughExtractor))
    }
}
