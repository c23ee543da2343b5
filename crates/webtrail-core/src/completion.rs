//! Completion capability used by answer generation and summaries.

use anyhow::Result;
use async_trait::async_trait;

/// A text-completion backend. Implementations send `prompt` as a single
/// user turn and return the raw completion text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}
