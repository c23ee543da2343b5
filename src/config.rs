//! TOML configuration.
//!
//! Only `[db]` and `[queue]` are required; every other section falls back
//! to defaults. [`load_config`] parses and validates in one step.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ask: AskConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl DbConfig {
    /// `<db>.ingest.lock`, held for the duration of an ingestion run.
    pub fn ingest_lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".ingest.lock");
        PathBuf::from(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// JSON-lines file appended to by the capture agent.
    pub path: PathBuf,
    /// Directory receiving `archive-YYYY-MM-DD.jsonl` files.
    pub archive_dir: PathBuf,
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,
}

fn default_commit_batch_size() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-text character cap applied before embedding.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_chars: default_max_chars(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_chars() -> usize {
    8000
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Deadline for interactive search and ask.
    #[serde(default = "default_query_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            final_limit: default_final_limit(),
            timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_rrf_k() -> u32 {
    60
}
fn default_final_limit() -> usize {
    10
}
fn default_query_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AskConfig {
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    #[serde(default = "default_max_chars_per_item")]
    pub max_chars_per_item: usize,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            result_limit: default_result_limit(),
            max_chars_per_item: default_max_chars_per_item(),
        }
    }
}

fn default_result_limit() -> usize {
    10
}
fn default_max_chars_per_item() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.queue.commit_batch_size == 0 {
        bail!("queue.commit_batch_size must be > 0");
    }

    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.timeout_secs == 0 {
        bail!("retrieval.timeout_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_chars == 0 {
        bail!("embedding.max_chars must be > 0");
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.ask.result_limit == 0 {
        bail!("ask.result_limit must be > 0");
    }
    if config.ask.max_chars_per_item == 0 {
        bail!("ask.max_chars_per_item must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
[db]
path = "./data/trail.sqlite"

[queue]
path = "./data/queue.jsonl"
archive_dir = "./data/archive"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.queue.commit_batch_size, 200);
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());
        assert_eq!(config.retrieval.rrf_k, 60);
        assert_eq!(config.ask.result_limit, 10);
        assert_eq!(config.server.bind, "127.0.0.1:7878");
        assert_eq!(
            config.db.ingest_lock_path(),
            PathBuf::from("./data/trail.sqlite.ingest.lock")
        );
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let err = parse(&format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL)).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let ok = parse(&format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
            MINIMAL
        ));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse(&format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL)).is_err());
        assert!(parse(&format!("{}\n[llm]\nprovider = \"magic\"\n", MINIMAL)).is_err());
    }

    #[test]
    fn test_missing_queue_section_fails() {
        assert!(toml::from_str::<Config>("[db]\npath = \"x\"\n").is_err());
    }
}
