//! Error kinds shared across ingestion and retrieval.
//!
//! Functions return `anyhow::Result`; callers that need to branch on the
//! kind recover it with `err.downcast_ref::<TrailError>()`.

/// Typed failure conditions surfaced by the pipeline, the store, and the
/// query paths.
#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    /// A queue line could not be parsed into a raw record.
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },

    /// The sanitized content is already stored.
    #[error("duplicate content: {fingerprint}")]
    DuplicateContent { fingerprint: String },

    /// The record's origin domain is on the blocklist.
    #[error("blocked domain: {domain}")]
    BlockedDomain { domain: String },

    /// An extractor could not process the record's markup.
    #[error("extraction failed for {category}: {reason}")]
    ExtractionFailure { category: String, reason: String },

    /// The embedding capability failed or returned an unusable batch.
    #[error("embedding failed: {reason}")]
    EmbeddingFailure { reason: String },

    /// The completion capability failed.
    #[error("completion failed: {reason}")]
    CompletionFailure { reason: String },

    /// The record store could not be read or written.
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// `insert` was called with a fingerprint that already exists.
    #[error("duplicate fingerprint: {fingerprint}")]
    DuplicateFingerprint { fingerprint: String },

    /// An interactive query exceeded its deadline.
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Another ingestion run holds the run lock.
    #[error("another ingestion run is in progress ({lock_path})")]
    IngestLocked { lock_path: String },
}

impl TrailError {
    /// Machine-readable code used in HTTP error bodies and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            TrailError::MalformedInput { .. } => "malformed_input",
            TrailError::DuplicateContent { .. } => "duplicate_content",
            TrailError::BlockedDomain { .. } => "blocked_domain",
            TrailError::ExtractionFailure { .. } => "extraction_failed",
            TrailError::EmbeddingFailure { .. } => "embedding_failed",
            TrailError::CompletionFailure { .. } => "completion_failed",
            TrailError::StoreUnavailable { .. } => "store_unavailable",
            TrailError::DuplicateFingerprint { .. } => "duplicate_fingerprint",
            TrailError::Timeout { .. } => "timeout",
            TrailError::IngestLocked { .. } => "ingest_locked",
        }
    }
}

/// Returns the [`TrailError`] at the root of an `anyhow` chain, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<&TrailError> {
    err.chain().find_map(|e| e.downcast_ref::<TrailError>())
}
