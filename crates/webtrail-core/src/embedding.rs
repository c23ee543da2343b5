//! Embedding capability, vector utilities, and the embedding batcher.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `webtrail`
//! app crate; this module only defines the seam and the batching logic
//! that sits in front of it.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::TrailError;
use crate::models::EnrichedRecord;

/// Trait for embedding providers.
///
/// `embed` must return exactly one vector per input text, in input order.
/// The batcher checks the count at the call boundary.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use webtrail_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Sub-batch sizing for [`embed_records`].
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_chars: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            max_chars: 8000,
        }
    }
}

/// A sub-batch whose embedding call failed. Offsets index the slice passed
/// to [`embed_records`].
#[derive(Debug, Clone)]
pub struct SubBatchFailure {
    pub start: usize,
    pub len: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub embedded: usize,
    pub failed: usize,
    pub failures: Vec<SubBatchFailure>,
}

impl BatchOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Embed every record that lacks a vector, one provider call per
/// sub-batch. Vectors are paired with records positionally; a count
/// mismatch fails that sub-batch. Failed sub-batches leave their records
/// unembedded and are reported, never retried here.
pub async fn embed_records(
    provider: &dyn EmbeddingProvider,
    records: &mut [EnrichedRecord],
    opts: &BatchOptions,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let pending: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.has_embedding())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return outcome;
    }

    let batch_size = opts.batch_size.max(1);
    for group in pending.chunks(batch_size) {
        let texts: Vec<String> = group
            .iter()
            .map(|&i| embedding_input(&records[i], opts.max_chars))
            .collect();

        let result = provider.embed(&texts).await.and_then(|vectors| {
            if vectors.len() != texts.len() {
                return Err(TrailError::EmbeddingFailure {
                    reason: format!(
                        "provider returned {} vectors for {} inputs",
                        vectors.len(),
                        texts.len()
                    ),
                }
                .into());
            }
            Ok(vectors)
        });

        match result {
            Ok(vectors) => {
                for (&i, vector) in group.iter().zip(vectors) {
                    records[i].embedding = Some(vector);
                }
                outcome.embedded += group.len();
            }
            Err(e) => {
                tracing::warn!(
                    start = group[0],
                    len = group.len(),
                    error = %e,
                    "embedding sub-batch failed"
                );
                outcome.failed += group.len();
                outcome.failures.push(SubBatchFailure {
                    start: group[0],
                    len: group.len(),
                    error: e.to_string(),
                });
            }
        }
    }

    outcome
}

/// Text sent to the embedding model: title and body, truncated.
pub fn embedding_input(record: &EnrichedRecord, max_chars: usize) -> String {
    let joined = if record.title.trim().is_empty() {
        record.text.clone()
    } else {
        format!("{}\n\n{}", record.title, record.text)
    };
    truncate_chars(&joined, max_chars).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmbedder {
        calls: AtomicUsize,
        fail_call: Option<usize>,
        short_by_one: bool,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_call: None,
                short_by_one: false,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_call == Some(call) {
                anyhow::bail!("provider down");
            }
            let mut out: Vec<Vec<f32>> = texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            if self.short_by_one {
                out.pop();
            }
            Ok(out)
        }
    }

    fn record(text: &str) -> EnrichedRecord {
        EnrichedRecord {
            id: text.to_string(),
            url: "https://example.com".into(),
            domain: "example.com".into(),
            title: String::new(),
            captured_at: 0,
            received_at: 0,
            category: Category::General,
            text: text.to_string(),
            summary: None,
            metadata: serde_json::json!({}),
            images: vec![],
            sensitive: false,
            redacted: false,
            fingerprint: crate::models::fingerprint(text),
            embedding: None,
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("日本語", 1), "日");
    }

    #[tokio::test]
    async fn test_embeds_in_sub_batches() {
        let provider = FakeEmbedder::new();
        let mut records: Vec<_> = ["a", "bb", "ccc", "dddd", "eeeee"].iter().map(|t| record(t)).collect();
        let opts = BatchOptions {
            batch_size: 2,
            max_chars: 100,
        };
        let outcome = embed_records(&provider, &mut records, &opts).await;
        assert_eq!(outcome.embedded, 5);
        assert!(!outcome.is_degraded());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        // Order preserved: vector[0] is the input length.
        assert_eq!(records[3].embedding.as_ref().unwrap()[0], 4.0);
    }

    #[tokio::test]
    async fn test_failed_sub_batch_left_unembedded() {
        let provider = FakeEmbedder {
            fail_call: Some(1),
            ..FakeEmbedder::new()
        };
        let mut records: Vec<_> = ["a", "b", "c", "d", "e"].iter().map(|t| record(t)).collect();
        let opts = BatchOptions {
            batch_size: 2,
            max_chars: 100,
        };
        let outcome = embed_records(&provider, &mut records, &opts).await;
        assert_eq!(outcome.embedded, 3);
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].start, 2);
        assert_eq!(outcome.failures[0].len, 2);
        assert!(records[0].has_embedding());
        assert!(!records[2].has_embedding());
        assert!(!records[3].has_embedding());
        assert!(records[4].has_embedding());
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_batch() {
        let provider = FakeEmbedder {
            short_by_one: true,
            ..FakeEmbedder::new()
        };
        let mut records = vec![record("a"), record("b")];
        let outcome = embed_records(&provider, &mut records, &BatchOptions::default()).await;
        assert_eq!(outcome.embedded, 0);
        assert_eq!(outcome.failed, 2);
        assert!(outcome.failures[0].error.contains("1 vectors for 2 inputs"));
        assert!(records.iter().all(|r| !r.has_embedding()));
    }

    #[tokio::test]
    async fn test_already_embedded_records_skipped() {
        let provider = FakeEmbedder::new();
        let mut records = vec![record("a"), record("b")];
        records[0].embedding = Some(vec![9.0, 9.0]);
        let outcome = embed_records(&provider, &mut records, &BatchOptions::default()).await;
        assert_eq!(outcome.embedded, 1);
        assert_eq!(records[0].embedding.as_deref(), Some(&[9.0f32, 9.0][..]));
    }

    #[test]
    fn test_embedding_input_truncates() {
        let mut r = record("0123456789");
        r.title = "T".into();
        assert_eq!(embedding_input(&r, 4), "T\n\n0");
    }
}
