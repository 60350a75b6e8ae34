//! Embedding generation: provider seam, batching, and partial-failure
//! reporting.
//!
//! The pipeline never fails a whole run because one embedding batch failed;
//! [`embed_in_batches`] records which inputs failed so callers can retry only
//! that subset on the next run.

pub mod http;

use async_trait::async_trait;

use crate::types::IndexError;

pub use http::HttpEmbeddingProvider;

/// Turns text into fixed-dimension vectors.
///
/// Implementations must return one vector per input, in input order.
/// Embeddings are not required to be bit-identical across calls; change
/// detection never relies on vector equality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider label for logs and reports.
    fn name(&self) -> &str;

    /// Dimensionality of the vectors this provider produces.
    fn dimensions(&self) -> usize;

    /// Embeds one bounded batch of texts.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Embedding`] when the batch as a whole fails.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;
}

// ── MockEmbeddingProvider ──────────────────────────────────────────────

/// Deterministic offline provider for tests and local development.
///
/// Vectors are seeded from a hash of the input text: identical text always
/// produces the identical unit-length vector, different text a different one.
#[derive(Debug, Clone)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    fail_on: Option<String>,
}

impl MockEmbeddingProvider {
    /// Creates a provider with the default dimensionality (8).
    pub fn new() -> Self {
        Self {
            dimensions: 8,
            fail_on: None,
        }
    }

    /// Creates a provider with explicit dimensionality.
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail_on: None,
        }
    }

    /// Makes any batch containing `pattern` fail, for failure-path tests.
    #[must_use]
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on = Some(pattern.into());
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut reader = blake3::Hasher::new().update(text.as_bytes()).finalize_xof();
        let mut bytes = vec![0u8; self.dimensions * 4];
        reader.fill(&mut bytes);

        let mut vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        if let Some(pattern) = &self.fail_on {
            if texts.iter().any(|text| text.contains(pattern)) {
                return Err(IndexError::Embedding(format!(
                    "simulated failure on input matching '{pattern}'"
                )));
            }
        }
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

// ── Batched embedding ──────────────────────────────────────────────────

/// A batch that could not be embedded, mapped back to input positions.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Index of the failed input in the original slice.
    pub index: usize,
    /// Provider error message.
    pub message: String,
}

/// Outcome of embedding a sequence of texts in bounded batches.
#[derive(Debug, Clone, Default)]
pub struct BatchedEmbeddings {
    vectors: Vec<Option<Vec<f32>>>,
    failures: Vec<BatchFailure>,
}

impl BatchedEmbeddings {
    /// Vector for input `index`, if its batch succeeded.
    pub fn vector(&self, index: usize) -> Option<&Vec<f32>> {
        self.vectors.get(index).and_then(|slot| slot.as_ref())
    }

    /// Failure message for input `index`, if its batch failed.
    pub fn failure(&self, index: usize) -> Option<&str> {
        self.failures
            .iter()
            .find(|failure| failure.index == index)
            .map(|failure| failure.message.as_str())
    }

    /// All recorded per-input failures.
    pub fn failures(&self) -> &[BatchFailure] {
        &self.failures
    }

    /// Number of inputs that produced a vector.
    pub fn succeeded(&self) -> usize {
        self.vectors.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Embeds `texts` in batches of at most `batch_size`.
///
/// A failed batch marks only its own inputs as failed; remaining batches
/// still run. A provider returning the wrong number of vectors is treated as
/// a failed batch rather than trusted.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> BatchedEmbeddings {
    let batch_size = batch_size.max(1);
    let mut outcome = BatchedEmbeddings {
        vectors: vec![None; texts.len()],
        failures: Vec::new(),
    };

    for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        match provider.embed_batch(batch).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                for (i, vector) in vectors.into_iter().enumerate() {
                    outcome.vectors[offset + i] = Some(vector);
                }
            }
            Ok(vectors) => {
                let message = format!(
                    "provider '{}' returned {} vectors for {} inputs",
                    provider.name(),
                    vectors.len(),
                    batch.len()
                );
                tracing::warn!(batch = batch_index, %message, "embedding batch rejected");
                for i in 0..batch.len() {
                    outcome.failures.push(BatchFailure {
                        index: offset + i,
                        message: message.clone(),
                    });
                }
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(batch = batch_index, error = %message, "embedding batch failed");
                for i in 0..batch.len() {
                    outcome.failures.push(BatchFailure {
                        index: offset + i,
                        message: message.clone(),
                    });
                }
            }
        }
    }

    outcome
}

// ── Tests ──────────────────────────────────────────────────────────────
