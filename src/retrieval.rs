//! Query-time retrieval over the vector index.
//!
//! Thin by design: embed the query with the same provider the pipeline
//! indexes with, search, and map hits to consumer-facing results. A failed
//! embedding or store lookup is always an error, never an empty result set,
//! so callers can distinguish "nothing matched" from "retrieval broke".

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::stores::{SearchFilter, VectorIndex};
use crate::types::{IndexError, RetrievalResult};

/// Answers semantic queries against the indexed content.
pub struct RetrievalService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl RetrievalService {
    /// Builds a service over the same embedder and index the pipeline uses.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Returns up to `k` results ordered by descending similarity.
    ///
    /// `k == 0` short-circuits to an empty result without touching the
    /// embedder or the store.
    ///
    /// # Errors
    ///
    /// * [`IndexError::Embedding`] — the query could not be embedded.
    /// * [`IndexError::Store`] — the index lookup failed.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self
            .embedder
            .embed_batch(&[query.to_string()])
            .await
            .map_err(|err| IndexError::Embedding(format!("query embedding failed: {err}")))?;
        let Some(embedding) = vectors.pop() else {
            return Err(IndexError::Embedding(
                "provider returned no embedding for the query".to_string(),
            ));
        };

        let hits = self.index.search(&embedding, k, filter).await?;
        tracing::debug!(k, hits = hits.len(), "retrieval complete");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievalResult {
                text: hit.text,
                score: hit.score,
                metadata: hit.metadata,
            })
            .collect())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
