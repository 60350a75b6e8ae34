//! Vector storage: a backend-agnostic [`VectorIndex`] trait plus bundled
//! implementations.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorIndex trait│
//!                  │   (async CRUD)   │
//!                  └────────┬─────────┘
//!                           │
//!              ┌────────────┼─────────────┐
//!              ▼            ▼             ▼
//!       ┌───────────┐ ┌───────────┐ ┌───────────┐
//!       │ in-memory │ │  SQLite   │ │ Retrying  │
//!       │  (tests)  │ │sqlite-vec │ │ (wrapper) │
//!       └───────────┘ └───────────┘ └───────────┘
//! ```
//!
//! All record ids are deterministic functions of content identity, so
//! `upsert` naturally replaces instead of duplicating.

pub mod memory;
pub mod retry;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::IndexError;

pub use memory::InMemoryVectorIndex;
pub use retry::{RetryPolicy, RetryingIndex};
pub use sqlite::SqliteVectorIndex;

// ── Records ────────────────────────────────────────────────────────────

/// The record stored in the vector index: deterministic id, embedding, and
/// the payload handed back to retrieval consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    /// Deterministic id derived from the unit's identity.
    pub vector_id: Uuid,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Text payload returned on search.
    pub text: String,
    /// Metadata payload returned on search and usable in filters.
    pub metadata: serde_json::Value,
}

impl PointRecord {
    /// Creates a record with empty metadata.
    pub fn new(vector_id: Uuid, embedding: Vec<f32>, text: impl Into<String>) -> Self {
        Self {
            vector_id,
            embedding,
            text: text.into(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One search match.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub vector_id: Uuid,
    /// Similarity score; result sets are ordered by descending score.
    pub score: f32,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Exact-match metadata filter applied during search.
///
/// Values are compared by their textual form, which matches the FAQ payloads
/// this system carries (category, language, source URL). Keys must be plain
/// top-level field names; dotted paths and keys containing quotes are not
/// supported by the SQLite backend's `json_extract` path construction.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    clauses: Vec<(String, serde_json::Value)>,
}

impl SearchFilter {
    /// A filter requiring `metadata[key] == value`.
    pub fn field(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            clauses: vec![(key.into(), value.into())],
        }
    }

    /// Adds another required key/value pair.
    #[must_use]
    pub fn and(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.clauses.push((key.into(), value.into()));
        self
    }

    /// Required key/value pairs.
    pub fn clauses(&self) -> &[(String, serde_json::Value)] {
        &self.clauses
    }

    /// Whether a metadata object satisfies every clause.
    pub fn matches(&self, metadata: &serde_json::Value) -> bool {
        self.clauses
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

// ── VectorIndex ────────────────────────────────────────────────────────

/// Abstraction over the external vector store.
///
/// All operations are keyed by deterministic ids; the pipeline only issues
/// upsert/delete commands and never reaches into a backend's internals.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces records by `vector_id`. Replacement is atomic per
    /// record; re-sending the same id overwrites, never duplicates.
    ///
    /// Returns the number of records written.
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<usize, IndexError>;

    /// Removes a record if present. Deleting an absent id is a no-op
    /// success (`Ok(false)`), which keeps re-runs after partial failure safe.
    async fn delete(&self, vector_id: Uuid) -> Result<bool, IndexError>;

    /// Returns at most `k` records ordered by descending similarity to
    /// `query`. An empty result set is a valid outcome, not an error.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError>;

    /// Total number of stored records.
    async fn count(&self) -> Result<usize, IndexError>;
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns `None` when the dimensions differ; a zero-norm operand scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a * norm_b))
}
