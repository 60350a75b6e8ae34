//! In-memory reference backend.
//!
//! Used by tests and small single-process deployments; the semantics here
//! define what any backend must do (replace-by-id, no-op delete, descending
//! score order).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::IndexError;

use super::{PointRecord, SearchFilter, SearchHit, VectorIndex, cosine_similarity};

/// Map-backed [`VectorIndex`] scored by cosine similarity.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    points: RwLock<HashMap<Uuid, PointRecord>>,
}

impl InMemoryVectorIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored ids, for assertions in tests.
    pub fn ids(&self) -> Vec<Uuid> {
        self.points.read().keys().copied().collect()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, points: Vec<PointRecord>) -> Result<usize, IndexError> {
        let mut guard = self.points.write();
        let written = points.len();
        for point in points {
            guard.insert(point.vector_id, point);
        }
        Ok(written)
    }

    async fn delete(&self, vector_id: Uuid) -> Result<bool, IndexError> {
        Ok(self.points.write().remove(&vector_id).is_some())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let guard = self.points.read();
        let mut hits: Vec<SearchHit> = Vec::new();
        for point in guard.values() {
            if let Some(filter) = filter {
                if !filter.matches(&point.metadata) {
                    continue;
                }
            }
            let Some(score) = cosine_similarity(query, &point.embedding) else {
                return Err(IndexError::store_permanent(format!(
                    "dimension mismatch: query has {}, record {} has {}",
                    query.len(),
                    point.vector_id,
                    point.embedding.len()
                )));
            };
            hits.push(SearchHit {
                vector_id: point.vector_id,
                score,
                text: point.text.clone(),
                metadata: point.metadata.clone(),
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.points.read().len())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: u128, embedding: Vec<f32>, text: &str) -> PointRecord {
        PointRecord::new(Uuid::from_u128(id), embedding, text)
    }

    #[tokio::test]
    async fn upsert_replaces_same_id() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![point(1, vec![1.0, 0.0], "old")])
            .await
            .unwrap();
        index
            .upsert(vec![point(1, vec![0.0, 1.0], "new")])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index.search(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].text, "new");
    }

    #[tokio::test]
    async fn delete_absent_is_noop_success() {
        let index = InMemoryVectorIndex::new();
        assert!(!index.delete(Uuid::from_u128(42)).await.unwrap());
    }

    #[tokio::test]
    async fn search_orders_by_descending_score() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![
                point(1, vec![1.0, 0.0], "aligned"),
                point(2, vec![0.7, 0.7], "diagonal"),
                point(3, vec![0.0, 1.0], "orthogonal"),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "aligned");
        assert_eq!(hits[1].text, "diagonal");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn filter_restricts_candidates() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![
                point(1, vec![1.0, 0.0], "billing")
                    .with_metadata(serde_json::json!({"category": "billing"})),
                point(2, vec![1.0, 0.0], "shipping")
                    .with_metadata(serde_json::json!({"category": "shipping"})),
            ])
            .await
            .unwrap();

        let filter = SearchFilter::field("category", "billing");
        let hits = index.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "billing");
    }

    #[tokio::test]
    async fn zero_k_returns_empty() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![point(1, vec![1.0, 0.0], "x")])
            .await
            .unwrap();
        assert!(index.search(&[1.0, 0.0], 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_permanent_error() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![point(1, vec![1.0, 0.0], "x")])
            .await
            .unwrap();
        let err = index.search(&[1.0, 0.0, 0.0], 1, None).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
