//! The indexing pipeline — one run from extraction to persisted state.
//!
//! # Run sequence
//!
//! 1. Extract the current snapshot (abort if it is suspiciously small —
//!    nothing is mutated on an extraction failure).
//! 2. Diff against persisted [`TrackedState`](crate::tracker::TrackedState).
//! 3. Embed NEW ∪ CHANGED units in bounded batches; a failed batch is
//!    recorded per unit and the run continues.
//! 4. Upsert embedded units under their deterministic vector ids.
//! 5. Delete REMOVED identities, then drop their state entries.
//! 6. Tracked state is written only after the matching store mutation was
//!    acknowledged, so a crash leaves state lagging reality and the next
//!    run's diff re-attempts whatever was unconfirmed.
//!
//! At most one run executes at a time; a second run requested while one is
//! active is rejected with [`IndexError::Busy`] rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::embedding::{EmbeddingProvider, embed_in_batches};
use crate::extract::ContentExtractor;
use crate::stores::{PointRecord, VectorIndex};
use crate::tracker::ContentTracker;
use crate::types::{ContentUnit, IndexError, vector_id_for};

// ── RunReport ──────────────────────────────────────────────────────────

/// What failed for one unit during a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitErrorKind {
    /// The unit's embedding batch failed.
    Embedding,
    /// The store rejected the mutation.
    Store {
        /// Whether the store classified the failure as retryable.
        transient: bool,
    },
    /// The store acknowledged the mutation but state persistence failed;
    /// the unit will be re-attempted next run.
    State,
}

/// A per-unit failure entry. Units listed here keep their stale tracked
/// fingerprint and are naturally retried by the next run's diff.
#[derive(Debug, Clone, Serialize)]
pub struct UnitError {
    pub identity: String,
    pub kind: UnitErrorKind,
    pub message: String,
}

/// Structured outcome of one pipeline run.
///
/// Consumers (operator, scheduler) decide whether to alert or retry; the
/// pipeline itself never escalates beyond returning this report.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Units indexed for the first time.
    pub inserted: usize,
    /// Units re-embedded and overwritten after a content change.
    pub updated: usize,
    /// Units removed from the index.
    pub deleted: usize,
    /// Units seen with an unchanged fingerprint.
    pub unchanged: usize,
    /// Duplicate identities dropped during extraction.
    pub collisions: usize,
    /// Whether the run stopped early at a cancellation checkpoint.
    pub cancelled: bool,
    /// Per-unit failures; never empty silently — every unprocessed unit that
    /// was due for indexing appears here or in a later run's diff.
    pub errors: Vec<UnitError>,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            inserted: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            collisions: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }

    /// True when the run made no index mutations.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }

    /// True when at least one unit failed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ── CancelHandle ───────────────────────────────────────────────────────

/// Cooperative cancellation for an in-flight run.
///
/// The pipeline checks the flag at unit boundaries; state reflects only
/// mutations confirmed before the checkpoint that observed the cancel.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation of the current run.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ── IndexingPipeline ───────────────────────────────────────────────────

/// Orchestrates extractor → tracker → embedder → vector index for one run.
pub struct IndexingPipeline {
    extractor: Arc<dyn ContentExtractor>,
    tracker: ContentTracker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    min_units: usize,
    run_lock: Mutex<()>,
    cancel_flag: Arc<AtomicBool>,
    state_loaded: AtomicBool,
}

impl IndexingPipeline {
    /// Wires the pipeline's collaborators with default knobs
    /// (`batch_size = 64`, `min_units = 1`).
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        tracker: ContentTracker,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            extractor,
            tracker,
            embedder,
            index,
            batch_size: 64,
            min_units: 1,
            run_lock: Mutex::new(()),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            state_loaded: AtomicBool::new(false),
        }
    }

    /// Bounds the number of texts per embedding request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Minimum extracted units required before a run is trusted. Below the
    /// threshold the run aborts without mutating state or index.
    #[must_use]
    pub fn with_min_units(mut self, min_units: usize) -> Self {
        self.min_units = min_units;
        self
    }

    /// Handle for cancelling an in-flight run between units.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancel_flag),
        }
    }

    /// Executes one indexing run.
    ///
    /// Per-unit failures are recorded in the [`RunReport`] and never abort
    /// the run; run-level failures (extraction guard, lock contention) abort
    /// before any mutation.
    ///
    /// # Errors
    ///
    /// * [`IndexError::Busy`] — another run holds the run lock.
    /// * [`IndexError::Extraction`] — source unreachable or the snapshot is
    ///   below the configured minimum.
    pub async fn run(&self) -> Result<RunReport, IndexError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Err(IndexError::Busy);
        };
        self.cancel_flag.store(false, Ordering::SeqCst);

        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("index_run", %run_id);
        self.run_locked(run_id).instrument(span).await
    }

    /// Run body; the caller holds the run lock.
    async fn run_locked(&self, run_id: Uuid) -> Result<RunReport, IndexError> {
        // Persisted state from an earlier process is picked up on the first
        // run, so a restart reuses what is already indexed instead of
        // re-embedding everything and orphaning removed vectors.
        if !self.state_loaded.load(Ordering::SeqCst) {
            self.tracker.load().await?;
            self.state_loaded.store(true, Ordering::SeqCst);
        }

        let units = self.extractor.extract().await?;
        if units.len() < self.min_units {
            return Err(IndexError::Extraction {
                reason: format!(
                    "extraction produced {} units, below the minimum of {}; \
                     treating as a failed extraction",
                    units.len(),
                    self.min_units
                ),
            });
        }
        tracing::info!(units = units.len(), "extraction complete");

        let diff = self.tracker.diff(&units).await;
        tracing::info!(
            new = diff.new.len(),
            changed = diff.changed.len(),
            unchanged = diff.unchanged.len(),
            removed = diff.removed.len(),
            collisions = diff.collisions,
            "diff complete"
        );

        let mut report = RunReport::new(run_id);
        report.collisions = diff.collisions;
        report.unchanged = diff.unchanged.len();

        // Unchanged units involve no store mutation; only their
        // last_seen_run_id is refreshed.
        if let Err(err) = self.tracker.refresh_seen(&diff.unchanged, run_id).await {
            tracing::warn!(error = %err, "failed to refresh last-seen run ids");
        }

        let to_embed: Vec<ContentUnit> = diff.to_embed().cloned().collect();
        let new_count = diff.new.len();
        let texts: Vec<String> = to_embed.iter().map(|unit| unit.text.clone()).collect();
        let embedded = embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size).await;

        for (i, unit) in to_embed.iter().enumerate() {
            if self.cancel_flag.load(Ordering::SeqCst) {
                tracing::info!("run cancelled at unit boundary");
                report.cancelled = true;
                return Ok(report);
            }
            let is_new = i < new_count;
            match embedded.vector(i) {
                Some(vector) => {
                    self.index_unit(unit, vector.clone(), is_new, run_id, &mut report)
                        .await;
                }
                None => {
                    let message = embedded
                        .failure(i)
                        .unwrap_or("embedding unavailable")
                        .to_string();
                    report.errors.push(UnitError {
                        identity: unit.identity.clone(),
                        kind: UnitErrorKind::Embedding,
                        message,
                    });
                }
            }
        }

        for identity in &diff.removed {
            if self.cancel_flag.load(Ordering::SeqCst) {
                tracing::info!("run cancelled before removals completed");
                report.cancelled = true;
                return Ok(report);
            }
            match self.index.delete(vector_id_for(identity)).await {
                Ok(_) => {
                    // Deletion acknowledged (or already absent) — now the
                    // tracked entry may go.
                    if let Err(err) = self.tracker.confirm_removed(identity).await {
                        report.errors.push(UnitError {
                            identity: identity.clone(),
                            kind: UnitErrorKind::State,
                            message: err.to_string(),
                        });
                        continue;
                    }
                    report.deleted += 1;
                }
                Err(err) => {
                    let transient = err.is_transient();
                    report.errors.push(UnitError {
                        identity: identity.clone(),
                        kind: UnitErrorKind::Store { transient },
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            errors = report.errors.len(),
            "run complete"
        );
        Ok(report)
    }

    /// Upserts one unit and, only on acknowledgement, records it as indexed.
    async fn index_unit(
        &self,
        unit: &ContentUnit,
        vector: Vec<f32>,
        is_new: bool,
        run_id: Uuid,
        report: &mut RunReport,
    ) {
        let point = PointRecord::new(unit.vector_id(), vector, unit.text.clone())
            .with_metadata(unit.metadata.clone());

        match self.index.upsert(vec![point]).await {
            Ok(_) => {
                if let Err(err) = self
                    .tracker
                    .confirm_indexed(&unit.identity, unit.fingerprint(), run_id)
                    .await
                {
                    // The vector is in the store but state lags; the next run
                    // re-attempts and the idempotent upsert makes that safe.
                    report.errors.push(UnitError {
                        identity: unit.identity.clone(),
                        kind: UnitErrorKind::State,
                        message: err.to_string(),
                    });
                    return;
                }
                if is_new {
                    report.inserted += 1;
                } else {
                    report.updated += 1;
                }
            }
            Err(err) => {
                let transient = err.is_transient();
                report.errors.push(UnitError {
                    identity: unit.identity.clone(),
                    kind: UnitErrorKind::Store { transient },
                    message: err.to_string(),
                });
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingProvider;
    use crate::extract::FixtureExtractor;
    use crate::stores::InMemoryVectorIndex;
    use crate::tracker::TrackedState;
    use tempfile::tempdir;

    fn pipeline_with(
        dir: &tempfile::TempDir,
        extractor: Arc<FixtureExtractor>,
    ) -> IndexingPipeline {
        let tracker = ContentTracker::new(TrackedState::new(dir.path().join("state.json")));
        IndexingPipeline::new(
            extractor,
            tracker,
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(InMemoryVectorIndex::new()),
        )
    }

    #[tokio::test]
    async fn empty_extraction_aborts_without_mutation() {
        let dir = tempdir().unwrap();
        let extractor = Arc::new(FixtureExtractor::new(vec![]));
        let pipeline = pipeline_with(&dir, extractor);

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, IndexError::Extraction { .. }));
        assert!(!dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn min_units_threshold_guards_partial_extraction() {
        let dir = tempdir().unwrap();
        let extractor = Arc::new(FixtureExtractor::new(vec![ContentUnit::from_qa(
            "Only one?", "Yes.",
        )]));
        let pipeline = pipeline_with(&dir, extractor).with_min_units(3);

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, IndexError::Extraction { .. }));
    }

    #[tokio::test]
    async fn extraction_failure_propagates() {
        let dir = tempdir().unwrap();
        let extractor = Arc::new(FixtureExtractor::new(vec![ContentUnit::from_qa(
            "Q?", "A.",
        )]));
        extractor.fail_next("source offline");
        let pipeline = pipeline_with(&dir, Arc::clone(&extractor));

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, IndexError::Extraction { .. }));
    }

    #[tokio::test]
    async fn collisions_are_reported_not_merged() {
        let dir = tempdir().unwrap();
        let extractor = Arc::new(FixtureExtractor::new(vec![
            ContentUnit::from_qa("Same question?", "First."),
            ContentUnit::from_qa("Same question?", "Second."),
        ]));
        let pipeline = pipeline_with(&dir, extractor);

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.collisions, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn cancelled_before_first_unit_mutates_nothing() {
        let dir = tempdir().unwrap();
        let extractor = Arc::new(FixtureExtractor::new(vec![ContentUnit::from_qa(
            "Q?", "A.",
        )]));
        let pipeline = pipeline_with(&dir, extractor);

        // Request cancellation while no run is active: the flag is reset at
        // run start, so this must NOT leak into the next run.
        pipeline.cancel_handle().cancel();
        let report = pipeline.run().await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.inserted, 1);
    }
}
