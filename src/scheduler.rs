//! Interval scheduling for the indexing pipeline.
//!
//! Deliberately thin: the loop only decides *when* to call
//! [`IndexingPipeline::run`] and logs the outcome. All indexing semantics
//! (diffing, consistency, error tolerance) live in the pipeline. A tick that
//! lands while a run is active is skipped, never queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::pipeline::IndexingPipeline;
use crate::types::IndexError;

/// Drives pipeline runs on a fixed interval until shutdown is signalled.
///
/// The first run fires immediately; subsequent runs fire every `interval`.
/// Send `true` on the watch channel to stop the loop after the current
/// await point.
pub async fn run_on_interval(
    pipeline: Arc<IndexingPipeline>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_once(&pipeline).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("scheduler shutting down");
                    return;
                }
            }
        }
    }
}

async fn run_once(pipeline: &IndexingPipeline) {
    match pipeline.run().await {
        Ok(report) => {
            if report.has_errors() {
                tracing::warn!(
                    run_id = %report.run_id,
                    errors = report.errors.len(),
                    "scheduled run completed with unit errors"
                );
            } else {
                tracing::info!(
                    run_id = %report.run_id,
                    inserted = report.inserted,
                    updated = report.updated,
                    deleted = report.deleted,
                    "scheduled run completed"
                );
            }
        }
        // A tick overlapping an active run is expected under load.
        Err(IndexError::Busy) => {
            tracing::warn!("previous run still active, skipping this tick");
        }
        Err(err) => {
            tracing::error!(error = %err, "scheduled run failed");
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
