//! Change tracking: classifies each extracted unit against persisted state.
//!
//! The tracker is the single writer of [`TrackedState`]; the pipeline never
//! touches the persisted mapping directly. Classification relies on content
//! fingerprints only — no network, no vector comparison.

pub mod state;

use std::collections::HashMap;

use uuid::Uuid;

use crate::types::{ContentUnit, Fingerprint, IndexError, vector_id_for};

pub use state::{TrackedEntry, TrackedState};

/// Result of diffing one extraction snapshot against the persisted state.
#[derive(Debug, Clone, Default)]
pub struct UnitDiff {
    /// Units with no prior entry.
    pub new: Vec<ContentUnit>,
    /// Units whose fingerprint differs from the tracked one.
    pub changed: Vec<ContentUnit>,
    /// Identities seen with an unchanged fingerprint.
    pub unchanged: Vec<String>,
    /// Tracked identities absent from this extraction.
    pub removed: Vec<String>,
    /// Duplicate identities dropped from the snapshot (later unit wins).
    pub collisions: usize,
}

impl UnitDiff {
    /// Units that require (re-)embedding: new first, then changed.
    pub fn to_embed(&self) -> impl Iterator<Item = &ContentUnit> {
        self.new.iter().chain(self.changed.iter())
    }

    /// True when nothing needs embedding or deletion.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Owns the persisted [`TrackedState`] and classifies extraction snapshots.
#[derive(Clone, Debug)]
pub struct ContentTracker {
    state: TrackedState,
}

impl ContentTracker {
    /// Wraps a state handle. The pipeline calls [`ContentTracker::load`] on
    /// its first run; call it yourself when driving the tracker directly.
    pub fn new(state: TrackedState) -> Self {
        Self { state }
    }

    /// Loads persisted state from disk.
    pub async fn load(&self) -> Result<(), IndexError> {
        self.state.load().await
    }

    /// Classifies each unit as NEW, CHANGED, UNCHANGED, or REMOVED relative
    /// to the persisted state.
    ///
    /// Duplicate identities within one extraction collapse to the later unit
    /// in extraction order; each collision is logged, never silently merged.
    /// The caller is responsible for the empty-extraction guard — an empty
    /// snapshot handed to `diff` would classify every tracked identity as
    /// removed.
    pub async fn diff(&self, units: &[ContentUnit]) -> UnitDiff {
        let mut collisions = 0usize;
        let mut snapshot: HashMap<String, ContentUnit> = HashMap::with_capacity(units.len());
        let mut order: Vec<String> = Vec::with_capacity(units.len());
        for unit in units {
            if snapshot.insert(unit.identity.clone(), unit.clone()).is_some() {
                collisions += 1;
                tracing::warn!(
                    identity = %unit.identity,
                    "identity collision in extraction; keeping the later unit"
                );
            } else {
                order.push(unit.identity.clone());
            }
        }

        let previous = self.state.snapshot().await;
        let mut diff = UnitDiff {
            collisions,
            ..Default::default()
        };

        for identity in &order {
            let unit = &snapshot[identity];
            match previous.get(identity) {
                None => diff.new.push(unit.clone()),
                Some(entry) if entry.fingerprint != unit.fingerprint() => {
                    diff.changed.push(unit.clone());
                }
                Some(_) => diff.unchanged.push(identity.clone()),
            }
        }

        let mut removed: Vec<String> = previous
            .keys()
            .filter(|identity| !snapshot.contains_key(*identity))
            .cloned()
            .collect();
        removed.sort();
        diff.removed = removed;

        diff
    }

    /// Records that a unit's vector was upserted and acknowledged.
    ///
    /// Must be called only after the store confirmed the mutation —
    /// write-after-confirm is what keeps TrackedState from claiming a unit
    /// is indexed when it is not.
    pub async fn confirm_indexed(
        &self,
        identity: &str,
        fingerprint: Fingerprint,
        run_id: Uuid,
    ) -> Result<(), IndexError> {
        self.state
            .put(
                identity,
                TrackedEntry {
                    fingerprint,
                    last_seen_run_id: run_id,
                    vector_id: vector_id_for(identity),
                },
            )
            .await
    }

    /// Refreshes `last_seen_run_id` for unchanged identities.
    pub async fn refresh_seen(
        &self,
        identities: &[String],
        run_id: Uuid,
    ) -> Result<(), IndexError> {
        self.state.refresh_seen(identities, run_id).await
    }

    /// Records that a unit's vector deletion was acknowledged.
    pub async fn confirm_removed(&self, identity: &str) -> Result<(), IndexError> {
        self.state.remove(identity).await
    }

    /// Number of identities currently tracked.
    pub async fn tracked_len(&self) -> usize {
        self.state.len().await
    }

    /// Entry for an identity, if tracked.
    pub async fn entry(&self, identity: &str) -> Option<TrackedEntry> {
        self.state.get(identity).await
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn tracker_in(dir: &tempfile::TempDir) -> ContentTracker {
        let tracker = ContentTracker::new(TrackedState::new(dir.path().join("state.json")));
        tracker.load().await.unwrap();
        tracker
    }

    fn qa(question: &str, answer: &str) -> ContentUnit {
        ContentUnit::from_qa(question, answer)
    }

    #[tokio::test]
    async fn first_sight_is_new() {
        let dir = tempdir().unwrap();
        let tracker = tracker_in(&dir).await;

        let diff = tracker.diff(&[qa("How do I pay?", "Billing page.")]).await;
        assert_eq!(diff.new.len(), 1);
        assert!(diff.changed.is_empty());
        assert!(diff.unchanged.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[tokio::test]
    async fn confirmed_unit_becomes_unchanged_then_changed() {
        let dir = tempdir().unwrap();
        let tracker = tracker_in(&dir).await;
        let run_id = Uuid::new_v4();
        let unit = qa("How do I pay?", "Billing page.");
        tracker
            .confirm_indexed(&unit.identity, unit.fingerprint(), run_id)
            .await
            .unwrap();

        let diff = tracker.diff(std::slice::from_ref(&unit)).await;
        assert_eq!(diff.unchanged, vec![unit.identity.clone()]);
        assert!(diff.is_noop());

        let edited = qa("How do I pay?", "Billing page, or ask support.");
        let diff = tracker.diff(std::slice::from_ref(&edited)).await;
        assert_eq!(diff.changed.len(), 1);
        assert!(diff.new.is_empty());
    }

    #[tokio::test]
    async fn absent_identity_is_removed() {
        let dir = tempdir().unwrap();
        let tracker = tracker_in(&dir).await;
        let run_id = Uuid::new_v4();
        let old = qa("Old question?", "Old answer.");
        tracker
            .confirm_indexed(&old.identity, old.fingerprint(), run_id)
            .await
            .unwrap();

        let replacement = qa("New question?", "New answer.");
        let diff = tracker.diff(std::slice::from_ref(&replacement)).await;
        assert_eq!(diff.removed, vec![old.identity.clone()]);
        assert_eq!(diff.new.len(), 1);
    }

    #[tokio::test]
    async fn later_duplicate_wins_and_is_counted() {
        let dir = tempdir().unwrap();
        let tracker = tracker_in(&dir).await;

        let first = qa("Same question?", "First answer.");
        let second = qa("Same question?", "Second answer.");
        let diff = tracker.diff(&[first, second.clone()]).await;

        assert_eq!(diff.collisions, 1);
        assert_eq!(diff.new.len(), 1);
        assert_eq!(diff.new[0].text, second.text);
    }

    #[tokio::test]
    async fn removed_then_reappearing_is_new_again() {
        let dir = tempdir().unwrap();
        let tracker = tracker_in(&dir).await;
        let run_id = Uuid::new_v4();
        let unit = qa("Comeback?", "Yes.");
        tracker
            .confirm_indexed(&unit.identity, unit.fingerprint(), run_id)
            .await
            .unwrap();
        tracker.confirm_removed(&unit.identity).await.unwrap();

        let diff = tracker.diff(std::slice::from_ref(&unit)).await;
        assert_eq!(diff.new.len(), 1);
    }
}
