//! Durable record of what is currently indexed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::{Fingerprint, IndexError};

/// What the pipeline remembers about one indexed unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntry {
    /// Fingerprint of the content as last confirmed in the vector store.
    pub fingerprint: Fingerprint,
    /// Run that most recently saw this identity, changed or not.
    pub last_seen_run_id: Uuid,
    /// Deterministic vector-store record id.
    pub vector_id: Uuid,
}

/// Persisted `identity -> TrackedEntry` mapping — the pipeline's memory of
/// "what is currently indexed".
///
/// The map lives on disk as JSON and survives restarts, so a run after a
/// crash reuses existing state instead of re-embedding everything. Entries
/// are only written after the corresponding vector-store mutation has been
/// acknowledged; a crash therefore leaves the state lagging reality, and the
/// next run's diff re-attempts whatever was not confirmed.
#[derive(Clone, Debug)]
pub struct TrackedState {
    path: PathBuf,
    entries: Arc<Mutex<HashMap<String, TrackedEntry>>>,
}

impl TrackedState {
    /// Creates a state handle persisting to the provided path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads previously persisted entries, if the file exists.
    pub async fn load(&self) -> Result<(), IndexError> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&self.path).await?;
        let entries: HashMap<String, TrackedEntry> =
            serde_json::from_str(&data).map_err(|err| IndexError::State(err.to_string()))?;
        let mut guard = self.entries.lock().await;
        *guard = entries;
        Ok(())
    }

    /// Clones the current mapping for diffing.
    pub async fn snapshot(&self) -> HashMap<String, TrackedEntry> {
        self.entries.lock().await.clone()
    }

    /// Returns the entry for an identity, if tracked.
    pub async fn get(&self, identity: &str) -> Option<TrackedEntry> {
        self.entries.lock().await.get(identity).cloned()
    }

    /// Number of tracked identities.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True when nothing is tracked.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Inserts or replaces an entry and persists the mapping.
    pub async fn put(&self, identity: &str, entry: TrackedEntry) -> Result<(), IndexError> {
        let mut guard = self.entries.lock().await;
        guard.insert(identity.to_string(), entry);
        let serialized = Self::serialize(&guard)?;
        drop(guard);
        self.write(&serialized).await
    }

    /// Refreshes `last_seen_run_id` for the given identities and persists
    /// once.
    pub async fn refresh_seen(&self, identities: &[String], run_id: Uuid) -> Result<(), IndexError> {
        if identities.is_empty() {
            return Ok(());
        }
        let mut guard = self.entries.lock().await;
        for identity in identities {
            if let Some(entry) = guard.get_mut(identity) {
                entry.last_seen_run_id = run_id;
            }
        }
        let serialized = Self::serialize(&guard)?;
        drop(guard);
        self.write(&serialized).await
    }

    /// Removes an entry and persists the mapping. Removing an untracked
    /// identity is a no-op.
    pub async fn remove(&self, identity: &str) -> Result<(), IndexError> {
        let mut guard = self.entries.lock().await;
        if guard.remove(identity).is_none() {
            return Ok(());
        }
        let serialized = Self::serialize(&guard)?;
        drop(guard);
        self.write(&serialized).await
    }

    fn serialize(entries: &HashMap<String, TrackedEntry>) -> Result<String, IndexError> {
        serde_json::to_string(entries).map_err(|err| IndexError::State(err.to_string()))
    }

    async fn write(&self, serialized: &str) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, serialized).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentUnit, vector_id_for};
    use tempfile::tempdir;

    fn entry_for(unit: &ContentUnit, run_id: Uuid) -> TrackedEntry {
        TrackedEntry {
            fingerprint: unit.fingerprint(),
            last_seen_run_id: run_id,
            vector_id: vector_id_for(&unit.identity),
        }
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let run_id = Uuid::new_v4();
        let unit = ContentUnit::from_qa("How do I pay?", "Use the billing page.");

        let state = TrackedState::new(&path);
        state.load().await.unwrap();
        state
            .put(&unit.identity, entry_for(&unit, run_id))
            .await
            .unwrap();

        let reloaded = TrackedState::new(&path);
        reloaded.load().await.unwrap();
        let entry = reloaded.get(&unit.identity).await.unwrap();
        assert_eq!(entry.fingerprint, unit.fingerprint());
        assert_eq!(entry.last_seen_run_id, run_id);
    }

    #[tokio::test]
    async fn remove_untracked_is_noop() {
        let dir = tempdir().unwrap();
        let state = TrackedState::new(dir.path().join("state.json"));
        state.remove("never seen").await.unwrap();
        assert!(state.is_empty().await);
    }

    #[tokio::test]
    async fn refresh_updates_only_known_identities() {
        let dir = tempdir().unwrap();
        let state = TrackedState::new(dir.path().join("state.json"));
        let first_run = Uuid::new_v4();
        let unit = ContentUnit::from_qa("Q?", "A.");
        state
            .put(&unit.identity, entry_for(&unit, first_run))
            .await
            .unwrap();

        let second_run = Uuid::new_v4();
        state
            .refresh_seen(
                &[unit.identity.clone(), "unknown".to_string()],
                second_run,
            )
            .await
            .unwrap();

        assert_eq!(
            state.get(&unit.identity).await.unwrap().last_seen_run_id,
            second_run
        );
        assert_eq!(state.len().await, 1);
    }
}
