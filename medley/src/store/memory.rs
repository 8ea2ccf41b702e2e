//! In-memory artifact store for tests and embedded use.

use super::{Artifact, ArtifactStore, NewArtifact, StoreError};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct StoredEntry {
    artifact: Artifact,
    payload: Arc<Vec<u8>>,
}

/// A concurrent in-memory artifact store.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    entries: DashMap<Fingerprint, StoredEntry>,
    writes: AtomicUsize,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no artifacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of writes that actually materialized an artifact.
    ///
    /// Idempotent re-puts of an existing fingerprint do not count.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InMemoryArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryArtifactStore")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, StoreError> {
        Ok(self
            .entries
            .get(fingerprint)
            .map(|entry| entry.artifact.clone()))
    }

    async fn put(&self, artifact: NewArtifact) -> Result<Artifact, StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(artifact.fingerprint.clone()) {
            Entry::Occupied(existing) => Ok(existing.get().artifact.clone()),
            Entry::Vacant(slot) => {
                let committed = Artifact {
                    fingerprint: artifact.fingerprint.clone(),
                    stage_name: artifact.stage_name.clone(),
                    payload_location: format!(
                        "mem:{}/{}",
                        artifact.stage_name, artifact.fingerprint
                    ),
                    payload_metadata: artifact.metadata,
                    created_at: Utc::now(),
                    producer_attempts: artifact.producer_attempts,
                };
                slot.insert(StoredEntry {
                    artifact: committed.clone(),
                    payload: Arc::new(artifact.payload),
                });
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(committed)
            }
        }
    }

    async fn read_payload(&self, artifact: &Artifact) -> Result<Vec<u8>, StoreError> {
        self.entries
            .get(&artifact.fingerprint)
            .map(|entry| entry.payload.as_ref().clone())
            .ok_or_else(|| {
                StoreError::Unavailable(format!(
                    "payload missing for {}",
                    artifact.fingerprint
                ))
            })
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.entries.remove(fingerprint);
        Ok(())
    }
}
