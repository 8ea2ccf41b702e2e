//! Durable, content-addressed artifact storage.
//!
//! The store owns artifact bytes exclusively; stages only ever hold read
//! references. Writes are commit-or-nothing and idempotent, so a reader can
//! never observe a partially written artifact and duplicate producers are
//! harmless.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::InMemoryArtifactStore;

use crate::errors::MedleyError;
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// A cached, immutable output of one stage invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// The fingerprint this artifact is stored under.
    pub fingerprint: Fingerprint,
    /// The stage that produced it.
    pub stage_name: String,
    /// Reference to the payload bytes (path or object key).
    pub payload_location: String,
    /// Stage-specific descriptive fields (chunk count, model, language, ...).
    #[serde(default)]
    pub payload_metadata: HashMap<String, serde_json::Value>,
    /// When the artifact was committed.
    pub created_at: DateTime<Utc>,
    /// How many provider attempts the producing computation needed.
    pub producer_attempts: u32,
}

impl Artifact {
    /// Reads a metadata field as an unsigned integer.
    #[must_use]
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.payload_metadata.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Reads a metadata field as a string.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.payload_metadata.get(key).and_then(serde_json::Value::as_str)
    }
}

/// A pending artifact write.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    /// The fingerprint to store under.
    pub fingerprint: Fingerprint,
    /// The producing stage.
    pub stage_name: String,
    /// The payload bytes.
    pub payload: Vec<u8>,
    /// Stage-specific descriptive fields.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Provider attempts the computation needed.
    pub producer_attempts: u32,
}

/// Errors surfaced by artifact store backends.
///
/// All I/O failures collapse into `Unavailable` so callers can retry them
/// uniformly; corruption is never an error (a corrupt record reads as a
/// miss, forcing recomputation).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<StoreError> for MedleyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => Self::StoreUnavailable(message),
        }
    }
}

/// Durable key→artifact storage with atomic write semantics.
///
/// Both local filesystem and object storage are valid backends; the
/// coordinator only depends on this contract.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Looks up an artifact by fingerprint.
    ///
    /// Returns `Ok(None)` both for missing entries and for entries whose
    /// record is malformed or whose payload is gone, so the cache heals
    /// itself by recomputing.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, StoreError>;

    /// Commits an artifact.
    ///
    /// Must be atomic with respect to crash and concurrent readers. If an
    /// artifact already exists under the fingerprint, this is a no-op that
    /// returns the existing artifact.
    async fn put(&self, artifact: NewArtifact) -> Result<Artifact, StoreError>;

    /// Reads the payload bytes an artifact refers to.
    async fn read_payload(&self, artifact: &Artifact) -> Result<Vec<u8>, StoreError>;

    /// Removes an artifact.
    ///
    /// Explicit invalidation for maintenance tooling only; the pipeline
    /// never calls this.
    async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), StoreError>;
}
