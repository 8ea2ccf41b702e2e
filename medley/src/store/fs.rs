//! Filesystem-backed artifact store.
//!
//! Layout is stage-namespaced: `<root>/<stage>/<fingerprint>.json` holds the
//! artifact record and `<root>/<stage>/<fingerprint>.bin` the payload bytes.
//! Both are staged under temporary names and committed with an atomic
//! rename; the record rename is the commit point, and the payload is always
//! in place before it happens.

use super::{Artifact, ArtifactStore, NewArtifact, StoreError};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Directory reserved for job records; never scanned for artifacts.
const JOBS_DIR: &str = "jobs";

/// Artifact store over a local directory tree.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, stage_name: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(stage_name).join(format!("{fingerprint}.json"))
    }

    fn payload_rel(stage_name: &str, fingerprint: &Fingerprint) -> String {
        format!("{stage_name}/{fingerprint}.bin")
    }

    /// Finds the record file for a fingerprint by scanning stage directories.
    async fn find_record(&self, fingerprint: &Fingerprint) -> Result<Option<PathBuf>, StoreError> {
        let mut dirs = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if entry.file_name() == JOBS_DIR {
                continue;
            }
            let candidate = entry.path().join(format!("{fingerprint}.json"));
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn write_atomic(&self, dir: &Path, final_path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, final_path).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, StoreError> {
        let Some(record_path) = self.find_record(fingerprint).await? else {
            return Ok(None);
        };

        let bytes = tokio::fs::read(&record_path).await?;
        let artifact: Artifact = match serde_json::from_slice(&bytes) {
            Ok(artifact) => artifact,
            Err(error) => {
                // Corrupt records read as a miss so the cache heals itself.
                warn!(
                    fingerprint = %fingerprint,
                    path = %record_path.display(),
                    %error,
                    "discarding malformed artifact record"
                );
                return Ok(None);
            }
        };

        if !tokio::fs::try_exists(self.root.join(&artifact.payload_location)).await? {
            warn!(
                fingerprint = %fingerprint,
                location = %artifact.payload_location,
                "artifact record has no payload; treating as missing"
            );
            return Ok(None);
        }

        Ok(Some(artifact))
    }

    async fn put(&self, artifact: NewArtifact) -> Result<Artifact, StoreError> {
        if let Some(existing) = self.get(&artifact.fingerprint).await? {
            return Ok(existing);
        }

        let stage_dir = self.root.join(&artifact.stage_name);
        tokio::fs::create_dir_all(&stage_dir).await?;

        let payload_location = Self::payload_rel(&artifact.stage_name, &artifact.fingerprint);
        let committed = Artifact {
            fingerprint: artifact.fingerprint.clone(),
            stage_name: artifact.stage_name.clone(),
            payload_location: payload_location.clone(),
            payload_metadata: artifact.metadata,
            created_at: Utc::now(),
            producer_attempts: artifact.producer_attempts,
        };

        // Payload first; the record rename is the commit point.
        self.write_atomic(
            &stage_dir,
            &self.root.join(&payload_location),
            &artifact.payload,
        )
        .await?;
        let record = serde_json::to_vec_pretty(&committed)?;
        self.write_atomic(
            &stage_dir,
            &self.record_path(&artifact.stage_name, &artifact.fingerprint),
            &record,
        )
        .await?;

        Ok(committed)
    }

    async fn read_payload(&self, artifact: &Artifact) -> Result<Vec<u8>, StoreError> {
        Ok(tokio::fs::read(self.root.join(&artifact.payload_location)).await?)
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        let Some(record_path) = self.find_record(fingerprint).await? else {
            return Ok(());
        };

        let payload_path = match tokio::fs::read(&record_path).await {
            Ok(bytes) => serde_json::from_slice::<Artifact>(&bytes)
                .ok()
                .map(|artifact| self.root.join(artifact.payload_location)),
            Err(_) => None,
        };

        // Record first so no reader can observe a record without bytes.
        tokio::fs::remove_file(&record_path).await?;
        if let Some(payload_path) = payload_path {
            if tokio::fs::try_exists(&payload_path).await? {
                tokio::fs::remove_file(&payload_path).await?;
            }
        }
        Ok(())
    }
}
