//! Job records: one pipeline invocation's status and artifact lineage.
//!
//! A job never owns artifact bytes. It references fingerprints, which is
//! what makes resumption cheap: resubmitting an equivalent input reuses
//! any artifact whose fingerprint already exists in the store, regardless
//! of which prior job produced it.

use crate::errors::MedleyError;
use crate::fingerprint::Fingerprint;
use crate::pipeline::{PipelineInput, PipelineStage};
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle status of a pipeline job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet started.
    Pending,
    /// Fetching the source media.
    Downloading,
    /// Splitting the source into chunks.
    Chunking,
    /// Per-chunk transcription in flight.
    Transcribing,
    /// Per-chunk correction in flight.
    Correcting,
    /// Fan-in of corrected chunks.
    Aggregating,
    /// Producing the final summary.
    Summarizing,
    /// All stages finished.
    Completed,
    /// A stage exhausted its fallback chain.
    Failed,
    /// The run was cancelled before completion.
    Cancelled,
}

impl JobStatus {
    /// Returns true for states no transition leaves.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The stage being executed while in this status, if any.
    #[must_use]
    pub fn active_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Downloading => Some(PipelineStage::Download),
            Self::Chunking => Some(PipelineStage::Chunk),
            Self::Transcribing => Some(PipelineStage::Transcribe),
            Self::Correcting => Some(PipelineStage::Correct),
            Self::Aggregating => Some(PipelineStage::Aggregate),
            Self::Summarizing => Some(PipelineStage::Summarize),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Chunking => "chunking",
            Self::Transcribing => "transcribing",
            Self::Correcting => "correcting",
            Self::Aggregating => "aggregating",
            Self::Summarizing => "summarizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identity.
    pub job_id: Uuid,
    /// The submitted input parameters.
    pub input: PipelineInput,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Ordered stage→fingerprint lineage, in completion order.
    pub stage_fingerprints: IndexMap<String, Fingerprint>,
    /// The stage that failed, when status is `Failed`.
    pub failed_stage: Option<String>,
    /// Error detail for failed or cancelled runs.
    pub error_detail: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job for the given input.
    #[must_use]
    pub fn new(input: PipelineInput) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            input,
            status: JobStatus::Pending,
            stage_fingerprints: IndexMap::new(),
            failed_stage: None,
            error_detail: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Records the fingerprint a stage settled on.
    pub fn record_fingerprint(&mut self, key: impl Into<String>, fingerprint: Fingerprint) {
        self.stage_fingerprints.insert(key.into(), fingerprint);
    }

    /// Looks up a recorded fingerprint.
    #[must_use]
    pub fn fingerprint_for(&self, key: &str) -> Option<&Fingerprint> {
        self.stage_fingerprints.get(key)
    }

    /// Marks the job completed.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the job failed at the stage implied by its current status.
    pub fn mark_failed(&mut self, error: &MedleyError) {
        self.failed_stage = self
            .status
            .active_stage()
            .map(|stage| stage.name().to_string());
        self.status = JobStatus::Failed;
        self.error_detail = Some(error.detail());
        self.finished_at = Some(Utc::now());
    }

    /// Marks the job cancelled.
    pub fn mark_cancelled(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Cancelled;
        self.error_detail = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    /// A read-only view for the submission boundary.
    #[must_use]
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id,
            status: self.status,
            completed_stages: self.stage_fingerprints.keys().cloned().collect(),
            failed_stage: self.failed_stage.clone(),
            error_detail: self.error_detail.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// What the orchestration layer sees when it polls a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Job identity.
    pub job_id: Uuid,
    /// Current status.
    pub status: JobStatus,
    /// Stage keys that have settled, in order.
    pub completed_stages: Vec<String>,
    /// The failed stage, if any.
    pub failed_stage: Option<String>,
    /// Error detail, if any.
    pub error_detail: Option<String>,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Terminal time, if reached.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Durable storage for job records, keyed by job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Looks up a job record.
    async fn get(&self, job_id: &Uuid) -> Result<Option<Job>, StoreError>;

    /// Writes (or overwrites) a job record.
    async fn put(&self, job: &Job) -> Result<(), StoreError>;
}

/// In-memory job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, Job>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: &Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.get(job_id).map(|job| job.clone()))
    }

    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.insert(job.job_id, job.clone());
        Ok(())
    }
}

/// Filesystem job store: one JSON record per job under `jobs/`.
#[derive(Debug, Clone)]
pub struct FsJobStore {
    dir: PathBuf,
}

impl FsJobStore {
    /// Opens (and creates if needed) a job store under `root/jobs`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = root.as_ref().join("jobs");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, job_id: &Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn get(&self, job_id: &Uuid) -> Result<Option<Job>, StoreError> {
        let path = self.record_path(job_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let tmp = self.dir.join(format!(".tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(job)?).await?;
        tokio::fs::rename(&tmp, self.record_path(&job.job_id)).await?;
        Ok(())
    }
}
