//! Drives one job through the fixed pipeline DAG.
//!
//! Download and chunking are single executor invocations; transcription and
//! correction fan out one invocation per chunk under a bounded worker pool;
//! aggregation is a pure fan-in ordered by sequence index; summarization
//! consumes the aggregate. Every stage transition is persisted to the job
//! store as it settles, and every stage result is an artifact keyed by its
//! canonical input — which is all resumption needs.

use crate::cache::{CacheCoordinator, ComputeOutcome};
use crate::cancellation::CancellationToken;
use crate::config::PipelineSettings;
use crate::errors::MedleyError;
use crate::executor::{FallbackChain, StageExecutor};
use crate::fingerprint::{fingerprint, CanonicalParams};
use crate::job::{Job, JobStatus, JobStatusView, JobStore};
use crate::store::{Artifact, ArtifactStore};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use super::{PipelineInput, PipelineStage, StageChains};

/// Executes pipeline jobs against an artifact store and provider chains.
pub struct PipelineRunner {
    executor: StageExecutor,
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobStore>,
    chains: StageChains,
    settings: PipelineSettings,
}

impl PipelineRunner {
    /// Creates a runner.
    ///
    /// The coordinator and executor are built here so all callers share one
    /// lease table per runner.
    #[must_use]
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        jobs: Arc<dyn JobStore>,
        chains: StageChains,
        settings: PipelineSettings,
    ) -> Self {
        let coordinator = Arc::new(
            CacheCoordinator::new(Arc::clone(&store))
                .with_lease_ttl(settings.lease_ttl)
                .with_store_retry(settings.store_retry.clone()),
        );
        Self {
            executor: StageExecutor::new(coordinator),
            store,
            jobs,
            chains,
            settings,
        }
    }

    /// Submits an input and drives it to a terminal status.
    pub async fn submit(&self, input: PipelineInput) -> Result<Job, MedleyError> {
        self.run(input, &CancellationToken::new()).await
    }

    /// Runs an input under an external cancellation token.
    ///
    /// Returns the terminal job record. Stage failures are captured in the
    /// record rather than bubbling out; only input validation and job-store
    /// failures error here.
    pub async fn run(
        &self,
        input: PipelineInput,
        cancel: &CancellationToken,
    ) -> Result<Job, MedleyError> {
        input.validate()?;

        let mut job = Job::new(input);
        self.jobs.put(&job).await?;
        info!(job_id = %job.job_id, url = %job.input.source_url, "job started");

        match self.drive(&mut job, cancel).await {
            Ok(()) => {
                job.mark_completed();
                info!(job_id = %job.job_id, "job completed");
            }
            Err(MedleyError::Cancelled(reason)) => {
                warn!(job_id = %job.job_id, %reason, "job cancelled");
                job.mark_cancelled(reason);
            }
            Err(error) => {
                warn!(job_id = %job.job_id, error = %error, "job failed");
                job.mark_failed(&error);
            }
        }

        self.jobs.put(&job).await?;
        Ok(job)
    }

    /// Fetches the status view for a previously submitted job.
    pub async fn job_status(&self, job_id: &Uuid) -> Result<Option<JobStatusView>, MedleyError> {
        Ok(self.jobs.get(job_id).await?.map(|job| job.status_view()))
    }

    async fn drive(&self, job: &mut Job, cancel: &CancellationToken) -> Result<(), MedleyError> {
        // Download
        self.transition(job, JobStatus::Downloading).await?;
        let download_params = CanonicalParams::new()
            .field("url", job.input.source_url.clone())
            .opt_time_field("start_time", job.input.start_time)
            .opt_time_field("end_time", job.input.end_time);
        let downloaded = self
            .executor
            .run(PipelineStage::Download, &download_params, &self.chains.download)
            .await?;
        self.settle(job, "download", &downloaded).await?;
        ensure_active(cancel)?;

        // Chunk — keyed off the download artifact's fingerprint, never its
        // bytes, so changing chunk size invalidates nothing upstream.
        self.transition(job, JobStatus::Chunking).await?;
        let chunk_params = CanonicalParams::new()
            .field("source_fingerprint", downloaded.fingerprint.as_str())
            .field("chunk_size_minutes", job.input.chunk_size_minutes);
        let chunked = self
            .executor
            .run(PipelineStage::Chunk, &chunk_params, &self.chains.chunk)
            .await?;
        let chunk_count = chunked.metadata_u64("chunk_count").ok_or_else(|| {
            MedleyError::Internal(format!(
                "chunk artifact {} carries no chunk_count",
                chunked.fingerprint
            ))
        })?;
        self.settle(job, "chunk", &chunked).await?;
        ensure_active(cancel)?;

        // Transcribe ×N
        self.transition(job, JobStatus::Transcribing).await?;
        let chunk_fp = chunked.fingerprint.clone();
        let language = job.input.target_language.clone();
        let transcripts = self
            .fan_out(PipelineStage::Transcribe, chunk_count, &self.chains.transcribe, cancel, {
                let language = language.clone();
                move |index| {
                    CanonicalParams::new()
                        .field("source_fingerprint", chunk_fp.as_str())
                        .field("chunk_index", index)
                        .field("language", language.clone())
                }
            })
            .await?;
        for (index, artifact) in transcripts.iter().enumerate() {
            job.record_fingerprint(format!("transcribe:{index}"), artifact.fingerprint.clone());
        }
        self.jobs.put(job).await?;
        ensure_active(cancel)?;

        // Correct ×N — each keyed off its own transcript's fingerprint.
        self.transition(job, JobStatus::Correcting).await?;
        let transcript_fps: Vec<String> = transcripts
            .iter()
            .map(|artifact| artifact.fingerprint.as_str().to_string())
            .collect();
        let corrections = self
            .fan_out(PipelineStage::Correct, chunk_count, &self.chains.correct, cancel, {
                move |index| {
                    CanonicalParams::new()
                        .field("source_fingerprint", transcript_fps[index as usize].clone())
                        .field("chunk_index", index)
                        .field("language", language.clone())
                }
            })
            .await?;
        for (index, artifact) in corrections.iter().enumerate() {
            job.record_fingerprint(format!("correct:{index}"), artifact.fingerprint.clone());
        }
        self.jobs.put(job).await?;
        ensure_active(cancel)?;

        // Aggregate
        self.transition(job, JobStatus::Aggregating).await?;
        let aggregated = self.aggregate(&corrections).await?;
        self.settle(job, "aggregate", &aggregated).await?;
        ensure_active(cancel)?;

        // Summarize
        self.transition(job, JobStatus::Summarizing).await?;
        let summary_params = CanonicalParams::new()
            .field("source_fingerprint", aggregated.fingerprint.as_str())
            .opt_field("instructions", job.input.summary_instructions.clone())
            .opt_field("word_limit", job.input.summary_word_limit);
        let summary = self
            .executor
            .run(PipelineStage::Summarize, &summary_params, &self.chains.summarize)
            .await?;
        self.settle(job, "summarize", &summary).await?;

        Ok(())
    }

    /// Runs one executor invocation per chunk under the concurrency ceiling.
    ///
    /// Sibling chunks are independent: one failure never blocks the others,
    /// and the stage settles only once every chunk has succeeded, exhausted
    /// its chain, or been skipped by cancellation. Results come back in
    /// sequence-index order regardless of completion order.
    async fn fan_out<P>(
        &self,
        stage: PipelineStage,
        count: u64,
        chain: &FallbackChain,
        cancel: &CancellationToken,
        params_for: P,
    ) -> Result<Vec<Artifact>, MedleyError>
    where
        P: Fn(u64) -> CanonicalParams,
    {
        let semaphore = Arc::new(Semaphore::new(self.settings.chunk_concurrency));
        let mut tasks = FuturesUnordered::new();
        for index in 0..count {
            let params = params_for(index);
            let executor = self.executor.clone();
            let chain = chain.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (index, Err(MedleyError::Cancelled("worker pool closed".to_string())));
                    }
                };
                // Not-yet-started work is skipped on cancellation; anything
                // already past this check runs to completion and gets cached.
                if cancel.is_cancelled() {
                    let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                    return (index, Err(MedleyError::Cancelled(reason)));
                }
                (index, executor.run(stage, &params, &chain).await)
            }));
        }

        let mut settled: Vec<Option<Artifact>> = (0..count).map(|_| None).collect();
        let mut first_failure: Option<(u64, MedleyError)> = None;
        while let Some(joined) = tasks.next().await {
            let (index, result) = joined
                .map_err(|err| MedleyError::Internal(format!("chunk task join error: {err}")))?;
            match result {
                Ok(artifact) => {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        settled[index as usize] = Some(artifact);
                    }
                }
                Err(MedleyError::Cancelled(_)) => {}
                Err(error) => {
                    warn!(stage = stage.name(), chunk = index, error = %error, "chunk failed");
                    if first_failure.as_ref().map_or(true, |(first, _)| index < *first) {
                        first_failure = Some((index, error));
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
            return Err(MedleyError::Cancelled(reason));
        }
        if let Some((_, error)) = first_failure {
            return Err(error);
        }
        settled
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    MedleyError::Internal(format!("{stage} chunk never settled"))
                })
            })
            .collect()
    }

    /// Concatenates corrected chunks in sequence-index order.
    ///
    /// No external call and no retry policy; the result is still cached
    /// under a fingerprint derived from the ordered source fingerprints.
    async fn aggregate(&self, sources: &[Artifact]) -> Result<Artifact, MedleyError> {
        let ordered: Vec<&str> = sources
            .iter()
            .map(|artifact| artifact.fingerprint.as_str())
            .collect();
        let params = CanonicalParams::new().field("sources", ordered).into_value();
        let key = fingerprint(PipelineStage::Aggregate.name(), &params)?;

        let store = Arc::clone(&self.store);
        let sources = sources.to_vec();
        self.executor
            .coordinator()
            .get_or_compute(&key, PipelineStage::Aggregate.name(), move || {
                let store = Arc::clone(&store);
                let sources = sources.clone();
                async move {
                    let mut pieces = Vec::with_capacity(sources.len());
                    for artifact in &sources {
                        let bytes = store.read_payload(artifact).await?;
                        pieces.push(String::from_utf8_lossy(&bytes).into_owned());
                    }
                    let text = pieces.join("\n\n");
                    Ok(ComputeOutcome::new(text.into_bytes())
                        .with_metadata("chunk_count", json!(sources.len()))
                        .with_metadata("characters", json!(pieces.iter().map(String::len).sum::<usize>())))
                }
            })
            .await
    }

    async fn transition(&self, job: &mut Job, status: JobStatus) -> Result<(), MedleyError> {
        job.status = status;
        info!(job_id = %job.job_id, status = %status, "stage transition");
        self.jobs.put(job).await?;
        Ok(())
    }

    /// Records a single-invocation stage's fingerprint and persists the job.
    async fn settle(&self, job: &mut Job, key: &str, artifact: &Artifact) -> Result<(), MedleyError> {
        job.record_fingerprint(key, artifact.fingerprint.clone());
        self.jobs.put(job).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("settings", &self.settings)
            .finish()
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), MedleyError> {
    if cancel.is_cancelled() {
        let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
        return Err(MedleyError::Cancelled(reason));
    }
    Ok(())
}
