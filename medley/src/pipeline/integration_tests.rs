//! End-to-end pipeline tests over in-memory stores and mock providers.

use crate::cancellation::CancellationToken;
use crate::config::PipelineSettings;
use crate::errors::{MedleyError, ProviderError};
use crate::executor::{FallbackChain, ProviderDescriptor, RetryPolicy};
use crate::job::{InMemoryJobStore, JobStatus, JobStore};
use crate::pipeline::{PipelineInput, PipelineRunner};
use crate::providers::{Provider, ProviderOutput};
use crate::store::{ArtifactStore, InMemoryArtifactStore};
use crate::testing::{mock_chains, sample_input, ScriptedProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transcribes chunk `i` after a delay inversely proportional to `i`, so
/// later chunks finish first.
struct ReverseOrderTranscriber {
    chunk_count: u64,
}

#[async_trait]
impl Provider for ReverseOrderTranscriber {
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError> {
        let index = input.get("chunk_index").and_then(Value::as_u64).unwrap_or(0);
        let delay = 20 * (self.chunk_count - index);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(ProviderOutput::from_text(format!("transcript of chunk {index}")))
    }
}

/// Cancels the shared token from inside its first invocation.
struct CancellingTranscriber {
    token: CancellationToken,
    calls: AtomicUsize,
}

#[async_trait]
impl Provider for CancellingTranscriber {
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.cancel("stop requested");
        let index = input.get("chunk_index").and_then(Value::as_u64).unwrap_or(0);
        Ok(ProviderOutput::from_text(format!("transcript of chunk {index}")))
    }
}

fn fast_settings() -> PipelineSettings {
    PipelineSettings::default().with_store_retry(RetryPolicy::immediate(3))
}

fn failing_chain(id: &str, error: ProviderError) -> FallbackChain {
    FallbackChain::new().with_provider(
        ProviderDescriptor::new(
            id,
            Arc::new(ScriptedProvider::always_err(error)) as Arc<dyn Provider>,
        )
        .with_retry(RetryPolicy::immediate(2)),
    )
}

#[tokio::test]
async fn full_pipeline_completes_and_aggregates_in_order() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let (chains, _set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    let runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        jobs,
        chains,
        fast_settings(),
    );

    let job = runner.submit(sample_input()).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.finished_at.is_some());
    let keys: Vec<_> = job.stage_fingerprints.keys().cloned().collect();
    assert_eq!(
        keys,
        vec![
            "download",
            "chunk",
            "transcribe:0",
            "transcribe:1",
            "transcribe:2",
            "correct:0",
            "correct:1",
            "correct:2",
            "aggregate",
            "summarize",
        ]
    );

    let aggregate = store
        .get(job.fingerprint_for("aggregate").unwrap())
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(store.read_payload(&aggregate).await.unwrap()).unwrap();
    assert_eq!(
        text,
        "corrected: transcript of chunk 0\n\n\
         corrected: transcript of chunk 1\n\n\
         corrected: transcript of chunk 2"
    );
}

#[tokio::test]
async fn resubmitting_an_identical_input_recomputes_nothing() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let (chains, set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    let runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        jobs,
        chains,
        fast_settings(),
    );

    let first = runner.submit(sample_input()).await.unwrap();
    let second = runner.submit(sample_input()).await.unwrap();

    assert_eq!(second.status, JobStatus::Completed);
    assert_ne!(second.job_id, first.job_id);
    assert_eq!(second.stage_fingerprints, first.stage_fingerprints);
    // One computation per unique fingerprint across both jobs.
    assert_eq!(set.download.calls(), 1);
    assert_eq!(set.chunk.calls(), 1);
    assert_eq!(set.transcribe.calls(), 3);
    assert_eq!(set.correct.calls(), 3);
    assert_eq!(set.summarize.calls(), 1);
}

#[tokio::test]
async fn failure_at_correcting_resumes_from_correcting() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());

    // First submission: correction is down.
    let (mut broken_chains, first_set) =
        mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    broken_chains.correct = failing_chain("mock-mistral", ProviderError::timeout("provider down"));
    let broken_runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        broken_chains,
        fast_settings(),
    );

    let failed = broken_runner.submit(sample_input()).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failed_stage.as_deref(), Some("correct"));
    let detail = failed.error_detail.as_deref().unwrap();
    assert!(detail.contains("mock-mistral"), "missing provider in {detail}");
    assert!(detail.contains("2 attempt(s)"), "missing attempts in {detail}");
    assert!(failed.fingerprint_for("transcribe:2").is_some());
    assert!(failed.fingerprint_for("correct:0").is_none());

    // Resubmission with a healthy chain: upstream stages come from cache.
    let (healthy_chains, second_set) =
        mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    let healthy_runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        healthy_chains,
        fast_settings(),
    );

    let resumed = healthy_runner.submit(sample_input()).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(second_set.download.calls(), 0);
    assert_eq!(second_set.chunk.calls(), 0);
    assert_eq!(second_set.transcribe.calls(), 0);
    assert_eq!(second_set.correct.calls(), 3);
    assert_eq!(second_set.summarize.calls(), 1);
    // The first run really did produce those upstream artifacts.
    assert_eq!(first_set.transcribe.calls(), 3);
    assert_eq!(
        resumed.fingerprint_for("download"),
        failed.fingerprint_for("download")
    );
    assert_eq!(
        resumed.fingerprint_for("transcribe:1"),
        failed.fingerprint_for("transcribe:1")
    );
}

#[tokio::test]
async fn changing_summary_style_reuses_everything_upstream() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let (chains, set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 2);
    let runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        jobs,
        chains,
        fast_settings(),
    );

    let plain = runner.submit(sample_input()).await.unwrap();
    let styled = runner
        .submit(
            sample_input()
                .with_summary_instructions("bullet points")
                .with_summary_word_limit(120),
        )
        .await
        .unwrap();

    assert_eq!(styled.status, JobStatus::Completed);
    assert_eq!(set.transcribe.calls(), 2);
    assert_eq!(set.correct.calls(), 2);
    assert_eq!(set.summarize.calls(), 2);
    assert_eq!(
        plain.fingerprint_for("aggregate"),
        styled.fingerprint_for("aggregate")
    );
    assert_ne!(
        plain.fingerprint_for("summarize"),
        styled.fingerprint_for("summarize")
    );
}

#[tokio::test]
async fn concurrent_identical_jobs_share_each_computation() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let (chains, set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    let runner = Arc::new(PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        jobs,
        chains,
        fast_settings(),
    ));

    let token_a = CancellationToken::new();
    let token_b = CancellationToken::new();
    let (a, b) = tokio::join!(
        runner.run(sample_input(), &token_a),
        runner.run(sample_input(), &token_b),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(b.status, JobStatus::Completed);
    assert_eq!(a.stage_fingerprints, b.stage_fingerprints);
    assert_eq!(set.download.calls(), 1);
    assert_eq!(set.chunk.calls(), 1);
    assert_eq!(set.transcribe.calls(), 3);
    assert_eq!(set.correct.calls(), 3);
    assert_eq!(set.summarize.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn chunks_aggregate_by_sequence_index_not_completion_order() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let (mut chains, _set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 4);
    chains.transcribe = FallbackChain::new().with_provider(ProviderDescriptor::new(
        "mock-voxtral",
        Arc::new(ReverseOrderTranscriber { chunk_count: 4 }) as Arc<dyn Provider>,
    ));
    let runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        jobs,
        chains,
        fast_settings(),
    );

    let job = runner.submit(sample_input()).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let aggregate = store
        .get(job.fingerprint_for("aggregate").unwrap())
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(store.read_payload(&aggregate).await.unwrap()).unwrap();
    let lines: Vec<&str> = text.split("\n\n").collect();
    assert_eq!(lines.len(), 4);
    for (index, line) in lines.iter().enumerate() {
        assert!(
            line.ends_with(&format!("transcript of chunk {index}")),
            "chunk {index} out of place: {line}"
        );
    }
}

#[tokio::test]
async fn cancellation_skips_pending_chunks_but_keeps_finished_work() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let cancel = CancellationToken::new();

    let transcriber = Arc::new(CancellingTranscriber {
        token: cancel.clone(),
        calls: AtomicUsize::new(0),
    });
    let (mut chains, _set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    chains.transcribe = FallbackChain::new().with_provider(ProviderDescriptor::new(
        "mock-voxtral",
        Arc::clone(&transcriber) as Arc<dyn Provider>,
    ));
    let runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&jobs) as Arc<dyn JobStore>,
        chains,
        fast_settings().with_chunk_concurrency(1),
    );

    let job = runner.run(sample_input(), &cancel).await.unwrap();

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error_detail.as_deref(), Some("stop requested"));
    assert!(job.failed_stage.is_none());
    // Only the first chunk ever started, and its result was still cached.
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 3); // download + chunk + one transcription

    let view = runner.job_status(&job.job_id).await.unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_work() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let (chains, set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    let runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        jobs,
        chains,
        fast_settings(),
    );

    let err = runner
        .submit(PipelineInput::new("https://x/y").with_clip(90.0, 30.0))
        .await
        .unwrap_err();

    assert!(matches!(err, MedleyError::InputValidation(_)));
    assert_eq!(set.download.calls(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn failed_stage_exhaustion_is_the_only_job_failure_path() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let (mut chains, _set) = mock_chains(Arc::clone(&store) as Arc<dyn ArtifactStore>, 3);
    // Two providers, both down: the job failure carries both histories.
    chains.download = FallbackChain::new()
        .with_provider(
            ProviderDescriptor::new(
                "primary-dl",
                Arc::new(ScriptedProvider::always_err(ProviderError::timeout("down")))
                    as Arc<dyn Provider>,
            )
            .with_retry(RetryPolicy::immediate(2)),
        )
        .with_provider(
            ProviderDescriptor::new(
                "backup-dl",
                Arc::new(ScriptedProvider::always_err(ProviderError::auth("revoked")))
                    as Arc<dyn Provider>,
            )
            .with_retry(RetryPolicy::immediate(2)),
        );
    let runner = PipelineRunner::new(
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        jobs,
        chains,
        fast_settings(),
    );

    let job = runner.submit(sample_input()).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_stage.as_deref(), Some("download"));
    let detail = job.error_detail.as_deref().unwrap();
    assert!(detail.contains("primary-dl after 2 attempt(s)"));
    // Permanent auth failure short-circuited the backup's retry budget.
    assert!(detail.contains("backup-dl after 1 attempt(s)"));
    assert!(job.stage_fingerprints.is_empty());
}
