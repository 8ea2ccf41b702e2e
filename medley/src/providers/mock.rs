//! Mock providers for local development and dry runs.
//!
//! Each mock produces deterministic output derived from its canonical
//! input, so cache behavior with mocks matches cache behavior with real
//! providers.

use super::{Provider, ProviderOutput};
use crate::errors::ProviderError;
use crate::fingerprint::Fingerprint;
use crate::store::ArtifactStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn str_param<'a>(input: &'a Value, key: &str) -> Result<&'a str, ProviderError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::invalid_input(format!("missing '{key}' parameter")))
}

fn u64_param(input: &Value, key: &str) -> Result<u64, ProviderError> {
    input
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| ProviderError::invalid_input(format!("missing '{key}' parameter")))
}

async fn read_source(
    store: &Arc<dyn ArtifactStore>,
    input: &Value,
) -> Result<String, ProviderError> {
    let hex = str_param(input, "source_fingerprint")?;
    let fingerprint = Fingerprint::from_hex(hex)
        .map_err(|err| ProviderError::invalid_input(err.to_string()))?;
    let artifact = store
        .get(&fingerprint)
        .await
        .map_err(|err| ProviderError::transient(crate::errors::ProviderErrorKind::Internal, err.to_string()))?
        .ok_or_else(|| {
            ProviderError::invalid_input(format!("source artifact {fingerprint} not found"))
        })?;
    let bytes = store
        .read_payload(&artifact)
        .await
        .map_err(|err| ProviderError::transient(crate::errors::ProviderErrorKind::Internal, err.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Pretends to download audio from a source URL.
#[derive(Debug, Default)]
pub struct MockDownloadProvider {
    calls: AtomicUsize,
}

impl MockDownloadProvider {
    /// Creates the mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockDownloadProvider {
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = str_param(input, "url")?;
        if !url.starts_with("http") {
            return Err(ProviderError::invalid_input(format!(
                "unsupported source url '{url}'"
            )));
        }

        let start = input.get("start_time").and_then(Value::as_i64).unwrap_or(0);
        let end = input.get("end_time").and_then(Value::as_i64);
        // Canonical times arrive as ticks; treat the clipped span as the
        // audio duration, defaulting to a full-length recording.
        let duration_seconds = end.map_or(1800.0, |end| (end - start) as f64 / 100.0);

        Ok(
            ProviderOutput::from_text(format!("mock audio downloaded from {url}"))
                .with_metadata("duration_seconds", json!(duration_seconds))
                .with_metadata("format", json!("mp3")),
        )
    }
}

/// Splits a downloaded recording into fixed-size chunks.
#[derive(Debug)]
pub struct MockChunkProvider {
    chunk_count: u64,
    calls: AtomicUsize,
}

impl MockChunkProvider {
    /// Creates a mock that always yields `chunk_count` chunks.
    #[must_use]
    pub fn new(chunk_count: u64) -> Self {
        Self {
            chunk_count,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockChunkProvider {
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let source = str_param(input, "source_fingerprint")?;
        let chunk_size = u64_param(input, "chunk_size_minutes")?;

        let manifest: Vec<Value> = (0..self.chunk_count)
            .map(|index| {
                json!({
                    "index": index,
                    "offset_minutes": index * chunk_size,
                })
            })
            .collect();

        Ok(
            ProviderOutput::from_text(format!("chunk manifest for {source}"))
                .with_metadata("chunk_count", json!(self.chunk_count))
                .with_metadata("chunk_size_minutes", json!(chunk_size))
                .with_metadata("chunks", Value::Array(manifest)),
        )
    }
}

/// Produces a canned transcript for one audio chunk.
#[derive(Debug, Default)]
pub struct MockTranscriptionProvider {
    calls: AtomicUsize,
}

impl MockTranscriptionProvider {
    /// Creates the mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockTranscriptionProvider {
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = u64_param(input, "chunk_index")?;
        let language = str_param(input, "language").unwrap_or("en");

        Ok(
            ProviderOutput::from_text(format!("transcript of chunk {index}"))
                .with_metadata("language", json!(language))
                .with_metadata("confidence", json!(0.92))
                .with_metadata("model", json!("mock-transcribe-v1")),
        )
    }
}

/// Corrects a transcript read back from the artifact store.
pub struct MockCorrectionProvider {
    store: Arc<dyn ArtifactStore>,
    calls: AtomicUsize,
}

impl MockCorrectionProvider {
    /// Creates a mock that resolves source artifacts through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockCorrectionProvider {
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let source = read_source(&self.store, input).await?;
        let language = str_param(input, "language").unwrap_or("en");

        Ok(
            ProviderOutput::from_text(format!("corrected: {source}"))
                .with_metadata("language", json!(language))
                .with_metadata("model", json!("mock-correct-v1")),
        )
    }
}

impl std::fmt::Debug for MockCorrectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCorrectionProvider")
            .field("calls", &self.calls())
            .finish()
    }
}

/// Summarizes aggregated text read back from the artifact store.
pub struct MockSummarizationProvider {
    store: Arc<dyn ArtifactStore>,
    calls: AtomicUsize,
}

impl MockSummarizationProvider {
    /// Creates a mock that resolves source artifacts through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockSummarizationProvider {
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let source = read_source(&self.store, input).await?;

        let mut summary = format!("summary of {} characters", source.len());
        if let Some(instructions) = input.get("instructions").and_then(Value::as_str) {
            summary.push_str(&format!(" ({instructions})"));
        }
        let word_limit = input.get("word_limit").and_then(Value::as_u64);
        if let Some(limit) = word_limit {
            let words: Vec<&str> = summary.split_whitespace().take(limit as usize).collect();
            summary = words.join(" ");
        }

        let word_count = summary.split_whitespace().count();
        Ok(ProviderOutput::from_text(summary)
            .with_metadata("model", json!("mock-summarize-v1"))
            .with_metadata("word_count", json!(word_count)))
    }
}

impl std::fmt::Debug for MockSummarizationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSummarizationProvider")
            .field("calls", &self.calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryArtifactStore, NewArtifact};

    #[tokio::test]
    async fn download_requires_an_http_url() {
        let provider = MockDownloadProvider::new();
        let err = provider
            .invoke(&json!({"url": "ftp://nope", "provider": "mock"}))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn download_reports_clipped_duration() {
        let provider = MockDownloadProvider::new();
        let output = provider
            .invoke(&json!({"url": "https://x/y", "start_time": 3000, "end_time": 9000}))
            .await
            .unwrap();
        assert_eq!(
            output.metadata.get("duration_seconds"),
            Some(&json!(60.0))
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn chunk_manifest_lists_every_chunk() {
        let provider = MockChunkProvider::new(4);
        let output = provider
            .invoke(&json!({
                "source_fingerprint": "ab".repeat(16),
                "chunk_size_minutes": 10,
            }))
            .await
            .unwrap();

        assert_eq!(output.metadata.get("chunk_count"), Some(&json!(4)));
        let chunks = output.metadata.get("chunks").unwrap().as_array().unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[2].get("offset_minutes"), Some(&json!(20)));
    }

    #[tokio::test]
    async fn correction_reads_its_source_through_the_store() {
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());
        let source = store
            .put(NewArtifact {
                fingerprint: Fingerprint::from_hex(&"ab".repeat(16)).unwrap(),
                stage_name: "transcribe".to_string(),
                payload: b"raw transcript".to_vec(),
                metadata: std::collections::HashMap::new(),
                producer_attempts: 1,
            })
            .await
            .unwrap();

        let provider = MockCorrectionProvider::new(Arc::clone(&store));
        let output = provider
            .invoke(&json!({
                "source_fingerprint": source.fingerprint.as_str(),
                "language": "zh-TW",
            }))
            .await
            .unwrap();

        assert_eq!(output.payload, b"corrected: raw transcript");
    }

    #[tokio::test]
    async fn correction_rejects_a_missing_source() {
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());
        let provider = MockCorrectionProvider::new(store);
        let err = provider
            .invoke(&json!({"source_fingerprint": "cd".repeat(16)}))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn summary_honors_the_word_limit() {
        let store: Arc<dyn ArtifactStore> = Arc::new(InMemoryArtifactStore::new());
        let source = store
            .put(NewArtifact {
                fingerprint: Fingerprint::from_hex(&"ab".repeat(16)).unwrap(),
                stage_name: "aggregate".to_string(),
                payload: b"a long aggregated text".to_vec(),
                metadata: std::collections::HashMap::new(),
                producer_attempts: 1,
            })
            .await
            .unwrap();

        let provider = MockSummarizationProvider::new(Arc::clone(&store));
        let output = provider
            .invoke(&json!({
                "source_fingerprint": source.fingerprint.as_str(),
                "word_limit": 2,
            }))
            .await
            .unwrap();

        let text = String::from_utf8(output.payload).unwrap();
        assert_eq!(text.split_whitespace().count(), 2);
    }
}
