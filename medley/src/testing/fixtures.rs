//! Ready-made inputs and provider chains for tests and dry runs.

use crate::executor::{FallbackChain, ProviderDescriptor, RetryPolicy};
use crate::pipeline::{PipelineInput, StageChains};
use crate::providers::Provider;
use crate::providers::mock::{
    MockChunkProvider, MockCorrectionProvider, MockDownloadProvider, MockSummarizationProvider,
    MockTranscriptionProvider,
};
use crate::store::ArtifactStore;
use std::sync::Arc;

/// Handles to the mock providers behind [`mock_chains`], for asserting
/// invocation counts.
pub struct MockProviderSet {
    /// The download mock.
    pub download: Arc<MockDownloadProvider>,
    /// The chunking mock.
    pub chunk: Arc<MockChunkProvider>,
    /// The transcription mock.
    pub transcribe: Arc<MockTranscriptionProvider>,
    /// The correction mock.
    pub correct: Arc<MockCorrectionProvider>,
    /// The summarization mock.
    pub summarize: Arc<MockSummarizationProvider>,
}

/// Builds single-provider chains over the mock providers.
///
/// Retries are immediate so failure paths stay fast under test.
#[must_use]
pub fn mock_chains(
    store: Arc<dyn ArtifactStore>,
    chunk_count: u64,
) -> (StageChains, MockProviderSet) {
    let set = MockProviderSet {
        download: Arc::new(MockDownloadProvider::new()),
        chunk: Arc::new(MockChunkProvider::new(chunk_count)),
        transcribe: Arc::new(MockTranscriptionProvider::new()),
        correct: Arc::new(MockCorrectionProvider::new(Arc::clone(&store))),
        summarize: Arc::new(MockSummarizationProvider::new(store)),
    };

    let retry = RetryPolicy::immediate(3);
    let chains = StageChains {
        download: FallbackChain::new().with_provider(
            ProviderDescriptor::new("mock-downloader", Arc::clone(&set.download) as Arc<dyn Provider>)
                .with_retry(retry.clone()),
        ),
        chunk: FallbackChain::new().with_provider(
            ProviderDescriptor::new("mock-chunker", Arc::clone(&set.chunk) as Arc<dyn Provider>)
                .with_retry(retry.clone()),
        ),
        transcribe: FallbackChain::new().with_provider(
            ProviderDescriptor::new("mock-voxtral", Arc::clone(&set.transcribe) as Arc<dyn Provider>)
                .with_retry(retry.clone()),
        ),
        correct: FallbackChain::new().with_provider(
            ProviderDescriptor::new("mock-mistral", Arc::clone(&set.correct) as Arc<dyn Provider>)
                .with_retry(retry.clone()),
        ),
        summarize: FallbackChain::new().with_provider(
            ProviderDescriptor::new("mock-gpt", Arc::clone(&set.summarize) as Arc<dyn Provider>).with_retry(retry),
        ),
    };

    (chains, set)
}

/// A typical clip-processing input.
#[must_use]
pub fn sample_input() -> PipelineInput {
    PipelineInput::new("https://media.example/talks/42").with_clip(30.0, 90.0)
}
