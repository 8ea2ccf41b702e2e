//! Runtime settings for the pipeline engine.

use crate::executor::RetryPolicy;
use std::time::Duration;

/// Default chunk length in minutes.
pub const DEFAULT_CHUNK_SIZE_MINUTES: u32 = 10;
/// Default target language.
pub const DEFAULT_LANGUAGE: &str = "zh-TW";

/// Tunables for one [`PipelineRunner`](crate::pipeline::PipelineRunner).
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Concurrency ceiling for per-chunk stage fan-out.
    pub chunk_concurrency: usize,
    /// How long a computation lease lives before it is reclaimable.
    pub lease_ttl: Duration,
    /// Retry policy for artifact store reads and writes.
    pub store_retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_concurrency: 4,
            lease_ttl: Duration::from_secs(60),
            store_retry: RetryPolicy {
                max_attempts: 3,
                backoff_schedule: vec![Duration::from_millis(100), Duration::from_millis(500)],
                jitter_fraction: 0.1,
            },
        }
    }
}

impl PipelineSettings {
    /// Creates default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk fan-out concurrency ceiling.
    #[must_use]
    pub fn with_chunk_concurrency(mut self, ceiling: usize) -> Self {
        self.chunk_concurrency = ceiling.max(1);
        self
    }

    /// Sets the lease time-to-live.
    #[must_use]
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Sets the store retry policy.
    #[must_use]
    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }
}
