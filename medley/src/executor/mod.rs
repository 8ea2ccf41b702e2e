//! Bounded retries and provider fallback around cached stage computation.
//!
//! A stage runs against an ordered [`FallbackChain`] of providers. Each
//! provider gets its own retry budget; exhausting it (or hitting a
//! permanent error) advances the chain. Provider identity is part of the
//! canonical input, so two providers never collide on one cache key.

use crate::cache::{CacheCoordinator, ComputeOutcome};
use crate::errors::{MedleyError, ProviderFailure};
use crate::fingerprint::{fingerprint, CanonicalParams};
use crate::pipeline::PipelineStage;
use crate::providers::Provider;
use crate::store::Artifact;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behavior for one provider (or the store).
///
/// `backoff_schedule` gives the delay before each re-attempt; attempts past
/// the end of the schedule reuse its last entry. Each delay is scattered by
/// `jitter_fraction` to avoid thundering herds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the 2nd, 3rd, ... attempt.
    pub backoff_schedule: Vec<Duration>,
    /// Each delay becomes `delay * (1 ± jitter_fraction)`.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_schedule: vec![
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(8),
            ],
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `max_attempts` times with no delay or jitter.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_schedule: Vec::new(),
            jitter_fraction: 0.0,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff schedule.
    #[must_use]
    pub fn with_backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.backoff_schedule = schedule;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Jittered delay to wait after the given zero-indexed failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .backoff_schedule
            .get(attempt as usize)
            .or_else(|| self.backoff_schedule.last())
            .copied()
            .unwrap_or(Duration::ZERO);

        if base.is_zero() || self.jitter_fraction <= 0.0 {
            return base;
        }

        let spread = self.jitter_fraction.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        base.mul_f64(factor)
    }
}

/// One provider in a fallback chain: identity, invoke handle, retry budget.
#[derive(Clone)]
pub struct ProviderDescriptor {
    /// Stable provider identity; becomes part of the cache key.
    pub id: String,
    /// The provider implementation.
    pub provider: Arc<dyn Provider>,
    /// Retry policy for this provider.
    pub retry: RetryPolicy,
}

impl ProviderDescriptor {
    /// Creates a descriptor with the default retry policy.
    #[must_use]
    pub fn new(id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            id: id.into(),
            provider,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("id", &self.id)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Ordered list of providers attempted for a stage.
#[derive(Debug, Clone, Default)]
pub struct FallbackChain {
    providers: Vec<ProviderDescriptor>,
}

impl FallbackChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider to the chain.
    #[must_use]
    pub fn with_provider(mut self, descriptor: ProviderDescriptor) -> Self {
        self.providers.push(descriptor);
        self
    }

    /// Number of providers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if the chain has no providers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Iterates providers in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter()
    }
}

/// Runs stage computations through the cache under retry and fallback.
#[derive(Clone)]
pub struct StageExecutor {
    coordinator: Arc<CacheCoordinator>,
}

impl StageExecutor {
    /// Creates an executor over the given coordinator.
    #[must_use]
    pub fn new(coordinator: Arc<CacheCoordinator>) -> Self {
        Self { coordinator }
    }

    /// The underlying coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// Executes one stage invocation against its fallback chain.
    ///
    /// Providers are tried in order; the first success wins. A provider's
    /// retryable failures are re-attempted under its own policy, permanent
    /// failures skip straight to the next provider, and if the whole chain
    /// exhausts, the accumulated per-provider history is returned as
    /// [`MedleyError::StageExhausted`].
    pub async fn run(
        &self,
        stage: PipelineStage,
        params: &CanonicalParams,
        chain: &FallbackChain,
    ) -> Result<Artifact, MedleyError> {
        if chain.is_empty() {
            return Err(MedleyError::InputValidation(format!(
                "stage '{stage}' has an empty fallback chain"
            )));
        }

        let mut failures: Vec<ProviderFailure> = Vec::new();
        for descriptor in chain.iter() {
            let input = params
                .clone()
                .field("provider", descriptor.id.clone())
                .into_value();
            let key = fingerprint(stage.name(), &input)?;

            let provider = Arc::clone(&descriptor.provider);
            let retry = descriptor.retry.clone();
            let provider_id = descriptor.id.clone();
            let result = self
                .coordinator
                .get_or_compute(&key, stage.name(), move || {
                    invoke_with_retry(
                        stage,
                        provider_id.clone(),
                        Arc::clone(&provider),
                        input.clone(),
                        retry.clone(),
                    )
                })
                .await;

            match result {
                Ok(artifact) => return Ok(artifact),
                Err(MedleyError::Provider {
                    provider, attempts, source, ..
                }) => {
                    warn!(
                        stage = stage.name(),
                        provider = %provider,
                        attempts,
                        error = %source,
                        "provider exhausted; advancing fallback chain"
                    );
                    failures.push(ProviderFailure {
                        provider_id: provider,
                        attempts,
                        error: source,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        Err(MedleyError::StageExhausted {
            stage: stage.name().to_string(),
            failures,
        })
    }
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor").finish()
    }
}

/// Invokes one provider under its retry policy.
async fn invoke_with_retry(
    stage: PipelineStage,
    provider_id: String,
    provider: Arc<dyn Provider>,
    input: serde_json::Value,
    policy: RetryPolicy,
) -> Result<ComputeOutcome, MedleyError> {
    let mut attempt: u32 = 0;
    loop {
        match provider.invoke(&input).await {
            Ok(output) => {
                return Ok(ComputeOutcome {
                    payload: output.payload,
                    metadata: output.metadata,
                    attempts: attempt + 1,
                });
            }
            Err(error) => {
                attempt += 1;
                if error.retryable && attempt < policy.max_attempts {
                    let delay = policy.delay_for(attempt - 1);
                    debug!(
                        stage = stage.name(),
                        provider = %provider_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(MedleyError::Provider {
                        stage: stage.name().to_string(),
                        provider: provider_id,
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }
}
