//! Error types for the medley pipeline engine.
//!
//! The taxonomy separates input validation (fatal, rejected before any
//! external call), provider failures (transient vs. permanent), store
//! availability, and whole-stage exhaustion of a fallback chain.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The provider call exceeded its deadline.
    Timeout,
    /// A transient network or service error.
    Network,
    /// The provider rejected the call due to rate limiting.
    RateLimited,
    /// The provider rejected the input itself.
    InvalidInput,
    /// Authentication or authorization failed.
    Auth,
    /// Any other provider-side failure.
    Internal,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Network => write!(f, "network"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Auth => write!(f, "auth"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// An error returned by a provider invocation.
///
/// `retryable` decides whether the executor keeps attempting this provider
/// or short-circuits to the next one in the fallback chain.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// The failure classification.
    pub kind: ProviderErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// Whether another attempt against the same provider may succeed.
    pub retryable: bool,
}

impl ProviderError {
    /// Creates a retryable (transient) provider error.
    #[must_use]
    pub fn transient(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable (permanent) provider error.
    #[must_use]
    pub fn permanent(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transient(ProviderErrorKind::Timeout, message)
    }

    /// Creates a rate-limit error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::transient(ProviderErrorKind::RateLimited, message)
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::permanent(ProviderErrorKind::InvalidInput, message)
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::permanent(ProviderErrorKind::Auth, message)
    }
}

/// One provider's contribution to a stage failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// Identity of the provider that failed.
    pub provider_id: String,
    /// Number of attempts made against it.
    pub attempts: u32,
    /// The last error it produced.
    pub error: ProviderError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.provider_id, self.attempts, self.error
        )
    }
}

/// The main error type for medley operations.
#[derive(Debug, Error)]
pub enum MedleyError {
    /// The input failed validation before any fingerprinting or external call.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// A provider exhausted its retry budget (or failed permanently).
    #[error("provider '{provider}' failed during {stage} after {attempts} attempt(s): {source}")]
    Provider {
        /// The stage being executed.
        stage: String,
        /// The provider identity.
        provider: String,
        /// Attempts made before giving up on this provider.
        attempts: u32,
        /// The last error the provider produced.
        source: ProviderError,
    },

    /// The artifact store could not serve a read or write.
    #[error("artifact store unavailable: {0}")]
    StoreUnavailable(String),

    /// Every provider in a stage's fallback chain failed.
    ///
    /// This is the only error that marks a job stage, and therefore the
    /// job, as failed.
    #[error("stage '{stage}' exhausted its fallback chain of {} provider(s)", .failures.len())]
    StageExhausted {
        /// The stage that failed.
        stage: String,
        /// Per-provider failure history, in chain order.
        failures: Vec<ProviderFailure>,
    },

    /// The pipeline run was cancelled.
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MedleyError {
    /// Full description including per-provider history for exhausted stages.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::StageExhausted { failures, .. } => {
                let mut parts = vec![self.to_string()];
                for failure in failures {
                    parts.push(failure.to_string());
                }
                parts.join("; ")
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_constructors_set_retryable() {
        assert!(ProviderError::timeout("slow").retryable);
        assert!(ProviderError::rate_limited("429").retryable);
        assert!(!ProviderError::invalid_input("bad url").retryable);
        assert!(!ProviderError::auth("expired key").retryable);
    }

    #[test]
    fn provider_error_display() {
        let err = ProviderError::timeout("no response in 30s");
        assert_eq!(err.to_string(), "timeout: no response in 30s");
    }

    #[test]
    fn stage_exhausted_detail_lists_every_provider() {
        let err = MedleyError::StageExhausted {
            stage: "transcribe".to_string(),
            failures: vec![
                ProviderFailure {
                    provider_id: "alpha".to_string(),
                    attempts: 3,
                    error: ProviderError::timeout("deadline"),
                },
                ProviderFailure {
                    provider_id: "beta".to_string(),
                    attempts: 1,
                    error: ProviderError::auth("bad key"),
                },
            ],
        };

        let detail = err.detail();
        assert!(detail.contains("alpha after 3 attempt(s)"));
        assert!(detail.contains("beta after 1 attempt(s)"));
        assert!(detail.contains("transcribe"));
    }

    #[test]
    fn provider_error_round_trips_through_json() {
        let err = ProviderError::rate_limited("slow down");
        let json = serde_json::to_string(&err).unwrap();
        let back: ProviderError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ProviderErrorKind::RateLimited);
        assert!(back.retryable);
    }
}
