//! The provider seam: external stage computation behind a stable contract.
//!
//! The executor depends only on this trait, never on a concrete provider's
//! wire format. Implementations receive the canonical input of a stage
//! invocation and return payload bytes plus descriptive metadata, or a
//! classified error.

pub mod mock;

use crate::errors::ProviderError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Result of a successful provider invocation.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    /// The produced payload bytes.
    pub payload: Vec<u8>,
    /// Stage-specific descriptive metadata (model, language, chunk count).
    pub metadata: HashMap<String, Value>,
}

impl ProviderOutput {
    /// Creates an output from payload bytes.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Creates an output from UTF-8 text.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(text.into().into_bytes())
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An external computation for one pipeline stage.
///
/// Implementations must be side-effect-free with respect to shared state;
/// the only durable effect of a stage is the artifact write the coordinator
/// performs afterwards.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Invokes the provider with a stage's canonical input.
    async fn invoke(&self, input: &Value) -> Result<ProviderOutput, ProviderError>;
}
