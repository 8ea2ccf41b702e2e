//! Scriptable providers for exercising retry and fallback paths.

use crate::errors::ProviderError;
use crate::providers::{Provider, ProviderOutput};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

enum Step {
    Ok(ProviderOutput),
    Err(ProviderError),
}

/// A provider that replays a scripted sequence of results.
///
/// Scripted steps are consumed in order; once the script runs dry the
/// provider repeats its configured fallback behavior forever. Calls are
/// counted so tests can assert how often the compute path actually ran.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    after_script: Step,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    /// Creates a provider whose script is empty and which succeeds with an
    /// empty payload once the script runs dry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            after_script: Step::Ok(ProviderOutput::default()),
            calls: Mutex::new(0),
        }
    }

    /// A provider that always succeeds with the given output.
    #[must_use]
    pub fn always_ok(output: ProviderOutput) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            after_script: Step::Ok(output),
            calls: Mutex::new(0),
        }
    }

    /// A provider that always fails with the given error.
    #[must_use]
    pub fn always_err(error: ProviderError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            after_script: Step::Err(error),
            calls: Mutex::new(0),
        }
    }

    /// Appends a success step to the script.
    #[must_use]
    pub fn then_ok(self, output: ProviderOutput) -> Self {
        self.script.lock().push_back(Step::Ok(output));
        self
    }

    /// Appends a failure step to the script.
    #[must_use]
    pub fn then_err(self, error: ProviderError) -> Self {
        self.script.lock().push_back(Step::Err(error));
        self
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("calls", &self.calls())
            .field("remaining_steps", &self.script.lock().len())
            .finish()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn invoke(&self, _input: &Value) -> Result<ProviderOutput, ProviderError> {
        *self.calls.lock() += 1;
        let step = self.script.lock().pop_front();
        match step.as_ref().unwrap_or(&self.after_script) {
            Step::Ok(output) => Ok(output.clone()),
            Step::Err(error) => Err(error.clone()),
        }
    }
}
