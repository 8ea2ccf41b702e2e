//! The fixed media-processing pipeline: stages, inputs, and the runner.

mod runner;

#[cfg(test)]
mod integration_tests;

pub use runner::PipelineRunner;

use crate::errors::MedleyError;
use crate::executor::FallbackChain;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounds for `chunk_size_minutes`.
pub const CHUNK_SIZE_MINUTES_RANGE: std::ops::RangeInclusive<u32> = 1..=30;
/// Bounds for `summary_word_limit`.
pub const SUMMARY_WORD_LIMIT_RANGE: std::ops::RangeInclusive<u32> = 50..=2000;

/// One deterministic unit of pipeline work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Fetch the source media.
    Download,
    /// Split the recording into chunks.
    Chunk,
    /// Speech-to-text for one chunk.
    Transcribe,
    /// Clean up one chunk's transcript.
    Correct,
    /// Fan-in of corrected chunks, in sequence order.
    Aggregate,
    /// Produce the final summary.
    Summarize,
}

impl PipelineStage {
    /// Stable name used in fingerprints, logs, and persisted layouts.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Chunk => "chunk",
            Self::Transcribe => "transcribe",
            Self::Correct => "correct",
            Self::Aggregate => "aggregate",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input parameters for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    /// Source media URL.
    pub source_url: String,
    /// Optional clip start, in seconds.
    pub start_time: Option<f64>,
    /// Optional clip end, in seconds.
    pub end_time: Option<f64>,
    /// Chunk length in minutes.
    pub chunk_size_minutes: u32,
    /// Target language for transcription and correction.
    pub target_language: String,
    /// Optional summary style instructions.
    pub summary_instructions: Option<String>,
    /// Optional summary word limit.
    pub summary_word_limit: Option<u32>,
}

impl PipelineInput {
    /// Creates an input with default processing parameters.
    #[must_use]
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            start_time: None,
            end_time: None,
            chunk_size_minutes: crate::config::DEFAULT_CHUNK_SIZE_MINUTES,
            target_language: crate::config::DEFAULT_LANGUAGE.to_string(),
            summary_instructions: None,
            summary_word_limit: None,
        }
    }

    /// Sets the clip range in seconds.
    #[must_use]
    pub fn with_clip(mut self, start: f64, end: f64) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// Sets the chunk size.
    #[must_use]
    pub fn with_chunk_size_minutes(mut self, minutes: u32) -> Self {
        self.chunk_size_minutes = minutes;
        self
    }

    /// Sets the target language.
    #[must_use]
    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = language.into();
        self
    }

    /// Sets summary instructions.
    #[must_use]
    pub fn with_summary_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.summary_instructions = Some(instructions.into());
        self
    }

    /// Sets the summary word limit.
    #[must_use]
    pub fn with_summary_word_limit(mut self, limit: u32) -> Self {
        self.summary_word_limit = Some(limit);
        self
    }

    /// Validates the input before any fingerprinting or external call.
    pub fn validate(&self) -> Result<(), MedleyError> {
        if self.source_url.trim().is_empty() {
            return Err(MedleyError::InputValidation(
                "source_url must not be empty".to_string(),
            ));
        }
        if !CHUNK_SIZE_MINUTES_RANGE.contains(&self.chunk_size_minutes) {
            return Err(MedleyError::InputValidation(format!(
                "chunk_size_minutes {} outside {CHUNK_SIZE_MINUTES_RANGE:?}",
                self.chunk_size_minutes
            )));
        }
        if let Some(limit) = self.summary_word_limit {
            if !SUMMARY_WORD_LIMIT_RANGE.contains(&limit) {
                return Err(MedleyError::InputValidation(format!(
                    "summary_word_limit {limit} outside {SUMMARY_WORD_LIMIT_RANGE:?}"
                )));
            }
        }
        for (name, value) in [("start_time", self.start_time), ("end_time", self.end_time)] {
            if let Some(seconds) = value {
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(MedleyError::InputValidation(format!(
                        "{name} must be a non-negative number, got {seconds}"
                    )));
                }
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(MedleyError::InputValidation(format!(
                    "end_time {end} precedes start_time {start}"
                )));
            }
        }
        Ok(())
    }
}

/// Fallback chains for every stage that calls a provider.
///
/// Aggregation has no chain: it is a pure fan-in with no external call.
#[derive(Debug, Clone)]
pub struct StageChains {
    /// Chain for the download stage.
    pub download: FallbackChain,
    /// Chain for the chunking stage.
    pub chunk: FallbackChain,
    /// Chain for per-chunk transcription.
    pub transcribe: FallbackChain,
    /// Chain for per-chunk correction.
    pub correct: FallbackChain,
    /// Chain for summarization.
    pub summarize: FallbackChain,
}

impl StageChains {
    /// Returns the chain for a stage, or `None` for the pure fan-in stage.
    #[must_use]
    pub fn for_stage(&self, stage: PipelineStage) -> Option<&FallbackChain> {
        match stage {
            PipelineStage::Download => Some(&self.download),
            PipelineStage::Chunk => Some(&self.chunk),
            PipelineStage::Transcribe => Some(&self.transcribe),
            PipelineStage::Correct => Some(&self.correct),
            PipelineStage::Summarize => Some(&self.summarize),
            PipelineStage::Aggregate => None,
        }
    }
}
