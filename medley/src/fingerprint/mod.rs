//! Stable cache keys derived from stage names and canonical inputs.
//!
//! A [`Fingerprint`] is the identity of one logical stage invocation:
//! identical inputs always produce identical fingerprints, and any
//! observable output difference must correspond to a canonical input
//! difference. Time values are rounded before hashing so representation
//! noise in floating-point ranges cannot cause spurious cache misses.

mod canonical;

pub use canonical::canonical_json;

use crate::errors::MedleyError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Time values canonicalize to integer ticks of this resolution (10 ms).
const TIME_TICKS_PER_SECOND: f64 = 100.0;

/// A content-addressed identity for one stage invocation.
///
/// Fingerprints are SHA-256 digests truncated to 16 bytes, rendered as
/// 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex length of a fingerprint string.
    pub const HEX_LEN: usize = 32;

    /// Parses a fingerprint from its hex form.
    pub fn from_hex(hex: &str) -> Result<Self, MedleyError> {
        if hex.len() != Self::HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MedleyError::InputValidation(format!(
                "malformed fingerprint '{hex}'"
            )));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Returns the hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builder for the canonical parameter object of a stage invocation.
///
/// Optional fields are omitted when absent rather than serialized as null,
/// and time fields are rounded to a fixed precision, so two logically
/// identical inputs always canonicalize to the same bytes.
#[derive(Debug, Clone, Default)]
pub struct CanonicalParams {
    fields: serde_json::Map<String, Value>,
}

impl CanonicalParams {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds a field only when the value is present.
    #[must_use]
    pub fn opt_field<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    /// Adds a time field in seconds, rounded to canonical precision.
    #[must_use]
    pub fn time_field(self, key: impl Into<String>, seconds: f64) -> Self {
        self.field(key, round_time(seconds))
    }

    /// Adds an optional time field in seconds.
    #[must_use]
    pub fn opt_time_field(self, key: impl Into<String>, seconds: Option<f64>) -> Self {
        match seconds {
            Some(seconds) => self.time_field(key, seconds),
            None => self,
        }
    }

    /// Consumes the builder into its JSON object form.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Rounds a time in seconds to integer canonical ticks.
///
/// Noise below the tick resolution collapses to the same value, so
/// `90.0` and `90.001` hash identically while `91.0` does not.
#[must_use]
pub fn round_time(seconds: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        (seconds * TIME_TICKS_PER_SECOND).round() as i64
    }
}

/// Computes the fingerprint of a stage invocation.
///
/// Pure and deterministic. Ambiguous inputs (an `end_time` before its
/// `start_time`) are rejected before hashing; they must never reach the
/// cache.
pub fn fingerprint(stage_name: &str, params: &Value) -> Result<Fingerprint, MedleyError> {
    validate_params(params)?;
    let canonical = canonical_json(params);
    let mut hasher = Sha256::new();
    hasher.update(stage_name.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    Ok(Fingerprint(hex::encode(&digest[..16])))
}

fn validate_params(params: &Value) -> Result<(), MedleyError> {
    let Some(object) = params.as_object() else {
        return Err(MedleyError::InputValidation(
            "stage parameters must be a JSON object".to_string(),
        ));
    };

    if let (Some(start), Some(end)) = (
        object.get("start_time").and_then(Value::as_f64),
        object.get("end_time").and_then(Value::as_f64),
    ) {
        if end < start {
            return Err(MedleyError::InputValidation(format!(
                "end_time {end} precedes start_time {start}"
            )));
        }
    }

    Ok(())
}
