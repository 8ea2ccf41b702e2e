//! Tracing setup for pipeline processes.
//!
//! All engine components emit structured `tracing` events (cache hits and
//! misses, lease waits, retries, fallback advances, stage transitions);
//! this module only wires up a subscriber for binaries that want one.

use tracing_subscriber::EnvFilter;

/// Output format for the default subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Text,
    /// Newline-delimited JSON, one event per line.
    Json,
}

/// Installs a global subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    drop(installed);
}
