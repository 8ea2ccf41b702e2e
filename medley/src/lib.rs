//! # Medley
//!
//! A content-addressed artifact cache and resumable stage executor for
//! multi-stage media processing (download → chunk → transcribe → correct →
//! aggregate → summarize).
//!
//! Medley guarantees at-most-once expensive work per unique input: every
//! stage invocation is fingerprinted from its canonical parameters, results
//! are committed to an [`store::ArtifactStore`] with atomic, idempotent
//! writes, and concurrent requests for one fingerprint collapse into a
//! single computation behind a lease. Provider calls run under bounded
//! retries with fallback across a prioritized chain, and a job that fails
//! partway resumes from its first uncached stage when resubmitted.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use medley::prelude::*;
//! use std::sync::Arc;
//!
//! let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new("artifacts")?);
//! let jobs: Arc<dyn JobStore> = Arc::new(FsJobStore::new("artifacts")?);
//! let runner = PipelineRunner::new(store, jobs, chains, PipelineSettings::default());
//!
//! let job = runner
//!     .submit(PipelineInput::new("https://media.example/talks/42").with_clip(30.0, 90.0))
//!     .await?;
//! assert_eq!(job.status, JobStatus::Completed);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod executor;
pub mod fingerprint;
pub mod job;
pub mod observability;
pub mod pipeline;
pub mod providers;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheCoordinator, ComputeOutcome, Lease};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::PipelineSettings;
    pub use crate::errors::{MedleyError, ProviderError, ProviderErrorKind, ProviderFailure};
    pub use crate::executor::{
        FallbackChain, ProviderDescriptor, RetryPolicy, StageExecutor,
    };
    pub use crate::fingerprint::{fingerprint, CanonicalParams, Fingerprint};
    pub use crate::job::{
        FsJobStore, InMemoryJobStore, Job, JobStatus, JobStatusView, JobStore,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        PipelineInput, PipelineRunner, PipelineStage, StageChains,
    };
    pub use crate::providers::{Provider, ProviderOutput};
    pub use crate::store::{
        Artifact, ArtifactStore, FsArtifactStore, InMemoryArtifactStore, NewArtifact,
    };
}
