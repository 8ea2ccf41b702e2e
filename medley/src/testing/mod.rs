//! Test doubles and fixtures.
//!
//! Shipped as a first-class module so embedders can exercise the pipeline
//! without real providers or storage.

mod fixtures;
mod providers;
mod store;

pub use fixtures::{mock_chains, sample_input, MockProviderSet};
pub use providers::ScriptedProvider;
pub use store::FlakyStore;
