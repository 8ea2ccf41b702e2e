//! Failure-injecting artifact store wrapper.

use crate::fingerprint::Fingerprint;
use crate::store::{Artifact, ArtifactStore, NewArtifact, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a store and fails the first `failures` operations with
/// [`StoreError::Unavailable`], then passes everything through.
pub struct FlakyStore {
    inner: Arc<dyn ArtifactStore>,
    remaining: AtomicUsize,
    injected: AtomicUsize,
}

impl FlakyStore {
    /// Creates a wrapper that injects `failures` unavailability errors.
    #[must_use]
    pub fn new(inner: Arc<dyn ArtifactStore>, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
            injected: AtomicUsize::new(0),
        }
    }

    /// Number of failures injected so far.
    #[must_use]
    pub fn failures_injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .remaining
                .compare_exchange(remaining, remaining.saturating_sub(1), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("failures_injected", &self.failures_injected())
            .finish()
    }
}

#[async_trait]
impl ArtifactStore for FlakyStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Artifact>, StoreError> {
        self.maybe_fail()?;
        self.inner.get(fingerprint).await
    }

    async fn put(&self, artifact: NewArtifact) -> Result<Artifact, StoreError> {
        self.maybe_fail()?;
        self.inner.put(artifact).await
    }

    async fn read_payload(&self, artifact: &Artifact) -> Result<Vec<u8>, StoreError> {
        self.maybe_fail()?;
        self.inner.read_payload(artifact).await
    }

    async fn delete(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.maybe_fail()?;
        self.inner.delete(fingerprint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryArtifactStore;

    #[tokio::test]
    async fn fails_exactly_the_configured_number_of_times() {
        let inner = Arc::new(InMemoryArtifactStore::new());
        let flaky = FlakyStore::new(inner, 2);
        let fp = Fingerprint::from_hex(&"ab".repeat(16)).unwrap();

        assert!(flaky.get(&fp).await.is_err());
        assert!(flaky.get(&fp).await.is_err());
        assert!(flaky.get(&fp).await.unwrap().is_none());
        assert_eq!(flaky.failures_injected(), 2);
    }
}
