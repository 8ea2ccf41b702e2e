//! Per-fingerprint computation collapse over the artifact store.
//!
//! The coordinator guarantees at-most-one concurrent computation per
//! fingerprint: a caller acquires a lease before it even looks at the
//! store, so concurrent requests for the same key collapse into one
//! producer and any number of parked waiters. Failures release the lease
//! immediately and are never cached.

use crate::errors::MedleyError;
use crate::executor::RetryPolicy;
use crate::fingerprint::Fingerprint;
use crate::store::{Artifact, ArtifactStore, NewArtifact, StoreError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default time after which an unreleased lease is considered abandoned.
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// The output of a compute function, ready to be committed as an artifact.
#[derive(Debug, Clone)]
pub struct ComputeOutcome {
    /// Payload bytes to store.
    pub payload: Vec<u8>,
    /// Stage-specific descriptive metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// How many provider attempts the computation needed.
    pub attempts: u32,
}

impl ComputeOutcome {
    /// Creates an outcome from payload bytes.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            metadata: HashMap::new(),
            attempts: 1,
        }
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Exclusive, expiring computation token for one fingerprint.
///
/// Leases live only in coordinator memory; they are a coordination
/// primitive, not persisted state.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The fingerprint being computed.
    pub fingerprint: Fingerprint,
    /// Identity of the current holder.
    pub holder_id: String,
    /// When the current holder acquired the lease.
    pub acquired_at: Instant,
    /// When the lease becomes reclaimable by another requester.
    pub expires_at: Instant,
}

struct LeaseSlot {
    lease: Mutex<Lease>,
    released: Notify,
}

enum Acquisition {
    /// This caller holds the lease and must compute.
    Held { slot: Arc<LeaseSlot>, token: String },
    /// Another caller holds it; park until released or expired.
    Busy { slot: Arc<LeaseSlot>, expires_at: Instant },
}

/// Wraps an [`ArtifactStore`] with per-fingerprint computation leases.
pub struct CacheCoordinator {
    store: Arc<dyn ArtifactStore>,
    leases: DashMap<Fingerprint, Arc<LeaseSlot>>,
    lease_ttl: Duration,
    store_retry: RetryPolicy,
}

impl CacheCoordinator {
    /// Creates a coordinator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            leases: DashMap::new(),
            lease_ttl: DEFAULT_LEASE_TTL,
            store_retry: RetryPolicy::default(),
        }
    }

    /// Sets the lease time-to-live.
    #[must_use]
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Sets the retry policy for store reads and writes.
    #[must_use]
    pub fn with_store_retry(mut self, policy: RetryPolicy) -> Self {
        self.store_retry = policy;
        self
    }

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Number of leases currently outstanding.
    #[must_use]
    pub fn active_leases(&self) -> usize {
        self.leases.len()
    }

    /// Returns the cached artifact for `fingerprint`, computing it if absent.
    ///
    /// Concurrent callers for the same fingerprint collapse: exactly one
    /// invokes `compute` while the rest suspend on the lease and then read
    /// the committed artifact. If `compute` fails, the lease is released
    /// immediately — waiters retry rather than stall for the expiry window —
    /// and nothing is cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        stage_name: &str,
        compute: F,
    ) -> Result<Artifact, MedleyError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<ComputeOutcome, MedleyError>> + Send,
    {
        loop {
            match self.try_acquire(fingerprint) {
                Acquisition::Held { slot, token } => {
                    let result = self.run_holder(fingerprint, stage_name, &compute).await;
                    self.release(fingerprint, &slot, &token);
                    return result;
                }
                Acquisition::Busy { slot, expires_at } => {
                    debug!(fingerprint = %fingerprint, stage = stage_name, "waiting on in-flight computation");
                    let released = slot.released.notified();
                    tokio::pin!(released);
                    // Register as a waiter first, then re-check: a release
                    // racing this path either lands after registration (we
                    // get woken) or has already removed the slot (we loop).
                    released.as_mut().enable();
                    if !self.slot_is_current(fingerprint, &slot) {
                        continue;
                    }
                    tokio::select! {
                        () = &mut released => {}
                        () = tokio::time::sleep_until(expires_at) => {
                            warn!(fingerprint = %fingerprint, stage = stage_name, "lease expired; reclaiming");
                        }
                    }
                }
            }
        }
    }

    fn try_acquire(&self, fingerprint: &Fingerprint) -> Acquisition {
        use dashmap::mapref::entry::Entry;

        let token = Uuid::new_v4().to_string();
        let now = Instant::now();
        match self.leases.entry(fingerprint.clone()) {
            Entry::Vacant(vacant) => {
                let slot = Arc::new(LeaseSlot {
                    lease: Mutex::new(Lease {
                        fingerprint: fingerprint.clone(),
                        holder_id: token.clone(),
                        acquired_at: now,
                        expires_at: now + self.lease_ttl,
                    }),
                    released: Notify::new(),
                });
                vacant.insert(Arc::clone(&slot));
                Acquisition::Held { slot, token }
            }
            Entry::Occupied(occupied) => {
                let slot = Arc::clone(occupied.get());
                let mut lease = slot.lease.lock();
                if now >= lease.expires_at {
                    // The holder crashed or stalled past its TTL.
                    lease.holder_id = token.clone();
                    lease.acquired_at = now;
                    lease.expires_at = now + self.lease_ttl;
                    drop(lease);
                    Acquisition::Held { slot, token }
                } else {
                    let expires_at = lease.expires_at;
                    drop(lease);
                    Acquisition::Busy { slot, expires_at }
                }
            }
        }
    }

    fn release(&self, fingerprint: &Fingerprint, slot: &Arc<LeaseSlot>, token: &str) {
        // Remove only if this caller still owns the lease; a reclaimed
        // lease belongs to its new holder.
        self.leases.remove_if(fingerprint, |_, current| {
            Arc::ptr_eq(current, slot) && current.lease.lock().holder_id == token
        });
        slot.released.notify_waiters();
    }

    fn slot_is_current(&self, fingerprint: &Fingerprint, slot: &Arc<LeaseSlot>) -> bool {
        self.leases
            .get(fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    async fn run_holder<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        stage_name: &str,
        compute: &F,
    ) -> Result<Artifact, MedleyError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<ComputeOutcome, MedleyError>> + Send,
    {
        if let Some(existing) = self.get_with_retry(fingerprint).await? {
            debug!(fingerprint = %fingerprint, stage = stage_name, "cache hit");
            return Ok(existing);
        }

        debug!(fingerprint = %fingerprint, stage = stage_name, "cache miss; computing");
        let outcome = compute().await?;
        self.put_with_retry(NewArtifact {
            fingerprint: fingerprint.clone(),
            stage_name: stage_name.to_string(),
            payload: outcome.payload,
            metadata: outcome.metadata,
            producer_attempts: outcome.attempts,
        })
        .await
    }

    async fn get_with_retry(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Artifact>, MedleyError> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.get(fingerprint).await {
                Ok(found) => return Ok(found),
                Err(StoreError::Unavailable(message)) => {
                    attempt += 1;
                    if attempt >= self.store_retry.max_attempts {
                        return Err(MedleyError::StoreUnavailable(message));
                    }
                    let delay = self.store_retry.delay_for(attempt - 1);
                    warn!(fingerprint = %fingerprint, attempt, delay_ms = delay.as_millis() as u64, %message, "store read failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn put_with_retry(&self, artifact: NewArtifact) -> Result<Artifact, MedleyError> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.put(artifact.clone()).await {
                Ok(committed) => return Ok(committed),
                Err(StoreError::Unavailable(message)) => {
                    attempt += 1;
                    if attempt >= self.store_retry.max_attempts {
                        return Err(MedleyError::StoreUnavailable(message));
                    }
                    let delay = self.store_retry.delay_for(attempt - 1);
                    warn!(fingerprint = %artifact.fingerprint, attempt, delay_ms = delay.as_millis() as u64, %message, "store write failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("active_leases", &self.leases.len())
            .field("lease_ttl", &self.lease_ttl)
            .finish()
    }
}
