//! In-flight request coalescing.
//!
//! Collapses concurrent requests for the same cache key into a single
//! origin call. The first caller for a key spawns the producer on its own
//! task and registers a shared handle to it; every caller arriving while
//! that task is running awaits the same handle and gets a clone of the
//! result.
//!
//! The map is per-process. Two gateway instances may each call the origin
//! for the same key at the same time.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

use crate::cache::CacheKey;

/// Failure of a coalesced computation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CoalesceError<E> {
    /// The producer ran to completion and returned an error
    #[error("{0}")]
    Failed(E),
    /// The producer task panicked or was cancelled before settling
    #[error("in-flight computation aborted: {0}")]
    Aborted(String),
}

/// Whether this caller ran the producer or joined an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

type Outcome<T, E> = Result<T, CoalesceError<E>>;
type SharedOutcome<T, E> = Shared<BoxFuture<'static, Outcome<T, E>>>;

struct InFlight<T, E> {
    generation: u64,
    outcome: SharedOutcome<T, E>,
}

/// Per-process map from cache key to the pending producer for that key.
pub struct Coalescer<T, E> {
    in_flight: Arc<DashMap<CacheKey, InFlight<T, E>>>,
    generation: Arc<AtomicU64>,
}

impl<T, E> Clone for Coalescer<T, E> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            generation: Arc::clone(&self.generation),
        }
    }
}

impl<T, E> Default for Coalescer<T, E> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `producer` for `key`, or join the run already in flight.
    ///
    /// The lookup and the registration happen under the map's entry lock,
    /// so two callers can never both become leader for the same key. The
    /// entry is removed when the producer settles, whatever the outcome
    /// (including a panic), and before any caller observes the result.
    pub async fn acquire_or_join<F, Fut>(&self, key: &CacheKey, producer: F) -> (Role, Outcome<T, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (role, outcome) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(key = %key, "Joining in-flight origin request");
                (Role::Follower, existing.get().outcome.clone())
            }
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let release = Release {
                    in_flight: Arc::clone(&self.in_flight),
                    key: key.clone(),
                    generation,
                };
                let computation = producer();
                let handle = tokio::spawn(async move {
                    let result = computation.await;
                    // Evict before publishing: a caller either joins this run
                    // or starts a fresh one, never one that already settled.
                    drop(release);
                    result
                });

                let outcome = async move {
                    match handle.await {
                        Ok(result) => result.map_err(CoalesceError::Failed),
                        Err(e) => {
                            error!(error = %e, "Coalesced origin task did not complete");
                            Err(CoalesceError::Aborted(e.to_string()))
                        }
                    }
                }
                .boxed()
                .shared();

                slot.insert(InFlight {
                    generation,
                    outcome: outcome.clone(),
                });
                (Role::Leader, outcome)
            }
        };

        (role, outcome.await)
    }

    /// Number of keys with an origin call currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Removes an in-flight registration when dropped.
///
/// Runs on normal completion and during unwinding. The generation check
/// keeps a late release from evicting a newer run for the same key.
struct Release<T, E> {
    in_flight: Arc<DashMap<CacheKey, InFlight<T, E>>>,
    key: CacheKey,
    generation: u64,
}

impl<T, E> Drop for Release<T, E> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.key, |_, current| current.generation == self.generation);
    }
}
