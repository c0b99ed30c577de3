//! Single-flight coalescing of concurrent async work.
//!
//! Given a key, [`SingleFlight::run`] returns the output of the work already
//! in flight for that key, or starts and registers new work. Every caller
//! that arrives while the work is running awaits the same shared future, so
//! N concurrent callers trigger exactly one underlying operation.
//!
//! # Example
//!
//! ```
//! use agora_core::SingleFlight;
//!
//! # async fn example() {
//! let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
//! let (a, b) = futures::join!(
//!     flights.run("token", || async { 7 }),
//!     flights.run("token", || async { 8 }),
//! );
//! // The second caller joined the first flight
//! assert_eq!((a, b), (7, 7));
//! # }
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

type Flight<T> = Shared<BoxFuture<'static, T>>;
type FlightMap<K, T> = Arc<Mutex<HashMap<K, Flight<T>>>>;

/// Registry of in-flight work keyed by `K`, producing `T`.
///
/// The entry for a key is removed by the work itself when it completes, so a
/// call made after completion always starts fresh work. If every waiter is
/// dropped before completion the entry stays registered and the next caller
/// resumes the same work.
pub struct SingleFlight<K, T> {
    flights: FlightMap<K, T>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the flight for `key`, or start one with `start`.
    ///
    /// `start` is only invoked when no flight is registered for `key`.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut flights = self
                .flights
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if let Some(existing) = flights.get(&key) {
                existing.clone()
            } else {
                let registry = Arc::clone(&self.flights);
                let owned_key = key.clone();
                let work = start();
                let flight = async move {
                    let output = work.await;
                    registry
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&owned_key);
                    output
                }
                .boxed()
                .shared();
                flights.insert(key, flight.clone());
                flight
            }
        };

        flight.await
    }

    /// Whether work is registered for `key`
    #[must_use]
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of keys with registered work
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Clone for SingleFlight<K, T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<K, T> std::fmt::Debug for SingleFlight<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight").finish_non_exhaustive()
    }
}
