//! The optimistic mutation protocol.
//!
//! Every engagement action (save, rate, log, remove) follows the same steps:
//!
//! 1. **Guard**: if a mutation for the key is already in flight, skip
//! 2. **Snapshot** the visible value
//! 3. **Publish** the speculative value so subscribers render it at once
//! 4. **Call** the server
//! 5. **Settle**: on success store the confirmed value and clear the slot;
//!    on failure restore the snapshot as a `ConfirmedOverride` and record the
//!    error. The busy flag clears in the same update.
//!
//! Steps 1 to 3 run as one atomic store update, as does step 5, so no
//! observer ever sees a `Speculative` slot for a key that is not in flight.
//! A mutation future dropped before it settles rolls back the same way a
//! failure does, without recording an error.
//!
//! Every confirmation stamps its key with a new epoch. List data fetched
//! before that epoch is older than the confirmed value and is not merged.

use crate::store::EntityStore;
use agora_core::OptimisticSlot;
use agora_transport::TransportError;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Which kind of action a mutation performs; picks the fallback message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    /// Create or change the entity
    Save,
    /// Delete the entity
    Remove,
}

impl MutationAction {
    /// Message shown when the server gave no usable one
    #[must_use]
    pub const fn fallback_message(self) -> &'static str {
        match self {
            Self::Save => "Failed to save.",
            Self::Remove => "Failed to remove.",
        }
    }
}

/// What a mutation intends the entity to become, computed from the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent<T> {
    /// The entity becomes this value
    Upsert(T),
    /// The entity goes away
    Remove,
    /// Nothing to do; no call is made
    Noop,
}

/// Result of a mutation attempt
#[derive(Debug, Clone)]
pub enum MutationOutcome<T> {
    /// Another mutation for the key was in flight; nothing happened
    Skipped,
    /// The intent was a no-op; nothing was sent
    Noop,
    /// The server confirmed; `None` when the entity no longer exists
    Confirmed(Option<T>),
    /// The server rejected; the snapshot was restored
    Failed {
        /// Message for the user
        message: String,
        /// Underlying error
        error: TransportError,
    },
}

impl<T> MutationOutcome<T> {
    /// Whether the server confirmed the mutation
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    /// Whether the mutation was rolled back
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Confirmed values, slots, busy flags and errors for every key.
#[derive(Debug, Clone)]
pub struct MutationState<K, T> {
    /// Last value confirmed by the server
    pub confirmed: HashMap<K, T>,
    /// Optimistic overrides; a missing entry is `Unset`
    pub slots: HashMap<K, OptimisticSlot<Option<T>>>,
    /// Keys with a mutation in flight
    pub in_flight: HashSet<K>,
    /// Message of each key's last failed mutation
    pub errors: HashMap<K, String>,
    /// Epoch of the last confirmation; bumped on every confirmed mutation
    pub epoch: u64,
    /// Epoch at which each key was last confirmed
    pub settled: HashMap<K, u64>,
}

impl<K: Eq + Hash, T: Clone> MutationState<K, T> {
    /// The value the user sees for `key`
    #[must_use]
    pub fn visible(&self, key: &K) -> Option<T> {
        let confirmed = || self.confirmed.get(key).cloned();
        match self.slots.get(key) {
            Some(slot) => slot.resolve(confirmed),
            None => confirmed(),
        }
    }

    /// The slot for `key`
    #[must_use]
    pub fn slot(&self, key: &K) -> OptimisticSlot<Option<T>> {
        self.slots.get(key).cloned().unwrap_or_default()
    }

    /// Whether `key` was confirmed after epoch `since`
    #[must_use]
    pub fn settled_after(&self, key: &K, since: u64) -> bool {
        self.settled.get(key).is_some_and(|&at| at > since)
    }
}

impl<K, T> Default for MutationState<K, T> {
    fn default() -> Self {
        Self {
            confirmed: HashMap::new(),
            slots: HashMap::new(),
            in_flight: HashSet::new(),
            errors: HashMap::new(),
            epoch: 0,
            settled: HashMap::new(),
        }
    }
}

enum Start<T> {
    Skipped,
    Noop,
    Started(Option<T>),
}

impl<T> Default for Start<T> {
    fn default() -> Self {
        Self::Skipped
    }
}

/// Holds a started mutation's snapshot until it settles.
///
/// Dropped while still armed (the mutation future was cancelled), it restores
/// the snapshot as a `ConfirmedOverride` and clears the busy flag.
struct InFlight<'a, K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    name: &'static str,
    store: &'a EntityStore<MutationState<K, T>>,
    key: K,
    snapshot: Option<Option<T>>,
}

impl<K, T> InFlight<'_, K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// Take the snapshot; the guard no longer rolls back on drop
    fn disarm(&mut self) -> Option<T> {
        self.snapshot.take().flatten()
    }
}

impl<K, T> Drop for InFlight<'_, K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    fn drop(&mut self) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        let key = &self.key;
        // A reset while in flight already cleared the key
        let rolled_back = self.store.modify(|state| {
            if !state.in_flight.remove(key) {
                return (false, false);
            }
            state
                .slots
                .insert(key.clone(), OptimisticSlot::rolled_back(snapshot));
            (true, true)
        });
        if rolled_back {
            counter!("optimistic.cancellations.total").increment(1);
            debug!(controller = self.name, ?key, "Mutation cancelled, rolled back");
        }
    }
}

/// Runs the optimistic protocol for entities of type `T` keyed by `K`.
///
/// Cheap to clone; clones share state.
pub struct OptimisticMutationController<K, T> {
    name: &'static str,
    store: EntityStore<MutationState<K, T>>,
}

impl<K, T> OptimisticMutationController<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// Create a controller; `name` labels its log lines
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            store: EntityStore::default(),
        }
    }

    /// Run one mutation.
    ///
    /// `synthesize` receives the snapshot and returns the intent. `call`
    /// performs the server request and resolves to the confirmed value
    /// (`None` when the entity no longer exists).
    pub async fn mutate<S, C, Fut>(
        &self,
        key: K,
        action: MutationAction,
        synthesize: S,
        call: C,
    ) -> MutationOutcome<T>
    where
        S: FnOnce(Option<&T>) -> Intent<T>,
        C: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, TransportError>>,
    {
        let start = self.store.modify(|state| {
            if state.in_flight.contains(&key) {
                return (Start::Skipped, false);
            }
            let snapshot = state.visible(&key);
            let speculative = match synthesize(snapshot.as_ref()) {
                Intent::Upsert(value) => Some(value),
                Intent::Remove => None,
                Intent::Noop => return (Start::Noop, false),
            };
            state.in_flight.insert(key.clone());
            state.errors.remove(&key);
            state
                .slots
                .insert(key.clone(), OptimisticSlot::Speculative(speculative));
            (Start::Started(snapshot), true)
        });

        let snapshot = match start {
            Start::Skipped => {
                debug!(controller = self.name, ?key, "Mutation already in flight, skipping");
                return MutationOutcome::Skipped;
            },
            Start::Noop => return MutationOutcome::Noop,
            Start::Started(snapshot) => snapshot,
        };
        let mut guard = InFlight {
            name: self.name,
            store: &self.store,
            key: key.clone(),
            snapshot: Some(snapshot),
        };

        counter!("optimistic.mutations.total").increment(1);
        debug!(controller = self.name, ?key, ?action, "Mutation started");

        let result = call().await;
        let snapshot = guard.disarm();

        match result {
            Ok(confirmed) => {
                self.store.update(|state| {
                    match &confirmed {
                        Some(value) => {
                            state.confirmed.insert(key.clone(), value.clone());
                        },
                        None => {
                            state.confirmed.remove(&key);
                        },
                    }
                    state.epoch += 1;
                    state.settled.insert(key.clone(), state.epoch);
                    state.slots.remove(&key);
                    state.in_flight.remove(&key);
                });
                debug!(controller = self.name, ?key, "Mutation confirmed");
                MutationOutcome::Confirmed(confirmed)
            },
            Err(error) => {
                let message = error.user_message(action.fallback_message());
                counter!("optimistic.rollbacks.total").increment(1);
                warn!(
                    controller = self.name,
                    ?key,
                    ?action,
                    error = %error,
                    "Mutation rejected, rolling back"
                );
                self.store.update(|state| {
                    state
                        .slots
                        .insert(key.clone(), OptimisticSlot::rolled_back(snapshot));
                    state.errors.insert(key.clone(), message.clone());
                    state.in_flight.remove(&key);
                });
                MutationOutcome::Failed { message, error }
            },
        }
    }

    /// The value the user sees for `key`
    #[must_use]
    pub fn visible(&self, key: &K) -> Option<T> {
        self.store.state(|state| state.visible(key))
    }

    /// The slot for `key`
    #[must_use]
    pub fn slot(&self, key: &K) -> OptimisticSlot<Option<T>> {
        self.store.state(|state| state.slot(key))
    }

    /// Whether a mutation for `key` is in flight
    #[must_use]
    pub fn is_busy(&self, key: &K) -> bool {
        self.store.state(|state| state.in_flight.contains(key))
    }

    /// Message of the last failed mutation for `key`
    #[must_use]
    pub fn error(&self, key: &K) -> Option<String> {
        self.store.state(|state| state.errors.get(key).cloned())
    }

    /// Dismiss the error for `key`
    pub fn clear_error(&self, key: &K) {
        self.store
            .modify(|state| ((), state.errors.remove(key).is_some()));
    }

    /// Current confirmation epoch; capture it before fetching list data
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.store.state(|state| state.epoch)
    }

    /// Last value confirmed by the server for `key`
    #[must_use]
    pub fn confirmed(&self, key: &K) -> Option<T> {
        self.store.state(|state| state.confirmed.get(key).cloned())
    }

    /// Record server state learned outside a mutation
    pub fn merge_confirmed<I>(&self, values: I)
    where
        I: IntoIterator<Item = (K, T)>,
    {
        let since = self.epoch();
        self.merge_fetched(values, since);
    }

    /// Record server state fetched at epoch `since` (a list load).
    ///
    /// Settled overrides for these keys are dropped so the fresh values show;
    /// keys with a mutation in flight keep their speculative slot. Keys
    /// confirmed after `since` keep their newer value and are returned.
    pub fn merge_fetched<I>(&self, values: I, since: u64) -> Vec<K>
    where
        I: IntoIterator<Item = (K, T)>,
    {
        let mut newer = Vec::new();
        self.store.update(|state| {
            for (key, value) in values {
                if state.settled_after(&key, since) {
                    newer.push(key);
                    continue;
                }
                if !state.in_flight.contains(&key) {
                    state.slots.remove(&key);
                }
                state.confirmed.insert(key, value);
            }
        });
        if !newer.is_empty() {
            debug!(controller = self.name, kept = newer.len(), "Kept values newer than fetched list");
        }
        newer
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MutationState<K, T>> {
        self.store.subscribe()
    }

    /// Clone the whole state
    #[must_use]
    pub fn snapshot(&self) -> MutationState<K, T> {
        self.store.get()
    }

    /// Forget everything
    pub fn reset(&self) {
        self.store.reset();
    }
}

impl<K, T> Clone for OptimisticMutationController<K, T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            store: self.store.clone(),
        }
    }
}

impl<K: Debug, T: Debug> Debug for OptimisticMutationController<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticMutationController")
            .field("name", &self.name)
            .field("store", &self.store)
            .finish()
    }
}
