//! Reactive in-memory stores.
//!
//! An [`EntityStore`] owns one piece of state and notifies subscribers when
//! it changes. The mutation surface is deliberately small: [`update`],
//! [`modify`], [`set`] and [`reset`]. Readers either borrow the current state
//! through [`state`] or clone it with [`get`].
//!
//! [`update`]: EntityStore::update
//! [`modify`]: EntityStore::modify
//! [`set`]: EntityStore::set
//! [`reset`]: EntityStore::reset
//! [`state`]: EntityStore::state
//! [`get`]: EntityStore::get

use agora_core::Cursor;
use std::sync::Arc;
use tokio::sync::watch;

/// Observable state container.
///
/// Cheap to clone; clones share state and subscribers.
///
/// # Example
///
/// ```
/// use agora_runtime::store::EntityStore;
///
/// let store = EntityStore::new(0u32);
/// let mut changes = store.subscribe();
///
/// store.update(|count| *count += 1);
///
/// assert!(changes.has_changed().unwrap_or(false));
/// assert_eq!(store.get(), 1);
/// ```
pub struct EntityStore<S> {
    sender: Arc<watch::Sender<S>>,
}

impl<S> EntityStore<S> {
    /// Create a store holding `initial`
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            sender: Arc::new(watch::Sender::new(initial)),
        }
    }

    /// Read state through a closure
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        f(&self.sender.borrow())
    }

    /// Clone the current state
    #[must_use]
    pub fn get(&self) -> S
    where
        S: Clone,
    {
        self.sender.borrow().clone()
    }

    /// Mutate state and notify subscribers
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut S),
    {
        self.sender.send_modify(f);
    }

    /// Mutate state, notifying subscribers only when `f` reports a change.
    ///
    /// `f` returns its output together with the change flag; the whole
    /// closure runs under the store's write lock, so a read-check-write
    /// inside it is atomic with respect to other updates.
    pub fn modify<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut S) -> (T, bool),
        T: Default,
    {
        let mut output = T::default();
        self.sender.send_if_modified(|state| {
            let (value, changed) = f(state);
            output = value;
            changed
        });
        output
    }

    /// Replace state and notify subscribers
    pub fn set(&self, value: S) {
        self.sender.send_replace(value);
    }

    /// Restore the default state and notify subscribers
    pub fn reset(&self)
    where
        S: Default,
    {
        self.set(S::default());
    }

    /// Subscribe to changes.
    ///
    /// The receiver starts out having seen the current state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<S: Default> Default for EntityStore<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S> Clone for EntityStore<S> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for EntityStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("state", &*self.sender.borrow())
            .finish()
    }
}

/// A loaded collection with its loading metadata.
///
/// `F` is the filter the items were loaded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection<T, F> {
    /// Items in display order
    pub items: Vec<T>,
    /// Filter the items belong to; `None` before the first load
    pub filter: Option<F>,
    /// A load is in flight
    pub loading: bool,
    /// Message of the last failed load
    pub error: Option<String>,
    /// Cursor for the next page; `None` when exhausted
    pub next_cursor: Option<Cursor>,
    /// At least one page has been applied
    pub loaded: bool,
    /// Bumped whenever a load starts or the collection is reset, so late
    /// responses can tell they are stale
    pub generation: u64,
}

impl<T, F> Collection<T, F> {
    /// Whether another page is available
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Whether the collection currently belongs to `filter`
    #[must_use]
    pub fn is_for(&self, filter: &F) -> bool
    where
        F: PartialEq,
    {
        self.filter.as_ref() == Some(filter)
    }
}

impl<T, F> Default for Collection<T, F> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            filter: None,
            loading: false,
            error: None,
            next_cursor: None,
            loaded: false,
            generation: 0,
        }
    }
}
