//! Cursor-based incremental loading.
//!
//! [`PaginatedCollectionLoader::load`] with no cursor replaces the
//! collection; with a cursor it appends the next page, skipping items already
//! present. Whether more pages exist is derived only from the last page's
//! cursor.
//!
//! Each started load bumps the collection's generation. A response whose
//! generation no longer matches (because a load for another filter started,
//! or the collection was reset) is discarded. A load future dropped before
//! its response arrives clears the loading flag it set.

use crate::store::{Collection, EntityStore};
use agora_core::{Category, CategoryId, Cursor, EngagementRecord, Page, PostId};
use agora_transport::{Result, TransportError};
use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tracing::{debug, warn};

/// Default page size
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Message recorded on the collection when a load fails
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load.";

/// Items with a stable identity, used to drop duplicates across pages
pub trait Identified {
    /// Identity type
    type Key: Eq + Hash + Clone;

    /// This item's identity
    fn key(&self) -> Self::Key;
}

impl Identified for EngagementRecord {
    type Key = PostId;

    fn key(&self) -> PostId {
        self.subject.clone()
    }
}

impl Identified for Category {
    type Key = CategoryId;

    fn key(&self) -> CategoryId {
        self.id.clone()
    }
}

/// Where pages come from
pub trait PageSource<T, F>: Send + Sync {
    /// Fetch the page after `cursor` (the first page when `None`)
    fn fetch_page(
        &self,
        filter: &F,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> impl Future<Output = Result<Page<T>>> + Send;
}

/// Result of a load call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A load for the same filter was already in flight; nothing was sent
    Skipped,
    /// The response arrived after the collection moved on and was discarded,
    /// or a page was requested for a filter the collection no longer holds
    Stale,
    /// There is no next page; nothing was sent
    Exhausted,
    /// A page was applied
    Loaded {
        /// Items received, including duplicates that were skipped
        received: usize,
        /// Cursor of the page just applied
        next_cursor: Option<Cursor>,
    },
}

#[derive(Default)]
enum Begin {
    #[default]
    Skipped,
    Stale,
    Started(u64),
}

/// Clears `loading` for its generation when a load is abandoned
struct PendingLoad<'a, T, F> {
    name: &'static str,
    store: &'a EntityStore<Collection<T, F>>,
    generation: u64,
}

impl<T, F> Drop for PendingLoad<'_, T, F> {
    fn drop(&mut self) {
        let generation = self.generation;
        let abandoned = self.store.modify(|collection| {
            if collection.generation != generation || !collection.loading {
                return (false, false);
            }
            collection.loading = false;
            (true, true)
        });
        if abandoned {
            debug!(loader = self.name, generation, "Load cancelled");
        }
    }
}

/// Loads pages of `T` for a filter `F` into an [`EntityStore`].
pub struct PaginatedCollectionLoader<T, F, P> {
    name: &'static str,
    store: EntityStore<Collection<T, F>>,
    source: P,
    page_size: u32,
}

impl<T, F, P> PaginatedCollectionLoader<T, F, P>
where
    T: Identified + Clone,
    F: Clone + PartialEq + Debug,
    P: PageSource<T, F>,
{
    /// Create a loader with an empty collection; `name` labels its log lines
    #[must_use]
    pub fn new(name: &'static str, source: P) -> Self {
        Self {
            name,
            store: EntityStore::default(),
            source,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the page size
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The collection store
    #[must_use]
    pub const fn store(&self) -> &EntityStore<Collection<T, F>> {
        &self.store
    }

    /// The page source
    #[must_use]
    pub const fn source(&self) -> &P {
        &self.source
    }

    /// Clone the collection
    #[must_use]
    pub fn collection(&self) -> Collection<T, F> {
        self.store.get()
    }

    /// Load a page.
    ///
    /// # Errors
    ///
    /// Returns the transport error of a failed, still-current load; the
    /// collection's `error` is set and its items are kept.
    pub async fn load(&self, filter: F, cursor: Option<Cursor>) -> Result<LoadOutcome> {
        let begin = self.store.modify(|collection| {
            let same_filter = collection.is_for(&filter);
            if collection.loading && same_filter {
                return (Begin::Skipped, false);
            }
            if cursor.is_some() && !same_filter {
                return (Begin::Stale, false);
            }
            collection.generation += 1;
            collection.loading = true;
            collection.error = None;
            if !same_filter {
                collection.filter = Some(filter.clone());
            }
            (Begin::Started(collection.generation), true)
        });

        let generation = match begin {
            Begin::Skipped => {
                debug!(loader = self.name, ?filter, "Load already in flight, skipping");
                return Ok(LoadOutcome::Skipped);
            },
            Begin::Stale => return Ok(LoadOutcome::Stale),
            Begin::Started(generation) => generation,
        };

        let _pending = PendingLoad {
            name: self.name,
            store: &self.store,
            generation,
        };

        debug!(loader = self.name, ?filter, cursor = ?cursor, "Loading page");
        let result = self
            .source
            .fetch_page(&filter, cursor.as_ref(), self.page_size)
            .await;

        match result {
            Ok(page) => Ok(self.apply(generation, cursor.is_some(), page)),
            Err(error) => self.fail(generation, error),
        }
    }

    /// Load the page after the stored cursor
    ///
    /// # Errors
    ///
    /// See [`PaginatedCollectionLoader::load`].
    pub async fn load_more(&self) -> Result<LoadOutcome> {
        let resume = self.store.state(|collection| {
            collection
                .filter
                .clone()
                .zip(collection.next_cursor.clone())
        });
        match resume {
            Some((filter, cursor)) => self.load(filter, Some(cursor)).await,
            None => Ok(LoadOutcome::Exhausted),
        }
    }

    /// Reload the first page for the current filter
    ///
    /// # Errors
    ///
    /// See [`PaginatedCollectionLoader::load`].
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        match self.store.state(|collection| collection.filter.clone()) {
            Some(filter) => self.load(filter, None).await,
            None => Ok(LoadOutcome::Exhausted),
        }
    }

    /// Empty the collection; in-flight responses are discarded
    pub fn reset(&self) {
        self.store.update(|collection| {
            let generation = collection.generation + 1;
            *collection = Collection {
                generation,
                ..Collection::default()
            };
        });
    }

    fn apply(&self, generation: u64, append: bool, page: Page<T>) -> LoadOutcome {
        let received = page.items.len();
        let next_cursor = page.next_cursor.clone();

        let applied = self.store.modify(|collection| {
            if collection.generation != generation {
                return (false, false);
            }

            let mut seen: HashSet<T::Key> = if append {
                collection.items.iter().map(Identified::key).collect()
            } else {
                HashSet::new()
            };
            let fresh = page.items.into_iter().filter(|item| seen.insert(item.key()));
            if append {
                collection.items.extend(fresh);
            } else {
                collection.items = fresh.collect();
            }

            collection.next_cursor = page.next_cursor;
            collection.loading = false;
            collection.loaded = true;
            (true, true)
        });

        if applied {
            debug!(loader = self.name, received, has_more = next_cursor.is_some(), "Page applied");
            LoadOutcome::Loaded {
                received,
                next_cursor,
            }
        } else {
            debug!(loader = self.name, "Discarding stale page");
            LoadOutcome::Stale
        }
    }

    fn fail(&self, generation: u64, error: TransportError) -> Result<LoadOutcome> {
        let current = self.store.modify(|collection| {
            if collection.generation != generation {
                return (false, false);
            }
            collection.loading = false;
            collection.error = Some(error.user_message(LOAD_FAILED_MESSAGE));
            (true, true)
        });

        if current {
            warn!(loader = self.name, error = %error, "Page load failed");
            Err(error)
        } else {
            Ok(LoadOutcome::Stale)
        }
    }
}

impl<T: Debug, F: Debug, P> Debug for PaginatedCollectionLoader<T, F, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedCollectionLoader")
            .field("name", &self.name)
            .field("page_size", &self.page_size)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item(&'static str);

    impl Identified for Item {
        type Key = &'static str;

        fn key(&self) -> &'static str {
            self.0
        }
    }

    /// Pages keyed by cursor (`""` for the first page)
    #[derive(Default)]
    struct StaticPages {
        pages: HashMap<&'static str, Page<Item>>,
        calls: Mutex<Vec<Option<String>>>,
        gate: Option<Arc<Semaphore>>,
    }

    impl StaticPages {
        fn with(mut self, cursor: &'static str, items: &[&'static str], next: Option<&str>) -> Self {
            let items = items.iter().copied().map(Item).collect();
            self.pages
                .insert(cursor, Page::new(items, next.map(Cursor::new)));
            self
        }

        /// Hold every response until released
        fn held(mut self) -> Self {
            self.gate = Some(Arc::new(Semaphore::new(0)));
            self
        }

        fn release(&self, count: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(count);
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl PageSource<Item, &'static str> for StaticPages {
        async fn fetch_page(
            &self,
            _filter: &&'static str,
            cursor: Option<&Cursor>,
            _limit: u32,
        ) -> Result<Page<Item>> {
            self.calls
                .lock()
                .unwrap()
                .push(cursor.map(|c| c.as_str().to_string()));
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let key = cursor.map_or("", Cursor::as_str);
            self.pages
                .get(key)
                .cloned()
                .ok_or_else(|| TransportError::Network("no such page".to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_load_replaces_and_reload_does_not_duplicate() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a", "b"], Some("c1")),
        );

        loader.load("all", None).await.unwrap();
        loader.load("all", None).await.unwrap();

        let collection = loader.collection();
        assert_eq!(collection.items, vec![Item("a"), Item("b")]);
        assert!(collection.has_more());
        assert!(!collection.loading);
    }

    #[tokio::test]
    async fn test_append_skips_items_already_present() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default()
                .with("", &["a", "b"], Some("c1"))
                .with("c1", &["b", "c"], None),
        );

        loader.load("all", None).await.unwrap();
        let outcome = loader.load_more().await.unwrap();

        assert_eq!(
            outcome,
            LoadOutcome::Loaded {
                received: 2,
                next_cursor: None
            }
        );
        assert_eq!(loader.collection().items, vec![Item("a"), Item("b"), Item("c")]);
        assert_eq!(loader.load_more().await.unwrap(), LoadOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_failure_keeps_items_and_records_error() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a"], Some("missing")),
        );
        loader.load("all", None).await.unwrap();

        let error = loader.load_more().await.unwrap_err();

        assert!(matches!(error, TransportError::Network(_)));
        let collection = loader.collection();
        assert_eq!(collection.items, vec![Item("a")]);
        assert_eq!(collection.error.as_deref(), Some(LOAD_FAILED_MESSAGE));
        assert!(!collection.loading);
    }

    #[tokio::test]
    async fn test_cursor_for_another_filter_is_stale() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a"], Some("c1")),
        );
        loader.load("all", None).await.unwrap();

        let outcome = loader.load("favorites", Some(Cursor::new("c1"))).await.unwrap();

        assert_eq!(outcome, LoadOutcome::Stale);
        assert_eq!(loader.source().calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_empties_collection() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a"], None),
        );
        loader.load("all", None).await.unwrap();

        loader.reset();

        let collection = loader.collection();
        assert!(collection.items.is_empty());
        assert!(collection.filter.is_none());
        assert!(!collection.loaded);
        assert_eq!(loader.refresh().await.unwrap(), LoadOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_second_load_for_same_filter_is_skipped() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a"], None).held(),
        );

        let first = loader.load("all", None);
        tokio::pin!(first);
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(loader.collection().loading);

        assert_eq!(loader.load("all", None).await.unwrap(), LoadOutcome::Skipped);
        assert_eq!(loader.source().call_count(), 1);

        loader.source().release(1);
        assert!(matches!(first.await.unwrap(), LoadOutcome::Loaded { received: 1, .. }));
        assert!(!loader.collection().loading);
    }

    #[tokio::test]
    async fn test_response_for_previous_filter_is_discarded() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a"], None).held(),
        );

        let first = loader.load("all", None);
        tokio::pin!(first);
        assert!(futures::poll!(first.as_mut()).is_pending());
        let second = loader.load("favorites", None);
        tokio::pin!(second);
        assert!(futures::poll!(second.as_mut()).is_pending());

        loader.source().release(2);

        assert_eq!(first.await.unwrap(), LoadOutcome::Stale);
        assert!(matches!(second.await.unwrap(), LoadOutcome::Loaded { .. }));
        let collection = loader.collection();
        assert_eq!(collection.filter, Some("favorites"));
        assert_eq!(collection.items, vec![Item("a")]);
        assert!(!collection.loading);
    }

    #[tokio::test]
    async fn test_response_after_reset_is_discarded() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a"], None).held(),
        );

        let pending = loader.load("all", None);
        tokio::pin!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());

        loader.reset();
        loader.source().release(1);

        assert_eq!(pending.await.unwrap(), LoadOutcome::Stale);
        let collection = loader.collection();
        assert!(collection.items.is_empty());
        assert!(!collection.loaded);
    }

    #[tokio::test]
    async fn test_dropped_load_clears_loading() {
        let loader = PaginatedCollectionLoader::new(
            "test",
            StaticPages::default().with("", &["a"], None).held(),
        );

        {
            let pending = loader.load("all", None);
            tokio::pin!(pending);
            assert!(futures::poll!(pending.as_mut()).is_pending());
            assert!(loader.collection().loading);
        }
        assert!(!loader.collection().loading);

        loader.source().release(1);
        let outcome = loader.load("all", None).await.unwrap();

        assert!(matches!(outcome, LoadOutcome::Loaded { received: 1, .. }));
        assert_eq!(loader.source().call_count(), 2);
    }
}
