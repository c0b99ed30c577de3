//! Engagement actions for one kind (bookshelf, cook log, quotes, ...).
//!
//! An [`EngagementService`] ties three pieces to one kind's endpoints:
//!
//! - an [`OptimisticMutationController`] keyed by post, holding confirmed
//!   records and optimistic slots;
//! - a [`PaginatedCollectionLoader`] for the user's own records ("mine");
//! - the [`EngagementApi`] calls.
//!
//! Confirmed mutations are folded into the loaded "mine" collection so lists
//! stay consistent without a reload. A page fetched before a mutation was
//! confirmed never overwrites the confirmed record.

use crate::categories::MemberRefresh;
use crate::optimistic::{Intent, MutationAction, MutationOutcome, OptimisticMutationController};
use crate::pagination::{Identified, LoadOutcome, PageSource, PaginatedCollectionLoader};
use crate::store::{Collection, EntityStore};
use agora_core::environment::{Clock, SystemClock};
use agora_core::{
    CategoryId, Cursor, EngagementFilter, EngagementKind, EngagementPatch, EngagementRecord, Page, PostId,
    Rating, UserId,
};
use agora_transport::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Engagement endpoints
pub trait EngagementApi: Send + Sync {
    /// Create or update the caller's record of `kind` for `post`
    fn upsert(
        &self,
        kind: EngagementKind,
        post: &PostId,
        patch: &EngagementPatch,
    ) -> impl Future<Output = Result<EngagementRecord>> + Send;

    /// Remove the caller's record of `kind` for `post`
    fn remove(
        &self,
        kind: EngagementKind,
        post: &PostId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// One page of the caller's records of `kind`, newest first
    fn list_mine(
        &self,
        kind: EngagementKind,
        filter: &EngagementFilter,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> impl Future<Output = Result<Page<EngagementRecord>>> + Send;
}

impl<A: EngagementApi> EngagementApi for Arc<A> {
    fn upsert(
        &self,
        kind: EngagementKind,
        post: &PostId,
        patch: &EngagementPatch,
    ) -> impl Future<Output = Result<EngagementRecord>> + Send {
        (**self).upsert(kind, post, patch)
    }

    fn remove(
        &self,
        kind: EngagementKind,
        post: &PostId,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).remove(kind, post)
    }

    fn list_mine(
        &self,
        kind: EngagementKind,
        filter: &EngagementFilter,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> impl Future<Output = Result<Page<EngagementRecord>>> + Send {
        (**self).list_mine(kind, filter, cursor, limit)
    }
}

/// Page source for the caller's own records of one kind
#[derive(Debug)]
pub struct MineSource<A> {
    api: Arc<A>,
    kind: EngagementKind,
}

impl<A> MineSource<A> {
    /// Bind `api` to `kind`
    #[must_use]
    pub const fn new(api: Arc<A>, kind: EngagementKind) -> Self {
        Self { api, kind }
    }
}

impl<A: EngagementApi> PageSource<EngagementRecord, EngagementFilter> for MineSource<A> {
    fn fetch_page(
        &self,
        filter: &EngagementFilter,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> impl Future<Output = Result<Page<EngagementRecord>>> + Send {
        self.api.list_mine(self.kind, filter, cursor, limit)
    }
}

/// Loaded "mine" collection of one kind
pub type MineCollection = Collection<EngagementRecord, EngagementFilter>;

/// Optimistic engagement actions and the "mine" list for one kind.
pub struct EngagementService<A> {
    kind: EngagementKind,
    owner: UserId,
    api: Arc<A>,
    controller: OptimisticMutationController<PostId, EngagementRecord>,
    mine: PaginatedCollectionLoader<EngagementRecord, EngagementFilter, MineSource<A>>,
    clock: Arc<dyn Clock>,
}

impl<A: EngagementApi> EngagementService<A> {
    /// Create a service for `owner`'s records of `kind`
    #[must_use]
    pub fn new(kind: EngagementKind, owner: UserId, api: Arc<A>) -> Self {
        Self {
            kind,
            owner,
            controller: OptimisticMutationController::new(kind.wire_name()),
            mine: PaginatedCollectionLoader::new(
                kind.wire_name(),
                MineSource::new(Arc::clone(&api), kind),
            ),
            api,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for timestamps on speculative records
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the "mine" page size
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.mine = self.mine.with_page_size(page_size);
        self
    }

    /// Engagement kind
    #[must_use]
    pub const fn kind(&self) -> EngagementKind {
        self.kind
    }

    /// Owning user
    #[must_use]
    pub const fn owner(&self) -> &UserId {
        &self.owner
    }

    /// The mutation controller
    #[must_use]
    pub const fn controller(&self) -> &OptimisticMutationController<PostId, EngagementRecord> {
        &self.controller
    }

    /// Create or update the record for `post`.
    ///
    /// The speculative record starts from the known one (or a fresh pending
    /// record) with `patch` applied. Saving over a soft-deleted record keeps
    /// its identity and clears `deleted_at`.
    pub async fn save(
        &self,
        post: &PostId,
        patch: EngagementPatch,
    ) -> MutationOutcome<EngagementRecord> {
        let kind = self.kind;
        let now = self.clock.now();
        let owner = self.owner.clone();
        let api = Arc::clone(&self.api);
        let target = post.clone();
        let changes = patch.clone();

        let outcome = self
            .controller
            .mutate(
                post.clone(),
                MutationAction::Save,
                |snapshot| {
                    let mut record = snapshot
                        .cloned()
                        .unwrap_or_else(|| EngagementRecord::pending(owner, post.clone(), kind, now));
                    patch.apply_to(&mut record);
                    record.deleted_at = None;
                    record.updated_at = now;
                    Intent::Upsert(record)
                },
                move || async move { api.upsert(kind, &target, &changes).await.map(Some) },
            )
            .await;

        self.sync_mine(post, &outcome);
        outcome
    }

    /// Move the record to a category, or to Uncategorized with `None`
    pub async fn set_category(
        &self,
        post: &PostId,
        category: Option<CategoryId>,
    ) -> MutationOutcome<EngagementRecord> {
        self.save(post, EngagementPatch::new().with_category(category))
            .await
    }

    /// Set or clear the rating
    pub async fn rate(
        &self,
        post: &PostId,
        rating: Option<Rating>,
    ) -> MutationOutcome<EngagementRecord> {
        self.save(post, EngagementPatch::new().with_rating(rating))
            .await
    }

    /// Select `rating`; selecting the current rating again clears it
    pub async fn toggle_rating(
        &self,
        post: &PostId,
        rating: Rating,
    ) -> MutationOutcome<EngagementRecord> {
        let current = self.view(post).and_then(|record| record.rating);
        let next = (current != Some(rating)).then_some(rating);
        self.rate(post, next).await
    }

    /// Set or clear the notes
    pub async fn set_notes(
        &self,
        post: &PostId,
        notes: Option<String>,
    ) -> MutationOutcome<EngagementRecord> {
        self.save(post, EngagementPatch::new().with_notes(notes))
            .await
    }

    /// Remove the record for `post`; nothing is sent when there is none
    pub async fn remove(&self, post: &PostId) -> MutationOutcome<EngagementRecord> {
        let kind = self.kind;
        let api = Arc::clone(&self.api);
        let target = post.clone();

        let outcome = self
            .controller
            .mutate(
                post.clone(),
                MutationAction::Remove,
                |snapshot| {
                    if snapshot.is_some_and(EngagementRecord::is_active) {
                        Intent::Remove
                    } else {
                        Intent::Noop
                    }
                },
                move || async move { api.remove(kind, &target).await.map(|()| None) },
            )
            .await;

        self.sync_mine(post, &outcome);
        outcome
    }

    /// The record the user sees for `post`; soft-deleted records are hidden
    #[must_use]
    pub fn view(&self, post: &PostId) -> Option<EngagementRecord> {
        self.controller
            .visible(post)
            .filter(EngagementRecord::is_active)
    }

    /// Whether a mutation for `post` is in flight
    #[must_use]
    pub fn is_busy(&self, post: &PostId) -> bool {
        self.controller.is_busy(post)
    }

    /// Message of the last failed mutation for `post`
    #[must_use]
    pub fn error(&self, post: &PostId) -> Option<String> {
        self.controller.error(post)
    }

    /// Dismiss the error for `post`
    pub fn clear_error(&self, post: &PostId) {
        self.controller.clear_error(post);
    }

    /// Load the first page of the caller's records matching `filter`
    ///
    /// # Errors
    ///
    /// Returns the transport error of a failed load.
    pub async fn load_mine(&self, filter: EngagementFilter) -> Result<LoadOutcome> {
        let since = self.controller.epoch();
        let outcome = self.mine.load(filter, None).await?;
        self.merge_loaded(&outcome, since);
        Ok(outcome)
    }

    /// Load the next page of the "mine" collection
    ///
    /// # Errors
    ///
    /// Returns the transport error of a failed load.
    pub async fn load_more(&self) -> Result<LoadOutcome> {
        let since = self.controller.epoch();
        let outcome = self.mine.load_more().await?;
        self.merge_loaded(&outcome, since);
        Ok(outcome)
    }

    /// Reload the first page for the current filter
    ///
    /// # Errors
    ///
    /// Returns the transport error of a failed load.
    pub async fn refresh_mine(&self) -> Result<LoadOutcome> {
        let since = self.controller.epoch();
        let outcome = self.mine.refresh().await?;
        self.merge_loaded(&outcome, since);
        Ok(outcome)
    }

    /// Clone the "mine" collection
    #[must_use]
    pub fn mine(&self) -> MineCollection {
        self.mine.collection()
    }

    /// The "mine" collection store
    #[must_use]
    pub const fn mine_store(&self) -> &EntityStore<MineCollection> {
        self.mine.store()
    }

    /// Subscribe to "mine" collection changes
    #[must_use]
    pub fn subscribe_mine(&self) -> watch::Receiver<MineCollection> {
        self.mine.store().subscribe()
    }

    /// Forget all records, slots and the loaded list
    pub fn reset(&self) {
        self.controller.reset();
        self.mine.reset();
    }

    /// Merge loaded records fetched at epoch `since` into the controller.
    ///
    /// Records confirmed after `since` keep their confirmed value, in the
    /// controller and in the collection.
    fn merge_loaded(&self, outcome: &LoadOutcome, since: u64) {
        if !matches!(outcome, LoadOutcome::Loaded { .. }) {
            return;
        }
        let records = self.mine.store().state(|collection| {
            collection
                .items
                .iter()
                .map(|record| (record.key(), record.clone()))
                .collect::<Vec<_>>()
        });
        for post in self.controller.merge_fetched(records, since) {
            let confirmed = self.controller.confirmed(&post);
            self.fold_into_mine(&post, confirmed.as_ref());
        }
    }

    /// Fold a confirmed mutation into the loaded "mine" collection
    fn sync_mine(&self, post: &PostId, outcome: &MutationOutcome<EngagementRecord>) {
        if let MutationOutcome::Confirmed(confirmed) = outcome {
            self.fold_into_mine(post, confirmed.as_ref());
        }
    }

    fn fold_into_mine(&self, post: &PostId, confirmed: Option<&EngagementRecord>) {
        self.mine.store().modify(|collection| {
            let Some(filter) = collection.filter.as_ref() else {
                return ((), false);
            };
            let position = collection.items.iter().position(|r| &r.subject == post);
            let belongs = confirmed.filter(|record| record.is_active() && filter.category.matches(record));

            match (position, belongs) {
                (Some(index), Some(record)) => collection.items[index] = record.clone(),
                (None, Some(record)) => collection.items.insert(0, record.clone()),
                (Some(index), None) => {
                    collection.items.remove(index);
                },
                (None, None) => return ((), false),
            }
            ((), true)
        });
        debug!(kind = self.kind.wire_name(), %post, "Mine collection synced");
    }
}

impl<A: EngagementApi> MemberRefresh for EngagementService<A> {
    async fn refresh_members(&self, kind: EngagementKind) {
        if kind != self.kind {
            return;
        }
        if let Err(error) = self.refresh_mine().await {
            warn!(kind = kind.wire_name(), error = %error, "Refreshing category members failed");
        }
    }
}

impl<A> std::fmt::Debug for EngagementService<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngagementService")
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
