//! The per-session sync context.
//!
//! [`AgoraSync`] owns one [`EngagementService`] and one [`CategoryManager`]
//! per engagement kind, created on first use and shared from then on. Each
//! category manager refreshes its kind's "mine" list after a delete.

use crate::categories::{CategoryApi, CategoryManager};
use crate::engagement::{EngagementApi, EngagementService};
use agora_core::environment::{Clock, SystemClock};
use agora_core::{EngagementKind, UserId};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of engagement kinds
const KINDS: usize = EngagementKind::ALL.len();

/// Category manager wired to its kind's engagement service
pub type KindCategories<A> = CategoryManager<Arc<A>, Arc<EngagementService<A>>>;

/// Lazily built services for every engagement kind of one user.
pub struct AgoraSync<A> {
    api: Arc<A>,
    owner: UserId,
    clock: Arc<dyn Clock>,
    engagements: [OnceCell<Arc<EngagementService<A>>>; KINDS],
    categories: [OnceCell<KindCategories<A>>; KINDS],
}

impl<A> AgoraSync<A>
where
    A: EngagementApi + CategoryApi,
{
    /// Create a context for `owner`
    #[must_use]
    pub fn new(api: Arc<A>, owner: UserId) -> Self {
        Self {
            api,
            owner,
            clock: Arc::new(SystemClock),
            engagements: std::array::from_fn(|_| OnceCell::new()),
            categories: std::array::from_fn(|_| OnceCell::new()),
        }
    }

    /// Use `clock` for speculative timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The shared API
    #[must_use]
    pub const fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Signed-in user
    #[must_use]
    pub const fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Engagement service for `kind`
    #[must_use]
    pub fn engagement(&self, kind: EngagementKind) -> &Arc<EngagementService<A>> {
        self.engagements[kind.index()].get_or_init(|| {
            debug!(kind = kind.wire_name(), "Creating engagement service");
            Arc::new(
                EngagementService::new(kind, self.owner.clone(), Arc::clone(&self.api))
                    .with_clock(Arc::clone(&self.clock)),
            )
        })
    }

    /// Category manager for `kind`
    #[must_use]
    pub fn categories(&self, kind: EngagementKind) -> &KindCategories<A> {
        self.categories[kind.index()].get_or_init(|| {
            debug!(kind = kind.wire_name(), "Creating category manager");
            CategoryManager::new(kind, Arc::clone(&self.api))
                .with_member_refresh(Arc::clone(self.engagement(kind)))
        })
    }

    /// Whether the service for `kind` has been created
    #[must_use]
    pub fn is_initialized(&self, kind: EngagementKind) -> bool {
        self.engagements[kind.index()].get().is_some()
    }

    /// Clear every created store, as on sign-out
    pub fn reset(&self) {
        for service in self.engagements.iter().filter_map(OnceCell::get) {
            service.reset();
        }
        for manager in self.categories.iter().filter_map(OnceCell::get) {
            manager.reset();
        }
        info!(owner = %self.owner, "Sync state reset");
    }
}

impl<A> std::fmt::Debug for AgoraSync<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let initialized: Vec<EngagementKind> = EngagementKind::ALL
            .into_iter()
            .filter(|kind| self.engagements[kind.index()].get().is_some())
            .collect();
        f.debug_struct("AgoraSync")
            .field("owner", &self.owner)
            .field("initialized", &initialized)
            .finish_non_exhaustive()
    }
}
