//! User categories for one engagement kind.
//!
//! Categories are ordered manually and their names are unique per user,
//! ignoring case and surrounding whitespace. Name checks and order checks
//! happen locally, before any request is sent.

use crate::store::{Collection, EntityStore};
use agora_core::model::normalize_category_name;
use agora_core::{Category, CategoryId, EngagementKind};
use agora_transport::TransportError;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Errors from category operations
#[derive(Debug, Clone, Error)]
pub enum CategoryError {
    /// The request was rejected locally; nothing was sent
    #[error("{0}")]
    Validation(String),

    /// The category is not in the loaded list
    #[error("Unknown category: {0}")]
    NotFound(CategoryId),

    /// The server call failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CategoryError {
    /// Message for the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::NotFound(_) => "That category no longer exists.".to_string(),
            Self::Transport(error) => error.user_message("Failed to update categories."),
        }
    }
}

/// Category endpoints
pub trait CategoryApi: Send + Sync {
    /// All categories of `kind`, sorted by position
    fn list(
        &self,
        kind: EngagementKind,
    ) -> impl Future<Output = Result<Vec<Category>, TransportError>> + Send;

    /// Create a category at the end of the list
    fn create(
        &self,
        kind: EngagementKind,
        name: &str,
    ) -> impl Future<Output = Result<Category, TransportError>> + Send;

    /// Rename a category
    fn rename(
        &self,
        id: &CategoryId,
        name: &str,
    ) -> impl Future<Output = Result<Category, TransportError>> + Send;

    /// Delete a category; its records move to Uncategorized
    fn delete(&self, id: &CategoryId) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Store the complete display order
    fn reorder(
        &self,
        kind: EngagementKind,
        ids: &[CategoryId],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<A: CategoryApi> CategoryApi for Arc<A> {
    fn list(
        &self,
        kind: EngagementKind,
    ) -> impl Future<Output = Result<Vec<Category>, TransportError>> + Send {
        (**self).list(kind)
    }

    fn create(
        &self,
        kind: EngagementKind,
        name: &str,
    ) -> impl Future<Output = Result<Category, TransportError>> + Send {
        (**self).create(kind, name)
    }

    fn rename(
        &self,
        id: &CategoryId,
        name: &str,
    ) -> impl Future<Output = Result<Category, TransportError>> + Send {
        (**self).rename(id, name)
    }

    fn delete(&self, id: &CategoryId) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).delete(id)
    }

    fn reorder(
        &self,
        kind: EngagementKind,
        ids: &[CategoryId],
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).reorder(kind, ids)
    }
}

/// Reloads the records that belong to categories, so records reassigned to
/// Uncategorized by a delete show up there
pub trait MemberRefresh: Send + Sync {
    /// Reload members of `kind`
    fn refresh_members(&self, kind: EngagementKind) -> impl Future<Output = ()> + Send;
}

impl MemberRefresh for () {
    async fn refresh_members(&self, _kind: EngagementKind) {}
}

impl<M: MemberRefresh> MemberRefresh for Arc<M> {
    fn refresh_members(&self, kind: EngagementKind) -> impl Future<Output = ()> + Send {
        (**self).refresh_members(kind)
    }
}

/// Check a proposed name against the existing categories.
///
/// `renaming` is the category being renamed; it may keep its own name with
/// different case. Returns the trimmed name.
///
/// # Errors
///
/// Returns `CategoryError::Validation` for a blank name or a name another
/// category already uses.
pub fn validate_name(
    categories: &[Category],
    name: &str,
    renaming: Option<&CategoryId>,
) -> Result<String, CategoryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CategoryError::Validation(
            "Category name cannot be empty.".to_string(),
        ));
    }
    let normalized = normalize_category_name(trimmed);
    let taken = categories.iter().any(|category| {
        Some(&category.id) != renaming && normalize_category_name(&category.name) == normalized
    });
    if taken {
        return Err(CategoryError::Validation(format!(
            "A category named \"{trimmed}\" already exists."
        )));
    }
    Ok(trimmed.to_string())
}

/// Rearrange `categories` into the order of `ids`, renumbering positions
/// `0..N-1`.
///
/// # Errors
///
/// Returns `CategoryError::Validation` unless `ids` is a permutation of the
/// categories' ids.
pub fn apply_order(categories: &[Category], ids: &[CategoryId]) -> Result<Vec<Category>, CategoryError> {
    let invalid = || CategoryError::Validation("The new order must list every category exactly once.".to_string());
    if ids.len() != categories.len() {
        return Err(invalid());
    }
    let mut seen = HashSet::with_capacity(ids.len());
    if !ids.iter().all(|id| seen.insert(id)) {
        return Err(invalid());
    }

    ids.iter()
        .zip(0u32..)
        .map(|(id, position)| {
            categories
                .iter()
                .find(|category| &category.id == id)
                .map(|category| Category {
                    position,
                    ..category.clone()
                })
                .ok_or_else(invalid)
        })
        .collect()
}

fn renumber(categories: &mut [Category]) {
    for (category, position) in categories.iter_mut().zip(0u32..) {
        category.position = position;
    }
}

/// Ordered, user-scoped category list for one engagement kind.
pub struct CategoryManager<A, M = ()> {
    kind: EngagementKind,
    api: A,
    members: M,
    store: EntityStore<Collection<Category, EngagementKind>>,
}

impl<A: CategoryApi> CategoryManager<A, ()> {
    /// Create a manager with an empty list
    #[must_use]
    pub fn new(kind: EngagementKind, api: A) -> Self {
        Self {
            kind,
            api,
            members: (),
            store: EntityStore::default(),
        }
    }
}

impl<A: CategoryApi, M: MemberRefresh> CategoryManager<A, M> {
    /// Refresh `members` after a delete
    #[must_use]
    pub fn with_member_refresh<N: MemberRefresh>(self, members: N) -> CategoryManager<A, N> {
        CategoryManager {
            kind: self.kind,
            api: self.api,
            members,
            store: self.store,
        }
    }

    /// Engagement kind of this list
    #[must_use]
    pub const fn kind(&self) -> EngagementKind {
        self.kind
    }

    /// Categories in display order
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.store.state(|collection| collection.items.clone())
    }

    /// Look up a category
    #[must_use]
    pub fn get(&self, id: &CategoryId) -> Option<Category> {
        self.store
            .state(|collection| collection.items.iter().find(|c| &c.id == id).cloned())
    }

    /// Whether a request is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.store.state(|collection| collection.loading)
    }

    /// Message of the last failed operation
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.store.state(|collection| collection.error.clone())
    }

    /// Subscribe to list changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Collection<Category, EngagementKind>> {
        self.store.subscribe()
    }

    /// Load the authoritative list
    ///
    /// # Errors
    ///
    /// Returns `CategoryError::Transport` if the list cannot be fetched.
    pub async fn refresh(&self) -> Result<Vec<Category>, CategoryError> {
        let kind = self.kind;
        self.store.update(|collection| {
            collection.filter = Some(kind);
            collection.loading = true;
            collection.error = None;
        });

        match self.api.list(kind).await {
            Ok(mut categories) => {
                categories.sort_by_key(|category| category.position);
                self.store.update(|collection| {
                    collection.items.clone_from(&categories);
                    collection.loading = false;
                    collection.loaded = true;
                });
                debug!(kind = kind.wire_name(), count = categories.len(), "Categories loaded");
                Ok(categories)
            },
            Err(error) => Err(self.record_failure("refresh", error.into())),
        }
    }

    /// Create a category.
    ///
    /// # Errors
    ///
    /// Returns `CategoryError::Validation` without a request for a blank or
    /// duplicate name, or `CategoryError::Transport` if the server rejects it.
    pub async fn create(&self, name: &str) -> Result<Category, CategoryError> {
        let name = validate_name(&self.categories(), name, None)?;
        self.begin();

        match self.api.create(self.kind, &name).await {
            Ok(created) => {
                self.store.update(|collection| {
                    collection.items.retain(|category| category.id != created.id);
                    collection.items.push(created.clone());
                    collection.items.sort_by_key(|category| category.position);
                    collection.loading = false;
                });
                info!(kind = self.kind.wire_name(), id = %created.id, "Category created");
                Ok(created)
            },
            Err(error) => Err(self.record_failure("create", error.into())),
        }
    }

    /// Rename a category.
    ///
    /// # Errors
    ///
    /// Returns `CategoryError::NotFound` for an unknown id,
    /// `CategoryError::Validation` for a blank or duplicate name, or
    /// `CategoryError::Transport` if the server rejects it.
    pub async fn rename(&self, id: &CategoryId, name: &str) -> Result<Category, CategoryError> {
        let categories = self.categories();
        if !categories.iter().any(|category| &category.id == id) {
            return Err(CategoryError::NotFound(id.clone()));
        }
        let name = validate_name(&categories, name, Some(id))?;
        self.begin();

        match self.api.rename(id, &name).await {
            Ok(renamed) => {
                self.store.update(|collection| {
                    if let Some(slot) = collection.items.iter_mut().find(|c| c.id == renamed.id) {
                        *slot = renamed.clone();
                    }
                    collection.loading = false;
                });
                info!(kind = self.kind.wire_name(), %id, "Category renamed");
                Ok(renamed)
            },
            Err(error) => Err(self.record_failure("rename", error.into())),
        }
    }

    /// Delete a category, then ask the member hook to reload so its records
    /// show as Uncategorized.
    ///
    /// # Errors
    ///
    /// Returns `CategoryError::NotFound` for an unknown id, or
    /// `CategoryError::Transport` if the server rejects it.
    pub async fn delete(&self, id: &CategoryId) -> Result<(), CategoryError> {
        if self.get(id).is_none() {
            return Err(CategoryError::NotFound(id.clone()));
        }
        self.begin();

        match self.api.delete(id).await {
            Ok(()) => {
                self.store.update(|collection| {
                    collection.items.retain(|category| &category.id != id);
                    renumber(&mut collection.items);
                    collection.loading = false;
                });
                info!(kind = self.kind.wire_name(), %id, "Category deleted");
                self.members.refresh_members(self.kind).await;
                Ok(())
            },
            Err(error) => Err(self.record_failure("delete", error.into())),
        }
    }

    /// Reorder categories.
    ///
    /// The new order is shown at once and the complete id list sent in one
    /// request. If the request fails the authoritative list is reloaded.
    ///
    /// # Errors
    ///
    /// Returns `CategoryError::Validation` without a request unless `ids` is a
    /// permutation of the current ids, or `CategoryError::Transport` if the
    /// server rejects the order.
    pub async fn reorder(&self, ids: &[CategoryId]) -> Result<(), CategoryError> {
        let current = self.categories();
        let reordered = apply_order(&current, ids)?;
        if reordered == current {
            return Ok(());
        }

        self.store.update(|collection| {
            collection.items = reordered;
            collection.loading = true;
            collection.error = None;
        });

        match self.api.reorder(self.kind, ids).await {
            Ok(()) => {
                self.store.update(|collection| collection.loading = false);
                debug!(kind = self.kind.wire_name(), count = ids.len(), "Categories reordered");
                Ok(())
            },
            Err(error) => {
                let failure = self.record_failure("reorder", error.into());
                if let Err(reload) = self.refresh().await {
                    warn!(error = %reload, "Reloading categories after a failed reorder also failed");
                }
                self.store
                    .update(|collection| collection.error = Some(failure.user_message()));
                Err(failure)
            },
        }
    }

    /// Forget the loaded list
    pub fn reset(&self) {
        self.store.reset();
    }

    fn begin(&self) {
        self.store.update(|collection| {
            collection.loading = true;
            collection.error = None;
        });
    }

    fn record_failure(&self, operation: &'static str, error: CategoryError) -> CategoryError {
        warn!(kind = self.kind.wire_name(), operation, error = %error, "Category operation failed");
        let message = error.user_message();
        self.store.update(|collection| {
            collection.loading = false;
            collection.error = Some(message);
        });
        error
    }
}

impl<A, M> std::fmt::Debug for CategoryManager<A, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryManager")
            .field("kind", &self.kind)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
