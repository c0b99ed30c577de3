//! In-memory fakes of the engagement and category APIs
//!
//! Both fakes keep real state, so a save followed by a list returns the saved
//! record. Tests can script failures, record every call, and (for
//! engagements) hold responses in flight to observe speculative state.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use crate::builders::TEST_USER;
use crate::mocks::test_time;
use agora_core::{
    Category, CategoryId, Cursor, EngagementFilter, EngagementKind, EngagementPatch,
    EngagementRecord, Page, PostId, RecordId, UserId,
};
use agora_runtime::{CategoryApi, EngagementApi};
use agora_transport::{ApiError, Result, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// A `TransportError::Api` with `status` and no server message
#[must_use]
pub fn server_error(status: u16) -> TransportError {
    TransportError::Api(ApiError::from_response(status, ""))
}

/// A call received by [`MockEngagementApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngagementCall {
    /// `upsert`
    Upsert {
        /// Kind
        kind: EngagementKind,
        /// Post
        post: PostId,
        /// Patch sent
        patch: EngagementPatch,
    },
    /// `remove`
    Remove {
        /// Kind
        kind: EngagementKind,
        /// Post
        post: PostId,
    },
    /// `list_mine`
    ListMine {
        /// Kind
        kind: EngagementKind,
        /// Filter
        filter: EngagementFilter,
        /// Cursor sent
        cursor: Option<Cursor>,
        /// Page size
        limit: u32,
    },
}

#[derive(Default)]
struct EngagementState {
    records: HashMap<(EngagementKind, PostId), EngagementRecord>,
    upsert_failures: VecDeque<TransportError>,
    remove_failures: VecDeque<TransportError>,
    pages: VecDeque<Result<Page<EngagementRecord>>>,
    calls: Vec<EngagementCall>,
    next_id: u32,
}

/// In-memory [`EngagementApi`].
///
/// Upserts apply the patch to the stored record (creating one if needed) and
/// return it. `list_mine` returns scripted pages when any are queued,
/// otherwise every matching stored record in one page.
#[derive(Clone, Default)]
pub struct MockEngagementApi {
    state: Arc<Mutex<EngagementState>>,
    gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl MockEngagementApi {
    /// Create an empty fake
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` as if the server already had it
    #[must_use]
    pub fn with_record(self, record: EngagementRecord) -> Self {
        self.state
            .lock()
            .unwrap()
            .records
            .insert((record.kind, record.subject.clone()), record);
        self
    }

    /// Fail the next upsert with `error`
    pub fn fail_next_upsert(&self, error: TransportError) {
        self.state.lock().unwrap().upsert_failures.push_back(error);
    }

    /// Fail the next remove with `error`
    pub fn fail_next_remove(&self, error: TransportError) {
        self.state.lock().unwrap().remove_failures.push_back(error);
    }

    /// Queue a `list_mine` response
    pub fn push_page(&self, page: Result<Page<EngagementRecord>>) {
        self.state.lock().unwrap().pages.push_back(page);
    }

    /// Hold every response until [`MockEngagementApi::release`] is called
    pub fn hold_responses(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held responses through
    pub fn release(&self, count: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(count);
        }
    }

    /// Every call received, in order
    #[must_use]
    pub fn calls(&self) -> Vec<EngagementCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls received
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// The stored record of `kind` for `post`
    #[must_use]
    pub fn record(&self, kind: EngagementKind, post: &PostId) -> Option<EngagementRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&(kind, post.clone()))
            .cloned()
    }

    /// Move every record in `category` to Uncategorized, as the server does
    /// when a category is deleted
    pub fn uncategorize(&self, category: &CategoryId) {
        for record in self.state.lock().unwrap().records.values_mut() {
            if record.category_id.as_ref() == Some(category) {
                record.category_id = None;
            }
        }
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

impl EngagementApi for MockEngagementApi {
    async fn upsert(
        &self,
        kind: EngagementKind,
        post: &PostId,
        patch: &EngagementPatch,
    ) -> Result<EngagementRecord> {
        self.state.lock().unwrap().calls.push(EngagementCall::Upsert {
            kind,
            post: post.clone(),
            patch: patch.clone(),
        });
        self.pass_gate().await;

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.upsert_failures.pop_front() {
            return Err(error);
        }
        state.next_id += 1;
        let fresh_id = RecordId::new(format!("rec-{}", state.next_id));
        let record = state
            .records
            .entry((kind, post.clone()))
            .or_insert_with(|| EngagementRecord {
                id: Some(fresh_id),
                ..EngagementRecord::pending(UserId::new(TEST_USER), post.clone(), kind, test_time())
            });
        patch.apply_to(record);
        record.deleted_at = None;
        Ok(record.clone())
    }

    async fn remove(&self, kind: EngagementKind, post: &PostId) -> Result<()> {
        self.state.lock().unwrap().calls.push(EngagementCall::Remove {
            kind,
            post: post.clone(),
        });
        self.pass_gate().await;

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.remove_failures.pop_front() {
            return Err(error);
        }
        match state.records.remove(&(kind, post.clone())) {
            Some(_) => Ok(()),
            None => Err(server_error(404)),
        }
    }

    async fn list_mine(
        &self,
        kind: EngagementKind,
        filter: &EngagementFilter,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> Result<Page<EngagementRecord>> {
        self.state.lock().unwrap().calls.push(EngagementCall::ListMine {
            kind,
            filter: filter.clone(),
            cursor: cursor.cloned(),
            limit,
        });
        self.pass_gate().await;

        let mut state = self.state.lock().unwrap();
        if let Some(page) = state.pages.pop_front() {
            return page;
        }
        let mut records: Vec<EngagementRecord> = state
            .records
            .values()
            .filter(|record| {
                record.kind == kind && record.is_active() && filter.category.matches(record)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.subject.cmp(&b.subject)));
        Ok(Page::last(records))
    }
}

/// A call received by [`MockCategoryApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryCall {
    /// `list`
    List(EngagementKind),
    /// `create`
    Create(EngagementKind, String),
    /// `rename`
    Rename(CategoryId, String),
    /// `delete`
    Delete(CategoryId),
    /// `reorder`, with the ids sent
    Reorder(EngagementKind, Vec<CategoryId>),
}

#[derive(Default)]
struct CategoryState {
    categories: Vec<Category>,
    failures: VecDeque<TransportError>,
    calls: Vec<CategoryCall>,
    next_id: u32,
}

/// In-memory [`CategoryApi`] that keeps positions contiguous like the
/// server does.
#[derive(Clone, Default)]
pub struct MockCategoryApi {
    state: Arc<Mutex<CategoryState>>,
}

impl MockCategoryApi {
    /// Create an empty fake
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `categories`
    #[must_use]
    pub fn with_categories(self, categories: Vec<Category>) -> Self {
        self.state.lock().unwrap().categories = categories;
        self
    }

    /// Fail the next call, whatever it is, with `error`
    pub fn fail_next(&self, error: TransportError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    /// Every call received, in order
    #[must_use]
    pub fn calls(&self) -> Vec<CategoryCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls received
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Id lists sent to `reorder`
    #[must_use]
    pub fn reorder_calls(&self) -> Vec<Vec<CategoryId>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                CategoryCall::Reorder(_, ids) => Some(ids),
                _ => None,
            })
            .collect()
    }

    /// Stored categories of `kind`, by position
    #[must_use]
    pub fn stored(&self, kind: EngagementKind) -> Vec<Category> {
        let mut categories: Vec<Category> = self
            .state
            .lock()
            .unwrap()
            .categories
            .iter()
            .filter(|category| category.kind == kind)
            .cloned()
            .collect();
        categories.sort_by_key(|category| category.position);
        categories
    }

    fn begin(&self, call: CategoryCall) -> Result<std::sync::MutexGuard<'_, CategoryState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

fn renumber(categories: &mut [Category], kind: EngagementKind) {
    let mut position = 0;
    let mut ordered: Vec<&mut Category> = categories.iter_mut().filter(|c| c.kind == kind).collect();
    ordered.sort_by_key(|category| category.position);
    for category in ordered {
        category.position = position;
        position += 1;
    }
}

impl CategoryApi for MockCategoryApi {
    async fn list(&self, kind: EngagementKind) -> Result<Vec<Category>> {
        drop(self.begin(CategoryCall::List(kind))?);
        Ok(self.stored(kind))
    }

    async fn create(&self, kind: EngagementKind, name: &str) -> Result<Category> {
        let mut state = self.begin(CategoryCall::Create(kind, name.to_string()))?;
        let taken = state
            .categories
            .iter()
            .any(|category| category.kind == kind && category.name_collides(name));
        if taken {
            return Err(server_error(409));
        }
        state.next_id += 1;
        let position = u32::try_from(state.categories.iter().filter(|c| c.kind == kind).count())
            .unwrap_or(u32::MAX);
        let category = Category {
            id: CategoryId::new(format!("cat-{}", state.next_id)),
            owner: UserId::new(TEST_USER),
            kind,
            name: name.to_string(),
            position,
            created_at: test_time(),
        };
        state.categories.push(category.clone());
        Ok(category)
    }

    async fn rename(&self, id: &CategoryId, name: &str) -> Result<Category> {
        let mut state = self.begin(CategoryCall::Rename(id.clone(), name.to_string()))?;
        let category = state
            .categories
            .iter_mut()
            .find(|category| &category.id == id)
            .ok_or_else(|| server_error(404))?;
        category.name = name.to_string();
        Ok(category.clone())
    }

    async fn delete(&self, id: &CategoryId) -> Result<()> {
        let mut state = self.begin(CategoryCall::Delete(id.clone()))?;
        let index = state
            .categories
            .iter()
            .position(|category| &category.id == id)
            .ok_or_else(|| server_error(404))?;
        let removed = state.categories.remove(index);
        renumber(&mut state.categories, removed.kind);
        Ok(())
    }

    async fn reorder(&self, kind: EngagementKind, ids: &[CategoryId]) -> Result<()> {
        let mut state = self.begin(CategoryCall::Reorder(kind, ids.to_vec()))?;
        for (id, position) in ids.iter().zip(0u32..) {
            if let Some(category) = state.categories.iter_mut().find(|c| &c.id == id) {
                category.position = position;
            }
        }
        Ok(())
    }
}

/// Both fakes behind one value, for code that needs a single API
/// implementing every trait. Deleting a category uncategorizes its records.
#[derive(Clone, Default)]
pub struct MockAgoraApi {
    /// Engagement half
    pub engagements: MockEngagementApi,
    /// Category half
    pub categories: MockCategoryApi,
}

impl MockAgoraApi {
    /// Create an empty fake
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EngagementApi for MockAgoraApi {
    async fn upsert(
        &self,
        kind: EngagementKind,
        post: &PostId,
        patch: &EngagementPatch,
    ) -> Result<EngagementRecord> {
        self.engagements.upsert(kind, post, patch).await
    }

    async fn remove(&self, kind: EngagementKind, post: &PostId) -> Result<()> {
        self.engagements.remove(kind, post).await
    }

    async fn list_mine(
        &self,
        kind: EngagementKind,
        filter: &EngagementFilter,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> Result<Page<EngagementRecord>> {
        self.engagements.list_mine(kind, filter, cursor, limit).await
    }
}

impl CategoryApi for MockAgoraApi {
    async fn list(&self, kind: EngagementKind) -> Result<Vec<Category>> {
        self.categories.list(kind).await
    }

    async fn create(&self, kind: EngagementKind, name: &str) -> Result<Category> {
        self.categories.create(kind, name).await
    }

    async fn rename(&self, id: &CategoryId, name: &str) -> Result<Category> {
        self.categories.rename(id, name).await
    }

    async fn delete(&self, id: &CategoryId) -> Result<()> {
        self.categories.delete(id).await?;
        self.engagements.uncategorize(id);
        Ok(())
    }

    async fn reorder(&self, kind: EngagementKind, ids: &[CategoryId]) -> Result<()> {
        self.categories.reorder(kind, ids).await
    }
}
