//! # Agora Testing
//!
//! Testing utilities and helpers for the Agora client crates.
//!
//! This crate provides:
//! - A fixed [`Clock`] for deterministic speculative timestamps
//! - Builders for records, categories and pages
//! - In-memory fakes of the engagement and category APIs
//! - Property-based testing strategies for domain values
//!
//! ## Example
//!
//! ```
//! use agora_core::{EngagementKind, PostId, Rating, UserId};
//! use agora_runtime::EngagementService;
//! use agora_testing::{MockEngagementApi, test_clock};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let api = Arc::new(MockEngagementApi::new());
//! let shelf = EngagementService::new(EngagementKind::Bookshelf, UserId::new("u1"), api)
//!     .with_clock(Arc::new(test_clock()));
//!
//! let post = PostId::new("p1");
//! assert!(shelf.rate(&post, Rating::new(5)).await.is_confirmed());
//! assert_eq!(shelf.view(&post).and_then(|r| r.rating), Rating::new(5));
//! # }
//! ```

use agora_core::environment::Clock;
use chrono::{DateTime, Utc};

/// In-memory fakes of the API traits
pub mod api_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use agora_testing::mocks::FixedClock;
    /// use agora_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// The instant every fixture uses: 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }
}

/// Builders for domain fixtures
pub mod builders {
    use super::mocks::test_time;
    use agora_core::{
        Category, CategoryId, Cursor, EngagementKind, EngagementRecord, Page, PostId, Rating,
        RecordId, UserId,
    };

    /// Owner used by every fixture
    pub const TEST_USER: &str = "user-1";

    /// A confirmed record of `kind` for `post`
    #[must_use]
    pub fn record(kind: EngagementKind, post: &str) -> EngagementRecord {
        EngagementRecord {
            id: Some(RecordId::new(format!("rec-{post}"))),
            ..EngagementRecord::pending(UserId::new(TEST_USER), PostId::new(post), kind, test_time())
        }
    }

    /// A confirmed bookshelf record for `post`
    #[must_use]
    pub fn shelf_record(post: &str) -> EngagementRecord {
        record(EngagementKind::Bookshelf, post)
    }

    /// `record` with a rating; out-of-range values leave it unrated
    #[must_use]
    pub fn rated(mut record: EngagementRecord, rating: u8) -> EngagementRecord {
        record.rating = Rating::new(rating);
        record
    }

    /// `record` placed in `category`
    #[must_use]
    pub fn in_category(mut record: EngagementRecord, category: &str) -> EngagementRecord {
        record.category_id = Some(CategoryId::new(category));
        record
    }

    /// A category of `kind` at `position`
    #[must_use]
    pub fn category(kind: EngagementKind, id: &str, name: &str, position: u32) -> Category {
        Category {
            id: CategoryId::new(id),
            owner: UserId::new(TEST_USER),
            kind,
            name: name.to_string(),
            position,
            created_at: test_time(),
        }
    }

    /// Bookshelf categories named `names`, positioned in order, with ids
    /// `{name}_id`
    #[must_use]
    pub fn shelf_categories(names: &[&str]) -> Vec<Category> {
        names
            .iter()
            .zip(0u32..)
            .map(|(name, position)| {
                category(EngagementKind::Bookshelf, &format!("{name}_id"), name, position)
            })
            .collect()
    }

    /// A page of bookshelf records for `posts`
    #[must_use]
    pub fn shelf_page(posts: &[&str], next_cursor: Option<&str>) -> Page<EngagementRecord> {
        Page::new(
            posts.iter().map(|post| shelf_record(post)).collect(),
            next_cursor.map(Cursor::new),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use agora_core::{EngagementKind, Rating};
    use proptest::prelude::*;

    /// Any valid rating
    pub fn arb_rating() -> impl Strategy<Value = Rating> {
        (1u8..=5).prop_filter_map("rating in range", Rating::new)
    }

    /// Any engagement kind
    pub fn arb_kind() -> impl Strategy<Value = EngagementKind> {
        proptest::sample::select(EngagementKind::ALL.to_vec())
    }

    /// Category names that are not blank
    pub fn arb_category_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 ]{0,23}"
    }
}

/// Install a test-writer `tracing` subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use api_mocks::{
    CategoryCall, EngagementCall, MockAgoraApi, MockCategoryApi, MockEngagementApi, server_error,
};
pub use mocks::{FixedClock, test_clock, test_time};
