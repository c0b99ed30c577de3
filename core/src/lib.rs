//! # Agora Core
//!
//! Domain types and synchronization primitives shared by the Agora client
//! crates.
//!
//! ## Core Concepts
//!
//! - **Engagement records**: a user's save, rating or log attached to a post
//! - **Categories**: user-scoped, manually ordered buckets for records
//! - **Pages**: cursor-paginated slices of a collection
//! - **Optimistic slots**: the per-entity `Unset | Speculative | ConfirmedOverride`
//!   lifecycle used while a mutation is in flight
//! - **Single-flight**: coalescing concurrent identical async work into one
//!   shared future
//!
//! The [`wire`] module is the only place that knows the snake_case JSON shape
//! the backend speaks. Everything else works with the typed [`model`].
//!
//! ## Example
//!
//! ```
//! use agora_core::model::{EngagementKind, Rating};
//! use agora_core::slot::OptimisticSlot;
//!
//! let slot = OptimisticSlot::Speculative(Rating::new(4));
//! assert!(slot.is_speculative());
//! assert_eq!(EngagementKind::CookLog.path_segment(), "cook-log");
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Domain model types
pub mod model;

/// Optimistic slot lifecycle
pub mod slot;

/// Single-flight coalescing of concurrent async work
pub mod single_flight;

/// Wire DTOs and the mapping functions between wire and domain
pub mod wire;

/// Environment module - Dependency injection traits
///
/// All ambient dependencies (currently only time) are abstracted behind
/// traits so speculative records get deterministic timestamps in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use agora_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use model::{
    Category, CategoryFilter, CategoryId, Cursor, EmbedPreview, EngagementFilter,
    EngagementKind, EngagementPatch, EngagementRecord, Page, PostId, Rating, RecordId,
    UploadedFile, UserId,
};
pub use single_flight::SingleFlight;
pub use slot::OptimisticSlot;
pub use wire::WireError;
