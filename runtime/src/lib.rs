//! # Agora Runtime
//!
//! Client-side state for the Agora community: reactive stores, the
//! optimistic mutation protocol, cursor pagination and category management.
//!
//! ## Core Components
//!
//! - **EntityStore**: observable state container backed by a `watch` channel
//! - **OptimisticMutationController**: apply now, confirm or roll back, one
//!   in-flight mutation per key
//! - **PaginatedCollectionLoader**: cursor-based "load more"
//! - **CategoryManager**: ordered, uniquely named categories
//! - **EngagementService**: the above bound to one engagement kind
//! - **AgoraSync**: lazily built services for every kind
//!
//! ## Example
//!
//! ```no_run
//! use agora_core::{EngagementKind, PostId, Rating, UserId};
//! use agora_runtime::AgoraSync;
//! use agora_transport::{ClientConfig, RequestTransport};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = RequestTransport::new(ClientConfig::new("https://agora.example"))?;
//! let sync = AgoraSync::new(Arc::new(transport), UserId::new("u1"));
//!
//! let shelf = sync.engagement(EngagementKind::Bookshelf);
//! let post = PostId::new("p1");
//! let outcome = shelf.rate(&post, Rating::new(4)).await;
//! if outcome.is_failed() {
//!     println!("{:?}", shelf.error(&post));
//! }
//! # Ok(())
//! # }
//! ```

/// Observable stores and collection state
pub mod store;

/// Apply-now, confirm-or-rollback mutations
pub mod optimistic;

/// Cursor-based incremental loading
pub mod pagination;

/// Category list management
pub mod categories;

/// Engagement actions per kind
pub mod engagement;

/// HTTP implementations of the API traits
pub mod api;

/// Per-session context
pub mod sync;

pub use categories::{CategoryApi, CategoryError, CategoryManager, MemberRefresh};
pub use engagement::{EngagementApi, EngagementService, MineCollection, MineSource};
pub use optimistic::{
    Intent, MutationAction, MutationOutcome, MutationState, OptimisticMutationController,
};
pub use pagination::{Identified, LoadOutcome, PageSource, PaginatedCollectionLoader};
pub use store::{Collection, EntityStore};
pub use sync::AgoraSync;
