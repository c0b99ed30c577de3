//! Domain model for engagement records, categories and paginated results.
//!
//! These types are the typed side of the wire boundary. They carry no serde
//! derives on purpose: every conversion to or from JSON goes through the
//! explicit mapping functions in [`crate::wire`].

use chrono::{DateTime, Utc};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into the raw identifier
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a user account
    UserId
);
string_id!(
    /// Identifier of a post (book, recipe, movie, podcast episode, ...)
    PostId
);
string_id!(
    /// Server-assigned identifier of an engagement record
    RecordId
);
string_id!(
    /// Identifier of a user category
    CategoryId
);
string_id!(
    /// Opaque continuation token returned by paginated endpoints
    ///
    /// Passing the most recently returned cursor yields items strictly after
    /// those already fetched.
    Cursor
);

/// The engagement features built on the optimistic-mutation pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngagementKind {
    /// A book saved to the user's bookshelf
    Bookshelf,
    /// A logged read
    ReadLog,
    /// A logged cook of a recipe
    CookLog,
    /// A logged watch of a movie or show
    WatchLog,
    /// A saved podcast episode
    PodcastSave,
    /// A saved quote
    Quote,
}

impl EngagementKind {
    /// Every kind, in a stable order
    pub const ALL: [Self; 6] = [
        Self::Bookshelf,
        Self::ReadLog,
        Self::CookLog,
        Self::WatchLog,
        Self::PodcastSave,
        Self::Quote,
    ];

    /// URL path segment used by the kind's endpoints
    #[must_use]
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Bookshelf => "bookshelf",
            Self::ReadLog => "read-log",
            Self::CookLog => "cook-log",
            Self::WatchLog => "watch-log",
            Self::PodcastSave => "podcast-saves",
            Self::Quote => "quotes",
        }
    }

    /// Value of the `kind` field in wire payloads
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Bookshelf => "bookshelf",
            Self::ReadLog => "read_log",
            Self::CookLog => "cook_log",
            Self::WatchLog => "watch_log",
            Self::PodcastSave => "podcast_save",
            Self::Quote => "quote",
        }
    }

    /// Parse the wire `kind` field
    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }

    /// Position of the kind in [`Self::ALL`]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Bookshelf => 0,
            Self::ReadLog => 1,
            Self::CookLog => 2,
            Self::WatchLog => 3,
            Self::PodcastSave => 4,
            Self::Quote => 5,
        }
    }
}

impl fmt::Display for EngagementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A star rating between 1 and 5 inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rating(u8);

impl Rating {
    /// Lowest accepted rating
    pub const MIN: u8 = 1;
    /// Highest accepted rating
    pub const MAX: u8 = 5;

    /// Create a rating, returning `None` outside `1..=5`
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN && value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// The numeric value
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// A user's engagement with a post.
///
/// One record exists per `(owner, subject, kind)`. Records are soft-deleted:
/// a record with `deleted_at` set is hidden from active views but can still
/// be referenced for undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementRecord {
    /// Server identifier. `None` for a speculative record that has never been
    /// confirmed by the server.
    pub id: Option<RecordId>,
    /// Owning user
    pub owner: UserId,
    /// The post the engagement is attached to
    pub subject: PostId,
    /// Which engagement feature this record belongs to
    pub kind: EngagementKind,
    /// Category; `None` means the record sits in the Uncategorized bucket
    pub category_id: Option<CategoryId>,
    /// Optional star rating
    pub rating: Option<Rating>,
    /// Free-form notes
    pub notes: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EngagementRecord {
    /// Create a fresh, never-confirmed record
    #[must_use]
    pub const fn pending(
        owner: UserId,
        subject: PostId,
        kind: EngagementKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            owner,
            subject,
            kind,
            category_id: None,
            rating: None,
            notes: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the record belongs in active views
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether the record has been confirmed by the server at least once
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }

    /// Whether the record sits in the synthetic Uncategorized bucket
    #[must_use]
    pub const fn is_uncategorized(&self) -> bool {
        self.category_id.is_none()
    }
}

/// A partial update to an engagement record.
///
/// Each field is `None` to leave the value untouched, or `Some(value)` to set
/// it, where `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementPatch {
    /// New category
    pub category_id: Option<Option<CategoryId>>,
    /// New rating
    pub rating: Option<Option<Rating>>,
    /// New notes
    pub notes: Option<Option<String>>,
}

impl EngagementPatch {
    /// An empty patch (saves the record without changing any field)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the category
    #[must_use]
    pub fn with_category(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Set or clear the rating
    #[must_use]
    pub fn with_rating(mut self, rating: Option<Rating>) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Set or clear the notes
    #[must_use]
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    /// Apply the patch to a record in place
    pub fn apply_to(&self, record: &mut EngagementRecord) {
        if let Some(category_id) = &self.category_id {
            record.category_id.clone_from(category_id);
        }
        if let Some(rating) = self.rating {
            record.rating = rating;
        }
        if let Some(notes) = &self.notes {
            record.notes.clone_from(notes);
        }
    }
}

/// Which slice of a category set a collection shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum CategoryFilter {
    /// Every record regardless of category
    #[default]
    All,
    /// Only records without a category
    Uncategorized,
    /// Only records in the given category
    Only(CategoryId),
}

impl CategoryFilter {
    /// Whether a record belongs in a collection with this filter
    #[must_use]
    pub fn matches(&self, record: &EngagementRecord) -> bool {
        match self {
            Self::All => true,
            Self::Uncategorized => record.category_id.is_none(),
            Self::Only(id) => record.category_id.as_ref() == Some(id),
        }
    }
}

/// Filter for a user's engagement collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EngagementFilter {
    /// Category slice
    pub category: CategoryFilter,
}

impl EngagementFilter {
    /// Filter selecting every record
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter selecting one category
    #[must_use]
    pub const fn category(id: CategoryId) -> Self {
        Self {
            category: CategoryFilter::Only(id),
        }
    }

    /// Filter selecting the Uncategorized bucket
    #[must_use]
    pub const fn uncategorized() -> Self {
        Self {
            category: CategoryFilter::Uncategorized,
        }
    }
}

/// Display label of the synthetic bucket holding records without a category
pub const UNCATEGORIZED_LABEL: &str = "Uncategorized";

/// A user-scoped category with a manual display position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Identifier
    pub id: CategoryId,
    /// Owning user
    pub owner: UserId,
    /// Engagement kind the category organizes
    pub kind: EngagementKind,
    /// Display name, unique per user ignoring case
    pub name: String,
    /// Manual display position; contiguous `0..N-1` within a user's set
    pub position: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Category {
    /// Whether `name` collides with this category's name ignoring case and
    /// surrounding whitespace
    #[must_use]
    pub fn name_collides(&self, name: &str) -> bool {
        normalize_category_name(&self.name) == normalize_category_name(name)
    }
}

/// Case- and whitespace-insensitive form of a category name
#[must_use]
pub fn normalize_category_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Group records by category in display order.
///
/// Records whose category is unknown or unset land in a trailing
/// Uncategorized group (`None`), which is omitted when empty. Soft-deleted
/// records are skipped.
#[must_use]
pub fn group_by_category<'a>(
    records: &'a [EngagementRecord],
    categories: &'a [Category],
) -> Vec<(Option<&'a Category>, Vec<&'a EngagementRecord>)> {
    let mut ordered: Vec<&Category> = categories.iter().collect();
    ordered.sort_by_key(|category| category.position);

    let mut groups: Vec<(Option<&Category>, Vec<&EngagementRecord>)> =
        ordered.iter().map(|category| (Some(*category), Vec::new())).collect();
    let mut uncategorized = Vec::new();

    for record in records.iter().filter(|record| record.is_active()) {
        let slot = record.category_id.as_ref().and_then(|id| {
            ordered.iter().position(|category| &category.id == id)
        });
        match slot {
            Some(index) => groups[index].1.push(record),
            None => uncategorized.push(record),
        }
    }

    if !uncategorized.is_empty() {
        groups.push((None, uncategorized));
    }
    groups
}

/// Canonical page of results.
///
/// `next_cursor` is `None` when the collection is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in server order (creation time, descending)
    pub items: Vec<T>,
    /// Resumption point for the next page
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    /// Build a page
    #[must_use]
    pub const fn new(items: Vec<T>, next_cursor: Option<Cursor>) -> Self {
        Self { items, next_cursor }
    }

    /// The final page of a result set
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    /// Whether more results are available
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Link preview returned by the embed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedPreview {
    /// The previewed URL
    pub url: String,
    /// Page title
    pub title: Option<String>,
    /// Short description
    pub description: Option<String>,
    /// Preview image
    pub image_url: Option<String>,
    /// Site or provider name
    pub provider: Option<String>,
}

/// A file accepted by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Server identifier
    pub id: String,
    /// Public URL of the stored file
    pub url: String,
    /// MIME type recorded by the server
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
}
