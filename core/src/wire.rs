//! Wire DTOs and the mapping functions between wire and domain.
//!
//! The backend speaks snake_case JSON. Each DTO here mirrors one payload
//! exactly, and each mapping function converts one DTO to or from its domain
//! type. Field sets are small and known, so the mappings are written out by
//! hand rather than derived.
//!
//! ## Pagination envelopes
//!
//! Two endpoint families return different envelopes:
//!
//! ```json
//! { "items": [...], "has_more": true, "next_cursor": "c1" }
//! { "items": [...], "hasMore": true, "cursor": "c1" }
//! ```
//!
//! [`page_from_wire`] normalizes both into [`Page`]: the cursor is taken from
//! `next_cursor`, then `cursor`; an explicit `false` from either `has_more`
//! flag drops the cursor; an empty cursor string counts as absent.

use crate::model::{
    Category, CategoryFilter, CategoryId, Cursor, EmbedPreview, EngagementFilter,
    EngagementKind, EngagementPatch, EngagementRecord, Page, PostId, Rating, RecordId,
    UploadedFile, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while mapping a wire payload into the domain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The `kind` field named no known engagement kind
    #[error("Unknown engagement kind: {0}")]
    UnknownKind(String),

    /// A rating outside `1..=5`
    #[error("Rating out of range: {0}")]
    InvalidRating(u8),

    /// The payload carried no usable anti-forgery token
    #[error("Anti-forgery token missing from response")]
    MissingToken,
}

// ============================================================================
// Engagement records
// ============================================================================

/// Engagement record as sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEngagementRecord {
    /// Record id
    pub id: String,
    /// Owner id
    pub user_id: String,
    /// Subject post id
    pub post_id: String,
    /// Kind; some endpoints omit it because the path implies it
    #[serde(default)]
    pub kind: Option<String>,
    /// Category id
    #[serde(default)]
    pub category_id: Option<String>,
    /// Rating
    #[serde(default)]
    pub rating: Option<u8>,
    /// Notes
    #[serde(default)]
    pub notes: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Map a wire record into the domain.
///
/// `kind_hint` is used when the payload omits `kind`.
///
/// # Errors
///
/// Returns [`WireError::UnknownKind`] or [`WireError::InvalidRating`] for
/// payloads the domain cannot represent.
pub fn record_from_wire(
    wire: WireEngagementRecord,
    kind_hint: EngagementKind,
) -> Result<EngagementRecord, WireError> {
    let kind = match wire.kind.as_deref() {
        Some(name) => EngagementKind::from_wire_name(name)
            .ok_or_else(|| WireError::UnknownKind(name.to_string()))?,
        None => kind_hint,
    };
    let rating = wire
        .rating
        .map(|value| Rating::new(value).ok_or(WireError::InvalidRating(value)))
        .transpose()?;

    Ok(EngagementRecord {
        id: Some(RecordId::new(wire.id)),
        owner: UserId::new(wire.user_id),
        subject: PostId::new(wire.post_id),
        kind,
        category_id: wire.category_id.map(CategoryId::new),
        rating,
        notes: wire.notes,
        created_at: wire.created_at,
        updated_at: wire.updated_at,
        deleted_at: wire.deleted_at,
    })
}

/// Body of an engagement upsert.
///
/// Absent fields are left untouched by the server; `null` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WireEngagementUpsert {
    /// Category id, `null` to move to Uncategorized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Option<String>>,
    /// Rating, `null` to clear
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<Option<u8>>,
    /// Notes, `null` to clear
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

/// Map a domain patch into an upsert body
#[must_use]
pub fn patch_to_wire(patch: &EngagementPatch) -> WireEngagementUpsert {
    WireEngagementUpsert {
        category_id: patch
            .category_id
            .as_ref()
            .map(|id| id.as_ref().map(|id| id.as_str().to_string())),
        rating: patch.rating.map(|rating| rating.map(Rating::get)),
        notes: patch.notes.clone(),
    }
}

/// Query parameters for a user's engagement collection
#[must_use]
pub fn filter_to_query(filter: &EngagementFilter) -> Vec<(String, String)> {
    match &filter.category {
        CategoryFilter::All => Vec::new(),
        CategoryFilter::Uncategorized => vec![("category_id".to_string(), "none".to_string())],
        CategoryFilter::Only(id) => vec![("category_id".to_string(), id.as_str().to_string())],
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Either pagination envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WirePage<T> {
    /// Page items
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// `has_more` flag of the snake_case family
    #[serde(default)]
    pub has_more: Option<bool>,
    /// `hasMore` flag of the camelCase family
    #[serde(default, rename = "hasMore")]
    pub has_more_camel: Option<bool>,
    /// Cursor of the snake_case family
    #[serde(default)]
    pub next_cursor: Option<String>,
    /// Cursor of the camelCase family
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Normalize either envelope into a [`Page`], mapping each item with `map`.
///
/// # Errors
///
/// Returns the first item mapping error.
pub fn page_from_wire<T, U, F>(wire: WirePage<T>, map: F) -> Result<Page<U>, WireError>
where
    F: FnMut(T) -> Result<U, WireError>,
{
    let exhausted = wire.has_more == Some(false) || wire.has_more_camel == Some(false);
    let next_cursor = if exhausted {
        None
    } else {
        wire.next_cursor
            .or(wire.cursor)
            .filter(|cursor| !cursor.is_empty())
            .map(Cursor::new)
    };
    let items = wire.items.into_iter().map(map).collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, next_cursor))
}

// ============================================================================
// Categories
// ============================================================================

/// Category as sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCategory {
    /// Category id
    pub id: String,
    /// Owner id
    pub user_id: String,
    /// Engagement kind
    pub kind: String,
    /// Display name
    pub name: String,
    /// Display position
    pub position: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Map a wire category into the domain.
///
/// # Errors
///
/// Returns [`WireError::UnknownKind`] for an unrecognized kind.
pub fn category_from_wire(wire: WireCategory) -> Result<Category, WireError> {
    let kind = EngagementKind::from_wire_name(&wire.kind)
        .ok_or_else(|| WireError::UnknownKind(wire.kind.clone()))?;
    Ok(Category {
        id: CategoryId::new(wire.id),
        owner: UserId::new(wire.user_id),
        kind,
        name: wire.name,
        position: wire.position,
        created_at: wire.created_at,
    })
}

/// Category list response; older endpoints return a bare array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireCategoryList {
    /// `{ "categories": [...] }`
    Wrapped {
        /// The categories
        categories: Vec<WireCategory>,
    },
    /// `[...]`
    Bare(Vec<WireCategory>),
}

/// Map a category list, returning categories sorted by position.
///
/// # Errors
///
/// Returns the first category mapping error.
pub fn categories_from_wire(wire: WireCategoryList) -> Result<Vec<Category>, WireError> {
    let raw = match wire {
        WireCategoryList::Wrapped { categories } | WireCategoryList::Bare(categories) => {
            categories
        },
    };
    let mut categories = raw
        .into_iter()
        .map(category_from_wire)
        .collect::<Result<Vec<_>, _>>()?;
    categories.sort_by_key(|category| category.position);
    Ok(categories)
}

/// Body of a category create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireCategoryCreate {
    /// Name
    pub name: String,
    /// Engagement kind
    pub kind: &'static str,
}

/// Body of a category rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireCategoryRename {
    /// New name
    pub name: String,
}

/// Body of a category reorder: the complete id list in display order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireCategoryOrder {
    /// Engagement kind
    pub kind: &'static str,
    /// Ids, first displayed first
    pub ids: Vec<String>,
}

/// Map a reorder request into its body
#[must_use]
pub fn order_to_wire(kind: EngagementKind, ids: &[CategoryId]) -> WireCategoryOrder {
    WireCategoryOrder {
        kind: kind.wire_name(),
        ids: ids.iter().map(|id| id.as_str().to_string()).collect(),
    }
}

// ============================================================================
// Auth, errors, uploads and embeds
// ============================================================================

/// Anti-forgery token response; the field name varies between deployments
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireCsrfToken {
    /// `token`
    #[serde(default)]
    pub token: Option<String>,
    /// `csrf_token`
    #[serde(default)]
    pub csrf_token: Option<String>,
    /// `csrfToken`
    #[serde(default, rename = "csrfToken")]
    pub csrf_token_camel: Option<String>,
}

/// Extract the token from whichever field carries it.
///
/// # Errors
///
/// Returns [`WireError::MissingToken`] when no field holds a non-empty token.
pub fn csrf_token_from_wire(wire: WireCsrfToken) -> Result<String, WireError> {
    wire.token
        .or(wire.csrf_token)
        .or(wire.csrf_token_camel)
        .filter(|token| !token.is_empty())
        .ok_or(WireError::MissingToken)
}

/// Error envelope returned with non-2xx statuses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireErrorEnvelope {
    /// Human message
    #[serde(default)]
    pub error: Option<String>,
    /// Alternative message field used by a few endpoints
    #[serde(default)]
    pub message: Option<String>,
    /// Machine-readable code
    #[serde(default)]
    pub code: Option<String>,
    /// Multi-factor authentication is required to continue
    #[serde(default)]
    pub mfa_required: Option<bool>,
    /// The request matched several entities and the user must pick one
    #[serde(default)]
    pub disambiguation_required: Option<bool>,
}

/// Upload response
#[derive(Debug, Clone, Deserialize)]
pub struct WireUpload {
    /// File id
    pub id: String,
    /// Public URL
    pub url: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
}

/// Map an upload response into the domain
#[must_use]
pub fn upload_from_wire(wire: WireUpload) -> UploadedFile {
    UploadedFile {
        id: wire.id,
        url: wire.url,
        content_type: wire.content_type,
        size: wire.size,
    }
}

/// Embed preview response
#[derive(Debug, Clone, Deserialize)]
pub struct WireEmbed {
    /// Previewed URL
    pub url: String,
    /// Title
    #[serde(default)]
    pub title: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Image
    #[serde(default)]
    pub image_url: Option<String>,
    /// Provider
    #[serde(default)]
    pub provider_name: Option<String>,
}

/// Map an embed response into the domain
#[must_use]
pub fn embed_from_wire(wire: WireEmbed) -> EmbedPreview {
    EmbedPreview {
        url: wire.url,
        title: wire.title,
        description: wire.description,
        image_url: wire.image_url,
        provider: wire.provider_name,
    }
}
