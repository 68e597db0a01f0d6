//! Domain types shared by every Sift crate.
//!
//! Identifiers, the indexed [`Document`], query results ([`Match`]),
//! storage change events and the request/response shapes of the two
//! search services.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the identifier is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
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

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a storage space (a project or personal drive).
    SpaceId
);

string_id!(
    /// Identifier of a resource, stable across renames and moves.
    ResourceId
);

string_id!(
    /// Identifier of a user issuing requests.
    UserId
);

/// Fully qualified reference to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Space holding the resource.
    pub space_id: SpaceId,
    /// Opaque resource id.
    pub resource_id: ResourceId,
    /// Path relative to the space root.
    #[serde(default)]
    pub path: String,
}

impl ResourceRef {
    /// Create a new resource reference.
    pub fn new(
        space_id: impl Into<SpaceId>,
        resource_id: impl Into<ResourceId>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            resource_id: resource_id.into(),
            path: path.into(),
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// The searchable representation of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Where the resource lives.
    pub resource: ResourceRef,
    /// File or folder name.
    pub name: String,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Media type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Extracted text content.
    #[serde(default)]
    pub content: String,
    /// Opaque storage etag, echoed back in matches.
    #[serde(default)]
    pub etag: String,
    /// Per-resource change sequence; higher is newer.
    pub sequence: u64,
}

impl Document {
    /// Start building a document for the given space and resource.
    pub fn builder(
        space_id: impl Into<SpaceId>,
        resource_id: impl Into<ResourceId>,
    ) -> DocumentBuilder {
        DocumentBuilder {
            doc: Document {
                resource: ResourceRef::new(space_id, resource_id, ""),
                name: String::new(),
                mtime: None,
                size: 0,
                mime_type: None,
                content: String::new(),
                etag: String::new(),
                sequence: 0,
            },
        }
    }

    /// Shorthand for the owning space.
    pub fn space_id(&self) -> &SpaceId {
        &self.resource.space_id
    }

    /// Shorthand for the resource id.
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource.resource_id
    }
}

/// Builder for [`Document`].
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    doc: Document,
}

impl DocumentBuilder {
    /// Set the path; the name defaults to its last segment.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if self.doc.name.is_empty() {
            self.doc.name = path.rsplit('/').next().unwrap_or_default().to_string();
        }
        self.doc.resource.path = path;
        self
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.doc.name = name.into();
        self
    }

    /// Set the modification time.
    pub fn mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.doc.mtime = Some(mtime);
        self
    }

    /// Set the size.
    pub fn size(mut self, size: u64) -> Self {
        self.doc.size = size;
        self
    }

    /// Set the media type.
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.doc.mime_type = Some(mime_type.into());
        self
    }

    /// Set the extracted text.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.doc.content = content.into();
        self
    }

    /// Set the etag.
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.doc.etag = etag.into();
        self
    }

    /// Set the change sequence.
    pub fn sequence(mut self, sequence: u64) -> Self {
        self.doc.sequence = sequence;
        self
    }

    /// Finish building.
    pub fn build(self) -> Document {
        self.doc
    }
}

/// A single query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// The matching resource.
    pub resource: ResourceRef,
    /// Relevance score, higher is better.
    pub score: f32,
    /// Highlighted excerpt, when one could be produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Resource name.
    #[serde(default)]
    pub name: String,
    /// Etag the index holds for the resource.
    #[serde(default)]
    pub etag: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
    /// Media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Match {
    /// Build a match from an indexed document.
    pub fn from_document(doc: &Document, score: f32, snippet: Option<String>) -> Self {
        Self {
            resource: doc.resource.clone(),
            score,
            snippet,
            name: doc.name.clone(),
            etag: doc.etag.clone(),
            size: doc.size,
            mtime: doc.mtime,
            mime_type: doc.mime_type.clone(),
        }
    }
}

// ============================================================================
// Change events
// ============================================================================

/// Kind of storage change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Resource was created.
    Created,
    /// Resource content or metadata changed.
    Updated,
    /// Resource was removed.
    Deleted,
    /// Resource was moved or renamed.
    Moved,
}

impl ChangeKind {
    /// True for kinds that carry a document payload.
    pub fn is_upsert(self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

/// A storage change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Space the resource belongs to.
    pub space_id: SpaceId,
    /// Changed resource.
    pub resource_id: ResourceId,
    /// What happened.
    pub kind: ChangeKind,
    /// Per-resource sequence of this change.
    pub sequence: u64,
    /// New document state for upsert kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl ChangeEvent {
    fn with_document(kind: ChangeKind, document: Document) -> Self {
        Self {
            space_id: document.resource.space_id.clone(),
            resource_id: document.resource.resource_id.clone(),
            kind,
            sequence: document.sequence,
            document: Some(document),
        }
    }

    /// A `created` event for a document.
    pub fn created(document: Document) -> Self {
        Self::with_document(ChangeKind::Created, document)
    }

    /// An `updated` event for a document.
    pub fn updated(document: Document) -> Self {
        Self::with_document(ChangeKind::Updated, document)
    }

    /// A `moved` event carrying the document at its new path.
    pub fn moved(document: Document) -> Self {
        Self::with_document(ChangeKind::Moved, document)
    }

    /// A `deleted` event.
    pub fn deleted(
        space_id: impl Into<SpaceId>,
        resource_id: impl Into<ResourceId>,
        sequence: u64,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            resource_id: resource_id.into(),
            kind: ChangeKind::Deleted,
            sequence,
            document: None,
        }
    }
}

// ============================================================================
// Service requests and responses
// ============================================================================

/// Aggregate, user-scoped search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Maximum matches per page.
    pub page_size: i32,
    /// Token from a previous response; empty for the first page.
    #[serde(default)]
    pub page_token: String,
    /// Query string.
    pub query: String,
}

impl SearchRequest {
    /// First-page request.
    pub fn new(query: impl Into<String>, page_size: i32) -> Self {
        Self {
            page_size,
            page_token: String::new(),
            query: query.into(),
        }
    }

    /// Same request, resumed from a page token.
    pub fn with_page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = token.into();
        self
    }
}

/// Aggregate search response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Matches of this page, globally ordered.
    pub matches: Vec<Match>,
    /// Token for the next page; empty when there are no more pages.
    pub next_page_token: String,
    /// Sum of the per-space totals that were actually obtained.
    pub total_matches: i32,
    /// Set when at least one space could not contribute.
    #[serde(default)]
    pub degraded: bool,
}

/// Scope of a single-space search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Space to search.
    pub space_id: SpaceId,
    /// Restrict the search to one resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
}

impl Reference {
    /// Reference to a whole space.
    pub fn space(space_id: impl Into<SpaceId>) -> Self {
        Self {
            space_id: space_id.into(),
            resource_id: None,
        }
    }
}

/// Single-space search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchIndexRequest {
    /// Maximum matches per page.
    pub page_size: i32,
    /// Token from a previous response; empty for the first page.
    #[serde(default)]
    pub page_token: String,
    /// Query string.
    pub query: String,
    /// Space (and optionally resource) to search.
    #[serde(rename = "ref")]
    pub reference: Reference,
}

/// Single-space search response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchIndexResponse {
    /// Matches of this page.
    pub matches: Vec<Match>,
    /// Token for the next page; empty when there are no more pages.
    pub next_page_token: String,
    /// Exact number of matches in the space.
    pub total_matches: i32,
}

/// Request to (re)index a space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpaceRequest {
    /// Space to index.
    pub space_id: SpaceId,
    /// User on whose behalf the space is walked.
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_derives_name_from_path() {
        let doc = Document::builder("s1", "r1")
            .path("reports/2024/invoice.pdf")
            .sequence(3)
            .build();
        assert_eq!(doc.name, "invoice.pdf");
        assert_eq!(doc.resource.path, "reports/2024/invoice.pdf");
        assert_eq!(doc.sequence, 3);
    }

    #[test]
    fn test_builder_explicit_name_wins() {
        let doc = Document::builder("s1", "r1")
            .name("Quarterly")
            .path("a/b.txt")
            .build();
        assert_eq!(doc.name, "Quarterly");
    }

    #[test]
    fn test_change_event_takes_ids_from_document() {
        let doc = Document::builder("s1", "r9").sequence(7).build();
        let event = ChangeEvent::updated(doc);
        assert_eq!(event.space_id.as_str(), "s1");
        assert_eq!(event.resource_id.as_str(), "r9");
        assert_eq!(event.sequence, 7);
        assert!(event.kind.is_upsert());
    }

    #[test]
    fn test_deleted_event_has_no_payload() {
        let event = ChangeEvent::deleted("s1", "r1", 4);
        assert!(event.document.is_none());
        assert!(!event.kind.is_upsert());
    }

    #[test]
    fn test_search_index_request_uses_ref_field() {
        let req = SearchIndexRequest {
            page_size: 10,
            page_token: String::new(),
            query: "q".into(),
            reference: Reference::space("s1"),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["ref"]["space_id"], "s1");
    }

    #[test]
    fn test_ids_are_transparent_strings() {
        let id = SpaceId::from("space-a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"space-a\"");
        assert_eq!(id.to_string(), "space-a");
    }
}
