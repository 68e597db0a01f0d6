//! Sift Core: shared types, traits and errors.
//!
//! This crate provides the foundational types used across all Sift crates.
//! It has no internal Sift dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error taxonomy and Result alias
//! - [`settings`]: Page-size bounds, fan-out timeout, snippet length
//! - [`traits`]: Storage, change-feed and configuration collaborators
//! - [`types`]: Identifiers, documents, matches, requests and responses

pub mod error;
pub mod settings;
pub mod traits;
pub mod types;

// Re-export key types at crate root for convenience
pub use error::{Error, Result};
pub use settings::SearchSettings;
pub use traits::{ChangeSource, ConfigProvider, StorageProvider};
pub use types::{
    ChangeEvent, ChangeKind, Document, DocumentBuilder, IndexSpaceRequest, Match, Reference,
    ResourceId, ResourceRef, SearchIndexRequest, SearchIndexResponse, SearchRequest,
    SearchResponse, SpaceId, UserId,
};
