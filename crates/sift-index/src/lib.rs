//! Per-space document indices for Sift.
//!
//! This crate owns the write and read paths of a single space: applying
//! upserts and deletes in sequence order, atomically replacing a space's
//! contents on reindex, and answering keyset-paginated queries.
//!
//! # Features
//!
//! - `fts-tantivy` (default): persistent Tantivy backend with BM25 scoring
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        sift-index                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SpaceIndexManager (space id -> SpaceIndex)                 │
//! │  SpaceIndex (writer mutex, sequence table, generation swap) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IndexFactory / DocumentIndex traits                        │
//! │  ├── MemoryIndex (always available)                         │
//! │  └── TantivyIndex (feature: fts-tantivy)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  QueryExpr parsing, snippets, page tokens                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sift_core::Document;
//! use sift_index::{MemoryIndexFactory, QueryExpr, SpaceIndexManager};
//!
//! let manager = SpaceIndexManager::new(Arc::new(MemoryIndexFactory::new()));
//! manager
//!     .upsert(&Document::builder("s1", "r1").path("q3/invoice.pdf").sequence(1).build())
//!     .await?;
//!
//! let page = manager
//!     .query(&"s1".into(), &QueryExpr::parse("invoice")?, 20, None)
//!     .await?;
//! ```

// Core modules (always available)
pub mod backend;
pub mod cursor;
pub mod query;
pub mod snippet;

// Index lifecycle
pub mod manager;
pub mod memory;
pub mod persistence;
pub mod space;

// Feature-gated backend modules
#[cfg(feature = "fts-tantivy")]
pub mod tantivy_index;

// Re-exports: core types
pub use backend::{DocumentIndex, IndexFactory, OpenedIndex, ScoredDocument};
pub use cursor::{CursorKind, Position, SpaceCursor, match_cmp, query_signature, rank_cmp};
pub use query::{Filter, QueryExpr};

// Re-exports: lifecycle
pub use manager::SpaceIndexManager;
pub use memory::{MemoryIndex, MemoryIndexFactory};
pub use space::{QueryPage, ReindexGuard, SpaceIndex, SpaceState, SpaceStats, WriteOutcome};

#[cfg(feature = "fts-tantivy")]
pub use tantivy_index::{TantivyIndex, TantivyIndexFactory};
