//! Document index backend abstraction.
//!
//! The tokenizer/ranker is a black box behind [`DocumentIndex`]: it can
//! index a document and run a [`QueryExpr`] over the document set. An
//! [`IndexFactory`] creates, opens and retires the physical indices of one
//! space, one *generation* at a time, so a full reindex can be built off to
//! the side and published with a single pointer swap.

use std::sync::Arc;

use sift_core::{Document, ResourceId, Result, SpaceId};

use crate::query::QueryExpr;

/// A document that matched a query, with its backend score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    /// Relevance score, higher is better.
    pub score: f32,
    /// The stored document.
    pub document: Document,
}

/// One physical index holding the documents of one space.
///
/// Implementations must be internally synchronized: queries may run
/// concurrently with each other and with a single writer.
pub trait DocumentIndex: Send + Sync {
    /// Insert or replace a document, keyed by its resource id.
    fn upsert(&self, document: &Document) -> Result<()>;

    /// Insert or replace many documents and make them visible together.
    fn upsert_batch(&self, documents: &[Document]) -> Result<()> {
        for document in documents {
            self.upsert(document)?;
        }
        Ok(())
    }

    /// Remove a document; absent documents are not an error.
    fn delete(&self, resource_id: &ResourceId) -> Result<()>;

    /// Every document matching the query, in no particular order.
    fn search(&self, query: &QueryExpr) -> Result<Vec<ScoredDocument>>;

    /// `(resource_id, sequence)` of every stored document.
    fn versions(&self) -> Result<Vec<(ResourceId, u64)>>;

    /// Number of stored documents.
    fn len(&self) -> Result<usize>;

    /// True when the index holds no documents.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Mark this generation as superseded; storage is released once the
    /// last reader drops it.
    fn retire(&self) {}

    /// Backend name.
    fn name(&self) -> &str;
}

/// A generation opened from durable storage.
pub struct OpenedIndex {
    /// Generation number.
    pub generation: u64,
    /// The index itself.
    pub index: Arc<dyn DocumentIndex>,
}

/// Creates and publishes the physical indices of spaces.
pub trait IndexFactory: Send + Sync {
    /// Open the published generation of a space, if one exists.
    fn open(&self, space_id: &SpaceId) -> Result<Option<OpenedIndex>>;

    /// Create a fresh, empty generation.
    fn create(&self, space_id: &SpaceId, generation: u64) -> Result<Arc<dyn DocumentIndex>>;

    /// Durably record `generation` as the current one.
    fn publish(&self, space_id: &SpaceId, generation: u64, document_count: usize) -> Result<()>;

    /// Remove a generation that never got published.
    fn discard(&self, space_id: &SpaceId, generation: u64) -> Result<()>;

    /// Backend name.
    fn name(&self) -> &str;
}
