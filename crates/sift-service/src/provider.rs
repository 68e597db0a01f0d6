//! Single-space index provider.
//!
//! An [`IndexProvider`] answers paged queries against one space and can be
//! told to rebuild a space from storage. [`LocalIndexProvider`] serves the
//! spaces held by an in-process [`SpaceIndexManager`]; remote deployments
//! use [`RemoteIndexProvider`](crate::RemoteIndexProvider) instead.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use sift_core::{
    Error, IndexSpaceRequest, Result, SearchIndexRequest, SearchIndexResponse, SearchSettings,
};
use sift_index::{QueryExpr, SpaceCursor, SpaceIndexManager};
use sift_ingest::ChangeIngestor;

/// Abstraction over where a space's index lives.
#[async_trait]
pub trait IndexProvider: Send + Sync {
    /// Search one space.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a bad page size, query or missing space
    /// - [`Error::InvalidCursor`] for a token of another query or space
    /// - [`Error::NotFound`] when the space has never been indexed
    async fn search(&self, request: SearchIndexRequest) -> Result<SearchIndexResponse>;

    /// Rebuild a space from storage. Returns once the new index is live.
    async fn index_space(&self, request: IndexSpaceRequest) -> Result<()>;

    /// Provider name for logs.
    fn name(&self) -> &str {
        "index"
    }
}

/// Provider backed by local space indices.
#[derive(Clone)]
pub struct LocalIndexProvider {
    ingestor: Arc<ChangeIngestor>,
    settings: SearchSettings,
}

impl LocalIndexProvider {
    /// Provider serving the ingestor's spaces.
    pub fn new(ingestor: Arc<ChangeIngestor>, settings: SearchSettings) -> Self {
        Self { ingestor, settings }
    }

    /// Underlying index manager.
    pub fn manager(&self) -> &Arc<SpaceIndexManager> {
        self.ingestor.manager()
    }

    /// Ingestor used for reindexing.
    pub fn ingestor(&self) -> &Arc<ChangeIngestor> {
        &self.ingestor
    }
}

#[async_trait]
impl IndexProvider for LocalIndexProvider {
    async fn search(&self, request: SearchIndexRequest) -> Result<SearchIndexResponse> {
        let limit = self.settings.validate_page_size(request.page_size)?;
        let space_id = &request.reference.space_id;
        if space_id.is_empty() {
            return Err(Error::invalid_argument("ref.space_id is required"));
        }

        let expr = QueryExpr::parse(&request.query)?
            .restrict_to(request.reference.resource_id.clone());
        let after = SpaceCursor::decode(&request.page_token, &expr, space_id)?;

        let page = self
            .manager()
            .query(space_id, &expr, limit, after.as_ref())
            .await?;

        let next_page_token = match page.next {
            Some(position) => SpaceCursor::new(&expr, space_id.clone(), position).encode()?,
            None => String::new(),
        };
        debug!(
            "Space '{space_id}' answered {} of {} matches",
            page.matches.len(),
            page.total
        );

        Ok(SearchIndexResponse {
            matches: page.matches,
            next_page_token,
            total_matches: i32::try_from(page.total).unwrap_or(i32::MAX),
        })
    }

    async fn index_space(&self, request: IndexSpaceRequest) -> Result<()> {
        if request.space_id.is_empty() {
            return Err(Error::invalid_argument("space_id is required"));
        }
        let count = self
            .ingestor
            .reindex_space_with_retry(&request.space_id, &request.user_id)
            .await?;
        info!("Indexed space '{}' with {count} documents", request.space_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

// ============================================================================
// Tests
// ============================================================================
