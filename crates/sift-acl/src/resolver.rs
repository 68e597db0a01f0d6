//! The access resolver trait.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sift_core::{Result, SpaceId, UserId};

/// Spaces one identity may search, resolved for a single request.
pub type GrantSet = BTreeSet<SpaceId>;

/// Resolves what an identity may read and index.
///
/// Implementations must not cache grants across requests on behalf of
/// callers; the search path resolves them fresh for every page.
#[async_trait]
pub trait AccessResolver: Send + Sync {
    /// Every space the user may search.
    async fn granted_spaces(&self, user_id: &UserId) -> Result<GrantSet>;

    /// Whether the user may create resources in the space.
    async fn has_create_permission(&self, user_id: &UserId, space_id: &SpaceId) -> Result<bool>;

    /// Whether the user may trigger a reindex of the space.
    ///
    /// Defaults to read access or create permission.
    async fn can_index(&self, user_id: &UserId, space_id: &SpaceId) -> Result<bool> {
        if self.granted_spaces(user_id).await?.contains(space_id) {
            return Ok(true);
        }
        self.has_create_permission(user_id, space_id).await
    }

    /// Resolver name, for logging.
    fn name(&self) -> &str {
        "access"
    }
}
