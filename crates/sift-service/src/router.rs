//! Space-to-provider routing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sift_core::SpaceId;

use crate::provider::IndexProvider;

/// Picks the [`IndexProvider`] responsible for a space.
///
/// Spaces without an explicit route go to the default provider.
#[derive(Clone)]
pub struct ProviderRouter {
    default: Arc<dyn IndexProvider>,
    routes: HashMap<SpaceId, Arc<dyn IndexProvider>>,
}

impl ProviderRouter {
    /// Router sending every space to `default`.
    pub fn new(default: Arc<dyn IndexProvider>) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    /// Route one space to a dedicated provider.
    pub fn with_route(mut self, space_id: impl Into<SpaceId>, provider: Arc<dyn IndexProvider>) -> Self {
        self.routes.insert(space_id.into(), provider);
        self
    }

    /// Provider for a space.
    pub fn route(&self, space_id: &SpaceId) -> Arc<dyn IndexProvider> {
        self.routes
            .get(space_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }

    /// Number of explicit routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when every space goes to the default provider.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .map(|(space, provider)| format!("{space}={}", provider.name()))
            .collect();
        routes.sort();
        f.debug_struct("ProviderRouter")
            .field("default", &self.default.name())
            .field("routes", &routes)
            .finish()
    }
}
