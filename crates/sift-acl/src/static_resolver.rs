//! Configuration-driven access resolver.
//!
//! ```toml
//! [access]
//! public = ["shared/handbook"]
//!
//! [access.grants]
//! alice = ["personal/alice", "project/apollo"]
//!
//! [access.creators]
//! bob = ["inbox/bob"]
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use sift_core::{Result, SpaceId, UserId};

use crate::resolver::{AccessResolver, GrantSet};

/// The `[access]` configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Spaces every user may search.
    pub public: GrantSet,

    /// Spaces each user may search.
    pub grants: BTreeMap<UserId, GrantSet>,

    /// Spaces each user may create resources in.
    pub creators: BTreeMap<UserId, GrantSet>,
}

/// Resolver answering from an in-memory copy of [`AccessConfig`].
///
/// Clones share the same grants, so a handle kept by an admin path sees
/// and changes what the search path resolves.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessResolver {
    config: Arc<RwLock<AccessConfig>>,
}

impl StaticAccessResolver {
    /// Resolver over a configuration section.
    pub fn new(config: AccessConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Grant read access to a space.
    pub fn grant(&self, user_id: impl Into<UserId>, space_id: impl Into<SpaceId>) {
        let user_id = user_id.into();
        let space_id = space_id.into();
        debug!("Granting '{user_id}' access to '{space_id}'");
        self.write()
            .grants
            .entry(user_id)
            .or_default()
            .insert(space_id);
    }

    /// Revoke read access to a space.
    pub fn revoke(&self, user_id: &UserId, space_id: &SpaceId) {
        debug!("Revoking '{user_id}' access to '{space_id}'");
        let mut config = self.write();
        if let Some(spaces) = config.grants.get_mut(user_id) {
            spaces.remove(space_id);
            if spaces.is_empty() {
                config.grants.remove(user_id);
            }
        }
    }

    /// Allow a user to create resources in a space.
    pub fn allow_create(&self, user_id: impl Into<UserId>, space_id: impl Into<SpaceId>) {
        self.write()
            .creators
            .entry(user_id.into())
            .or_default()
            .insert(space_id.into());
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> AccessConfig {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, AccessConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AccessConfig> {
        self.config.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AccessResolver for StaticAccessResolver {
    async fn granted_spaces(&self, user_id: &UserId) -> Result<GrantSet> {
        let config = self.read();
        let mut spaces = config.public.clone();
        if let Some(granted) = config.grants.get(user_id) {
            spaces.extend(granted.iter().cloned());
        }
        Ok(spaces)
    }

    async fn has_create_permission(&self, user_id: &UserId, space_id: &SpaceId) -> Result<bool> {
        Ok(self
            .read()
            .creators
            .get(user_id)
            .is_some_and(|spaces| spaces.contains(space_id)))
    }

    fn name(&self) -> &str {
        "static"
    }
}

// ============================================================================
// Tests
// ============================================================================
