//! Core traits for Sift collaborator abstraction.
//!
//! The engine never talks to a storage backend or configuration source
//! directly. It consumes these traits instead:
//!
//! - [`StorageProvider`]: authoritative listing of a space's resources
//! - [`ChangeSource`]: subscription to storage change notifications
//! - [`ConfigProvider`]: where data lives and how searches are bounded

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::settings::SearchSettings;
use crate::types::{ChangeEvent, Document, SpaceId, UserId};
use crate::Result;

/// Authoritative view of the resources stored in a space.
///
/// Used for full reindexing. Implementations return every resource of the
/// space as a ready-to-index [`Document`], with `sequence` set to the
/// resource's current change sequence.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// List every resource of a space, walked on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`](crate::Error::Unavailable) when the backend
    /// cannot be reached; [`Error::NotFound`](crate::Error::NotFound) when
    /// the space does not exist.
    async fn list_resources(&self, space_id: &SpaceId, user_id: &UserId)
    -> Result<Vec<Document>>;

    /// Backend name for logging.
    fn name(&self) -> &str {
        "storage"
    }
}

/// Source of storage change notifications.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Subscribe to change events.
    ///
    /// The returned receiver closes when the source shuts down.
    async fn subscribe_changes(&self) -> Result<mpsc::Receiver<ChangeEvent>>;
}

/// Trait for deployment-specific configuration.
///
/// # Bounds
///
/// - `Send + Sync`: Configuration must be shareable across threads
/// - `Clone`: Configuration can be duplicated for passing to subsystems
/// - `'static`: Configuration lifetime is not borrowed
pub trait ConfigProvider: Send + Sync + Clone + 'static {
    /// Service name, used for env var prefixes and log lines.
    fn service_name(&self) -> &str;

    /// Directory holding persisted space indices.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be determined.
    fn data_path(&self) -> Result<PathBuf>;

    /// Query bounds and presentation settings.
    fn search_settings(&self) -> &SearchSettings;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeKind;

    #[derive(Clone)]
    struct TestConfig {
        base: PathBuf,
        settings: SearchSettings,
    }

    impl ConfigProvider for TestConfig {
        fn service_name(&self) -> &str {
            "sift-test"
        }

        fn data_path(&self) -> Result<PathBuf> {
            Ok(self.base.join("indices"))
        }

        fn search_settings(&self) -> &SearchSettings {
            &self.settings
        }
    }

    struct OneShotSource;

    #[async_trait]
    impl ChangeSource for OneShotSource {
        async fn subscribe_changes(&self) -> Result<mpsc::Receiver<ChangeEvent>> {
            let (tx, rx) = mpsc::channel(1);
            tx.send(ChangeEvent::deleted("s1", "r1", 1))
                .await
                .map_err(|e| crate::Error::internal(e.to_string()))?;
            Ok(rx)
        }
    }

    #[test]
    fn test_config_provider_paths() {
        let config = TestConfig {
            base: PathBuf::from("/var/lib/sift"),
            settings: SearchSettings::default(),
        };
        assert_eq!(config.service_name(), "sift-test");
        assert_eq!(
            config.data_path().unwrap(),
            PathBuf::from("/var/lib/sift/indices")
        );
        assert_eq!(
            config.search_settings().max_page_size,
            SearchSettings::default().max_page_size
        );
    }

    #[test]
    fn test_config_provider_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TestConfig>();
    }

    #[tokio::test]
    async fn test_change_source_delivers_then_closes() {
        let mut rx = OneShotSource.subscribe_changes().await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Deleted);
        assert!(rx.recv().await.is_none());
    }
}
