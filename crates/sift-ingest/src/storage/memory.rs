//! In-memory storage adapter.
//!
//! Holds documents per space and broadcasts a [`ChangeEvent`] to every
//! subscriber on each mutation. Used by tests and by embedders that feed
//! documents directly.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::warn;
use sift_core::{
    ChangeEvent, ChangeSource, Document, Error, ResourceId, Result, SpaceId, StorageProvider,
    UserId,
};
use tokio::sync::mpsc;

const SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inner {
    spaces: BTreeMap<SpaceId, BTreeMap<ResourceId, Document>>,
    subscribers: Vec<mpsc::Sender<ChangeEvent>>,
}

/// Storage held in memory.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
    failures: Arc<AtomicUsize>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a document without emitting an event.
    pub fn seed(&self, document: Document) {
        self.lock()
            .spaces
            .entry(document.space_id().clone())
            .or_default()
            .insert(document.resource_id().clone(), document);
    }

    /// Store a document and emit `created` or `updated`.
    pub fn put(&self, document: Document) {
        let mut inner = self.lock();
        let space = inner.spaces.entry(document.space_id().clone()).or_default();
        let existed = space
            .insert(document.resource_id().clone(), document.clone())
            .is_some();
        let event = if existed {
            ChangeEvent::updated(document)
        } else {
            ChangeEvent::created(document)
        };
        broadcast(&mut inner, event);
    }

    /// Move a document to a new path and emit `moved`.
    pub fn rename(&self, document: Document) {
        let mut inner = self.lock();
        inner
            .spaces
            .entry(document.space_id().clone())
            .or_default()
            .insert(document.resource_id().clone(), document.clone());
        broadcast(&mut inner, ChangeEvent::moved(document));
    }

    /// Remove a document and emit `deleted`.
    pub fn remove(&self, space_id: &SpaceId, resource_id: &ResourceId, sequence: u64) {
        let mut inner = self.lock();
        if let Some(space) = inner.spaces.get_mut(space_id) {
            space.remove(resource_id);
        }
        broadcast(
            &mut inner,
            ChangeEvent::deleted(space_id.clone(), resource_id.clone(), sequence),
        );
    }

    /// Make the next `count` listings fail with [`Error::Unavailable`].
    pub fn fail_next_listings(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Documents currently stored in a space.
    pub fn len(&self, space_id: &SpaceId) -> usize {
        self.lock().spaces.get(space_id).map_or(0, BTreeMap::len)
    }

    /// True when a space holds no documents.
    pub fn is_empty(&self, space_id: &SpaceId) -> bool {
        self.len(space_id) == 0
    }
}

fn broadcast(inner: &mut Inner, event: ChangeEvent) {
    inner.subscribers.retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Subscriber lagging, dropped change of '{}'", event.resource_id);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn list_resources(&self, space_id: &SpaceId, _user_id: &UserId) -> Result<Vec<Document>> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::unavailable("storage temporarily unavailable"));
        }
        Ok(self
            .lock()
            .spaces
            .get(space_id)
            .map(|space| space.values().cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl ChangeSource for MemoryStorage {
    async fn subscribe_changes(&self) -> Result<mpsc::Receiver<ChangeEvent>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.lock().subscribers.push(tx);
        Ok(rx)
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryStorage")
            .field("spaces", &inner.spaces.len())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::ChangeKind;

    fn doc(id: &str, seq: u64) -> Document {
        Document::builder("s1", id)
            .path(format!("{id}.txt"))
            .sequence(seq)
            .build()
    }

    #[tokio::test]
    async fn test_put_emits_created_then_updated() {
        let storage = MemoryStorage::new();
        let mut rx = storage.subscribe_changes().await.unwrap();

        storage.put(doc("r1", 1));
        storage.put(doc("r1", 2));
        storage.remove(&"s1".into(), &"r1".into(), 3);

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Created);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Updated);
        let deleted = rx.recv().await.unwrap();
        assert_eq!(deleted.kind, ChangeKind::Deleted);
        assert_eq!(deleted.sequence, 3);
        assert!(storage.is_empty(&"s1".into()));
    }

    #[tokio::test]
    async fn test_list_resources() {
        let storage = MemoryStorage::new();
        storage.seed(doc("a", 1));
        storage.seed(doc("b", 1));
        let user: UserId = "u".into();

        let listed = storage.list_resources(&"s1".into(), &user).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(storage.list_resources(&"other".into(), &user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let storage = MemoryStorage::new();
        storage.fail_next_listings(1);
        let user: UserId = "u".into();
        let err = storage.list_resources(&"s1".into(), &user).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(storage.list_resources(&"s1".into(), &user).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let storage = MemoryStorage::new();
        let rx = storage.subscribe_changes().await.unwrap();
        drop(rx);
        storage.put(doc("r1", 1));
        assert!(format!("{storage:?}").contains("subscribers: 0"));
    }
}
