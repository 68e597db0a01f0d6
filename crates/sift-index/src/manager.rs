//! Owner of every space index.
//!
//! The manager keeps one [`SpaceIndex`] per space id, opening persisted
//! generations on first reference. Writes to different spaces never
//! contend; writes to the same space serialize on that space's writer.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use log::{debug, info};
use sift_core::{Document, Error, ResourceId, Result, SpaceId};
use tokio::sync::{Mutex, RwLock};

use crate::backend::IndexFactory;
use crate::cursor::Position;
use crate::query::QueryExpr;
use crate::space::{QueryPage, ReindexGuard, SpaceIndex, SpaceStats, WriteOutcome};

/// Default snippet length in bytes.
pub const DEFAULT_SNIPPET_LENGTH: usize = 160;

/// Set of space indices backed by one [`IndexFactory`].
pub struct SpaceIndexManager {
    factory: Arc<dyn IndexFactory>,
    spaces: RwLock<HashMap<SpaceId, Arc<SpaceIndex>>>,
    opening: std::sync::Mutex<HashMap<SpaceId, Arc<Mutex<()>>>>,
    snippet_length: usize,
}

impl SpaceIndexManager {
    /// Create a manager.
    pub fn new(factory: Arc<dyn IndexFactory>) -> Self {
        Self {
            factory,
            spaces: RwLock::new(HashMap::new()),
            opening: std::sync::Mutex::new(HashMap::new()),
            snippet_length: DEFAULT_SNIPPET_LENGTH,
        }
    }

    /// Set the maximum snippet length; zero disables snippets.
    pub fn with_snippet_length(mut self, snippet_length: usize) -> Self {
        self.snippet_length = snippet_length;
        self
    }

    /// Backend name.
    pub fn backend(&self) -> &str {
        self.factory.name()
    }

    /// Look up a space, opening persisted state if present.
    ///
    /// Opening runs on the blocking pool without holding the space map, so
    /// spaces already loaded stay queryable meanwhile. Opens of one space
    /// are serialized on that space's open lock.
    pub async fn get(&self, space_id: &SpaceId) -> Result<Option<Arc<SpaceIndex>>> {
        if let Some(space) = self.spaces.read().await.get(space_id) {
            return Ok(Some(Arc::clone(space)));
        }

        let open_lock = self.open_lock(space_id);
        let _opening = open_lock.lock().await;
        if let Some(space) = self.spaces.read().await.get(space_id) {
            return Ok(Some(Arc::clone(space)));
        }

        let factory = Arc::clone(&self.factory);
        let id = space_id.clone();
        let opened = tokio::task::spawn_blocking(move || -> Result<Option<SpaceIndex>> {
            match factory.open(&id)? {
                Some(opened) => SpaceIndex::from_opened(id, factory, opened).map(Some),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| Error::internal(format!("opening space '{space_id}' failed: {e}")))??;
        let Some(opened) = opened else {
            return Ok(None);
        };

        let mut spaces = self.spaces.write().await;
        let space = spaces.entry(space_id.clone()).or_insert_with(|| {
            info!("Loaded persisted index for space '{space_id}'");
            Arc::new(opened)
        });
        Ok(Some(Arc::clone(space)))
    }

    fn open_lock(&self, space_id: &SpaceId) -> Arc<Mutex<()>> {
        let mut locks = self.opening.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(space_id.clone()).or_default())
    }

    /// Look up a space, creating an empty one when nothing exists.
    pub async fn get_or_create(&self, space_id: &SpaceId) -> Result<Arc<SpaceIndex>> {
        if space_id.is_empty() {
            return Err(Error::invalid_argument("space id must not be empty"));
        }
        if let Some(space) = self.get(space_id).await? {
            return Ok(space);
        }

        let mut spaces = self.spaces.write().await;
        let space = spaces
            .entry(space_id.clone())
            .or_insert_with(|| {
                debug!("Registering space '{space_id}'");
                Arc::new(SpaceIndex::new(space_id.clone(), Arc::clone(&self.factory)))
            });
        Ok(Arc::clone(space))
    }

    /// Insert or replace a document in its space.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the space or resource id is empty.
    pub async fn upsert(&self, document: &Document) -> Result<WriteOutcome> {
        if document.resource_id().is_empty() {
            return Err(Error::invalid_argument("resource id must not be empty"));
        }
        let space = self.get_or_create(document.space_id()).await?;
        space.upsert(document).await
    }

    /// Delete a document from a space.
    pub async fn delete(
        &self,
        space_id: &SpaceId,
        resource_id: &ResourceId,
        sequence: u64,
    ) -> Result<WriteOutcome> {
        if resource_id.is_empty() {
            return Err(Error::invalid_argument("resource id must not be empty"));
        }
        let space = self.get_or_create(space_id).await?;
        space.delete(resource_id, sequence).await
    }

    /// Take a space's writer for a full reindex.
    pub async fn begin_reindex(&self, space_id: &SpaceId) -> Result<ReindexGuard> {
        let space = self.get_or_create(space_id).await?;
        Ok(space.begin_reindex().await)
    }

    /// Replace every document of a space.
    pub async fn replace_all(&self, space_id: &SpaceId, documents: Vec<Document>) -> Result<usize> {
        self.begin_reindex(space_id).await?.replace_all(documents)
    }

    /// Query one space.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the space has no index.
    pub async fn query(
        &self,
        space_id: &SpaceId,
        expr: &QueryExpr,
        limit: usize,
        after: Option<&Position>,
    ) -> Result<QueryPage> {
        let space = self
            .get(space_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("space '{space_id}' has no index")))?;
        space.query(expr, limit, after, self.snippet_length)
    }

    /// Statistics of one space, if it is known.
    pub async fn stats(&self, space_id: &SpaceId) -> Result<Option<SpaceStats>> {
        match self.get(space_id).await? {
            Some(space) => space.stats().map(Some),
            None => Ok(None),
        }
    }

    /// Ids of the spaces currently held, sorted.
    pub async fn spaces(&self) -> Vec<SpaceId> {
        let mut ids: Vec<SpaceId> = self.spaces.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for SpaceIndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceIndexManager")
            .field("backend", &self.factory.name())
            .field("snippet_length", &self.snippet_length)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndexFactory;
    use crate::space::SpaceState;

    fn manager() -> SpaceIndexManager {
        SpaceIndexManager::new(Arc::new(MemoryIndexFactory::new()))
    }

    fn doc(space: &str, id: &str, content: &str, seq: u64) -> Document {
        Document::builder(space, id)
            .path(format!("{id}.txt"))
            .content(content)
            .sequence(seq)
            .build()
    }

    fn expr(q: &str) -> QueryExpr {
        QueryExpr::parse(q).unwrap()
    }

    #[tokio::test]
    async fn test_query_unknown_space_is_not_found() {
        let m = manager();
        let err = m.query(&"nope".into(), &expr("x"), 10, None).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(m.spaces().await.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_creates_space() {
        let m = manager();
        m.upsert(&doc("s1", "r1", "hello", 1)).await.unwrap();
        let page = m.query(&"s1".into(), &expr("hello"), 10, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(m.spaces().await, vec![SpaceId::from("s1")]);

        let stats = m.stats(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(stats.state, SpaceState::Ready);
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.backend, "memory");
    }

    #[tokio::test]
    async fn test_spaces_are_isolated() {
        let m = manager();
        m.upsert(&doc("s1", "r1", "shared", 1)).await.unwrap();
        m.upsert(&doc("s2", "r1", "shared", 1)).await.unwrap();
        m.delete(&"s1".into(), &"r1".into(), 2).await.unwrap();

        assert_eq!(m.query(&"s1".into(), &expr("shared"), 10, None).await.unwrap().total, 0);
        assert_eq!(m.query(&"s2".into(), &expr("shared"), 10, None).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_empty_ids_rejected() {
        let m = manager();
        assert!(m.upsert(&doc("", "r1", "x", 1)).await.unwrap_err().is_invalid_argument());
        assert!(m.upsert(&doc("s1", "", "x", 1)).await.unwrap_err().is_invalid_argument());
        assert!(m
            .delete(&"s1".into(), &"".into(), 1)
            .await
            .unwrap_err()
            .is_invalid_argument());
    }

    #[tokio::test]
    async fn test_replace_all_on_new_space() {
        let m = manager();
        let count = m
            .replace_all(&"s1".into(), vec![doc("s1", "a", "x", 1), doc("s1", "b", "y", 1)])
            .await
            .unwrap();
        assert_eq!(count, 2);
        let page = m.query(&"s1".into(), &expr("*"), 10, None).await.unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_concurrent_reindexes_are_serialized() {
        let m = Arc::new(manager());
        let first = m.begin_reindex(&"s1".into()).await.unwrap();

        let m2 = Arc::clone(&m);
        let second = tokio::spawn(async move {
            m2.replace_all(&"s1".into(), vec![doc("s1", "second", "two", 1)])
                .await
        });
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        first.replace_all(vec![doc("s1", "first", "one", 1)]).unwrap();
        second.await.unwrap().unwrap();

        let page = m.query(&"s1".into(), &expr("*"), 10, None).await.unwrap();
        let ids: Vec<&str> = page.matches.iter().map(|m| m.resource.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["second"]);
        let stats = m.stats(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(stats.generation, Some(2));
    }

    /// Factory whose `open` of one space stalls, like a large index on disk.
    struct SlowOpenFactory {
        inner: MemoryIndexFactory,
        slow_space: SpaceId,
        delay: std::time::Duration,
    }

    impl IndexFactory for SlowOpenFactory {
        fn open(&self, space_id: &SpaceId) -> Result<Option<crate::backend::OpenedIndex>> {
            if *space_id == self.slow_space {
                std::thread::sleep(self.delay);
            }
            self.inner.open(space_id)
        }

        fn create(
            &self,
            space_id: &SpaceId,
            generation: u64,
        ) -> Result<Arc<dyn crate::backend::DocumentIndex>> {
            self.inner.create(space_id, generation)
        }

        fn publish(&self, space_id: &SpaceId, generation: u64, document_count: usize) -> Result<()> {
            self.inner.publish(space_id, generation, document_count)
        }

        fn discard(&self, space_id: &SpaceId, generation: u64) -> Result<()> {
            self.inner.discard(space_id, generation)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_open_does_not_block_loaded_spaces() {
        let m = Arc::new(SpaceIndexManager::new(Arc::new(SlowOpenFactory {
            inner: MemoryIndexFactory::new(),
            slow_space: "big".into(),
            delay: std::time::Duration::from_millis(1500),
        })));
        m.upsert(&doc("hot", "r1", "warm cache", 1)).await.unwrap();

        let m2 = Arc::clone(&m);
        let opening = tokio::spawn(async move { m2.get(&"big".into()).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!opening.is_finished());

        let started = std::time::Instant::now();
        let page = m.query(&"hot".into(), &expr("warm"), 10, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(started.elapsed() < std::time::Duration::from_millis(500));

        assert!(opening.await.unwrap().unwrap().is_none());
    }

    #[cfg(feature = "fts-tantivy")]
    #[tokio::test]
    async fn test_tantivy_generation_swap_persists() {
        use crate::tantivy_index::TantivyIndexFactory;

        let dir = tempfile::tempdir().unwrap();
        {
            let m = SpaceIndexManager::new(Arc::new(TantivyIndexFactory::new(dir.path())));
            m.upsert(&doc("s1", "old", "legacy", 1)).await.unwrap();
            m.replace_all(&"s1".into(), vec![doc("s1", "new", "fresh", 7)])
                .await
                .unwrap();
        }

        let m = SpaceIndexManager::new(Arc::new(TantivyIndexFactory::new(dir.path())));
        let page = m.query(&"s1".into(), &expr("*"), 10, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.matches[0].resource.resource_id.as_str(), "new");

        let stats = m.stats(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(stats.generation, Some(2));
        assert_eq!(stats.backend, "tantivy");

        // Sequence table restored from disk.
        let outcome = m.upsert(&doc("s1", "new", "replayed", 7)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Stale);
    }
}
