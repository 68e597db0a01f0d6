//! One space's index: a published generation plus its single writer.
//!
//! Reads clone the `Arc` of the current generation and never wait for the
//! writer. Writes serialize on an async mutex that also owns the
//! per-resource sequence table, so sequence checks and index mutations are
//! atomic with respect to each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use serde::Serialize;
use sift_core::{Document, Error, Match, ResourceId, Result, SpaceId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::backend::{DocumentIndex, IndexFactory, OpenedIndex};
use crate::cursor::{Position, rank_cmp};
use crate::query::QueryExpr;
use crate::snippet;

/// Lifecycle of a space index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceState {
    /// Nothing indexed yet.
    Absent,
    /// A full reindex is running.
    Indexing,
    /// A generation is published and queryable.
    Ready,
}

impl fmt::Display for SpaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Indexing => write!(f, "indexing"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Result of a mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The change was applied.
    Applied,
    /// The sequence was not newer than the last applied one; nothing changed.
    Stale,
}

/// One page of a single-space query.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    /// Matches in `(score desc, resource_id asc)` order.
    pub matches: Vec<Match>,
    /// Position of the last returned match when more follow.
    pub next: Option<Position>,
    /// True when matches exist past this page.
    pub has_more: bool,
    /// Exact number of matches in the space.
    pub total: usize,
}

/// Point-in-time view of a space index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceStats {
    pub space_id: SpaceId,
    pub state: SpaceState,
    pub generation: Option<u64>,
    pub document_count: usize,
    pub backend: String,
}

struct Generation {
    number: u64,
    index: Arc<dyn DocumentIndex>,
}

/// State owned by the single writer of a space.
pub struct WriterState {
    /// Last applied sequence per resource, deletes included.
    versions: HashMap<ResourceId, u64>,
    next_generation: u64,
}

impl WriterState {
    fn is_stale(&self, resource_id: &ResourceId, sequence: u64) -> bool {
        self.versions
            .get(resource_id)
            .is_some_and(|&last| sequence <= last)
    }
}

/// Index of one space.
pub struct SpaceIndex {
    space_id: SpaceId,
    factory: Arc<dyn IndexFactory>,
    current: RwLock<Option<Arc<Generation>>>,
    writer: Arc<Mutex<WriterState>>,
    indexing: AtomicBool,
}

impl SpaceIndex {
    /// A space with nothing indexed.
    pub fn new(space_id: SpaceId, factory: Arc<dyn IndexFactory>) -> Self {
        Self {
            space_id,
            factory,
            current: RwLock::new(None),
            writer: Arc::new(Mutex::new(WriterState {
                versions: HashMap::new(),
                next_generation: 1,
            })),
            indexing: AtomicBool::new(false),
        }
    }

    /// A space restored from a persisted generation.
    ///
    /// The sequence table is rebuilt from the stored documents.
    pub fn from_opened(
        space_id: SpaceId,
        factory: Arc<dyn IndexFactory>,
        opened: OpenedIndex,
    ) -> Result<Self> {
        let versions: HashMap<ResourceId, u64> = opened.index.versions()?.into_iter().collect();
        let generation = Generation {
            number: opened.generation,
            index: opened.index,
        };
        Ok(Self {
            space_id,
            factory,
            current: RwLock::new(Some(Arc::new(generation))),
            writer: Arc::new(Mutex::new(WriterState {
                versions,
                next_generation: opened.generation + 1,
            })),
            indexing: AtomicBool::new(false),
        })
    }

    /// Space id.
    pub fn space_id(&self) -> &SpaceId {
        &self.space_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SpaceState {
        if self.indexing.load(Ordering::SeqCst) {
            SpaceState::Indexing
        } else if self.snapshot().is_some() {
            SpaceState::Ready
        } else {
            SpaceState::Absent
        }
    }

    fn snapshot(&self) -> Option<Arc<Generation>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publish a generation, returning the one it replaced.
    fn install(&self, generation: Generation) -> Option<Arc<Generation>> {
        self.current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Arc::new(generation))
    }

    /// Current generation, creating and publishing an empty one if needed.
    fn ensure_generation(&self, state: &mut WriterState) -> Result<Arc<Generation>> {
        if let Some(current) = self.snapshot() {
            return Ok(current);
        }
        let number = state.next_generation;
        let index = self.factory.create(&self.space_id, number)?;
        if let Err(e) = self.factory.publish(&self.space_id, number, 0) {
            discard(&*self.factory, &self.space_id, number, index);
            return Err(e);
        }
        state.next_generation += 1;
        debug!("Created space '{}' generation {number}", self.space_id);
        self.install(Generation { number, index });
        self.snapshot()
            .ok_or_else(|| Error::internal("generation vanished after install"))
    }

    /// Insert or replace a document unless its sequence is stale.
    pub async fn upsert(&self, document: &Document) -> Result<WriteOutcome> {
        let mut state = self.writer.lock().await;
        let id = document.resource_id();
        if state.is_stale(id, document.sequence) {
            debug!(
                "Ignoring stale upsert of '{id}' in '{}' (sequence {})",
                self.space_id, document.sequence
            );
            return Ok(WriteOutcome::Stale);
        }
        let generation = self.ensure_generation(&mut state)?;
        generation.index.upsert(document)?;
        state.versions.insert(id.clone(), document.sequence);
        Ok(WriteOutcome::Applied)
    }

    /// Remove a document unless the delete is stale.
    ///
    /// The sequence is kept as a tombstone so an older upsert arriving
    /// later cannot resurrect the document.
    pub async fn delete(&self, resource_id: &ResourceId, sequence: u64) -> Result<WriteOutcome> {
        let mut state = self.writer.lock().await;
        if state.is_stale(resource_id, sequence) {
            debug!(
                "Ignoring stale delete of '{resource_id}' in '{}' (sequence {sequence})",
                self.space_id
            );
            return Ok(WriteOutcome::Stale);
        }
        let generation = self.ensure_generation(&mut state)?;
        generation.index.delete(resource_id)?;
        state.versions.insert(resource_id.clone(), sequence);
        Ok(WriteOutcome::Applied)
    }

    /// Take the writer for a full reindex.
    ///
    /// Waits for any running reindex or write on this space. The space
    /// reports [`SpaceState::Indexing`] until the guard is dropped.
    pub async fn begin_reindex(self: &Arc<Self>) -> ReindexGuard {
        let state = Arc::clone(&self.writer).lock_owned().await;
        self.indexing.store(true, Ordering::SeqCst);
        ReindexGuard {
            space: Arc::clone(self),
            state,
        }
    }

    /// Query the current generation.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the space has never been indexed and no
    /// reindex is running.
    pub fn query(
        &self,
        expr: &QueryExpr,
        limit: usize,
        after: Option<&Position>,
        snippet_length: usize,
    ) -> Result<QueryPage> {
        let Some(generation) = self.snapshot() else {
            if self.indexing.load(Ordering::SeqCst) {
                return Ok(QueryPage::default());
            }
            return Err(Error::not_found(format!(
                "space '{}' has no index",
                self.space_id
            )));
        };

        let mut hits = generation.index.search(expr)?;
        let total = hits.len();
        hits.sort_by(|a, b| {
            rank_cmp(
                a.score,
                a.document.resource_id(),
                b.score,
                b.document.resource_id(),
            )
        });

        let mut remaining = hits.into_iter().filter(|hit| {
            after.is_none_or(|pos| {
                pos.cmp_entry(hit.score, hit.document.resource_id()) == std::cmp::Ordering::Greater
            })
        });

        let matches: Vec<Match> = remaining
            .by_ref()
            .take(limit)
            .map(|hit| {
                let snippet = snippet::for_document(&hit.document, expr, snippet_length);
                Match::from_document(&hit.document, hit.score, snippet)
            })
            .collect();
        let has_more = remaining.next().is_some();
        let next = if has_more {
            matches.last().map(Position::of)
        } else {
            None
        };

        Ok(QueryPage {
            matches,
            next,
            has_more,
            total,
        })
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> Result<SpaceStats> {
        let snapshot = self.snapshot();
        let (generation, document_count, backend) = match &snapshot {
            Some(g) => (Some(g.number), g.index.len()?, g.index.name().to_string()),
            None => (None, 0, self.factory.name().to_string()),
        };
        Ok(SpaceStats {
            space_id: self.space_id.clone(),
            state: self.state(),
            generation,
            document_count,
            backend,
        })
    }
}

impl fmt::Debug for SpaceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpaceIndex")
            .field("space_id", &self.space_id)
            .field("state", &self.state())
            .finish()
    }
}

fn discard(factory: &dyn IndexFactory, space_id: &SpaceId, number: u64, index: Arc<dyn DocumentIndex>) {
    index.retire();
    drop(index);
    if let Err(e) = factory.discard(space_id, number) {
        warn!("Failed to discard generation {number} of '{space_id}': {e}");
    }
}

/// Exclusive writer access for a full reindex.
///
/// Incremental writes to the space wait until the guard is dropped.
/// Dropping it without calling [`ReindexGuard::replace_all`] leaves the
/// space as it was.
pub struct ReindexGuard {
    space: Arc<SpaceIndex>,
    state: OwnedMutexGuard<WriterState>,
}

impl ReindexGuard {
    /// Space being reindexed.
    pub fn space_id(&self) -> &SpaceId {
        &self.space.space_id
    }

    /// Atomically replace every document of the space.
    ///
    /// A new generation is built and published before it becomes visible;
    /// readers see either the old or the new contents. On failure the new
    /// generation is discarded and the old one stays authoritative.
    /// Returns the number of indexed documents.
    pub fn replace_all(mut self, documents: Vec<Document>) -> Result<usize> {
        let space = Arc::clone(&self.space);
        let space_id = &space.space_id;

        let mut latest: HashMap<ResourceId, Document> = HashMap::with_capacity(documents.len());
        for doc in documents {
            if doc.space_id() != space_id {
                warn!(
                    "Skipping '{}' listed for space '{}' while reindexing '{space_id}'",
                    doc.resource_id(),
                    doc.space_id()
                );
                continue;
            }
            match latest.get(doc.resource_id()) {
                Some(existing) if existing.sequence >= doc.sequence => {}
                _ => {
                    latest.insert(doc.resource_id().clone(), doc);
                }
            }
        }
        let documents: Vec<Document> = latest.into_values().collect();

        let number = self.state.next_generation;
        let index = space.factory.create(space_id, number)?;
        let count = match index
            .upsert_batch(&documents)
            .and_then(|()| index.len())
            .and_then(|count| {
                space
                    .factory
                    .publish(space_id, number, count)
                    .map(|()| count)
            }) {
            Ok(count) => count,
            Err(e) => {
                warn!("Reindex of '{space_id}' failed, keeping previous index: {e}");
                discard(&*space.factory, space_id, number, index);
                return Err(e);
            }
        };

        let state = &mut *self.state;
        state.next_generation += 1;
        for doc in &documents {
            let entry = state.versions.entry(doc.resource_id().clone()).or_insert(0);
            *entry = (*entry).max(doc.sequence);
        }

        if let Some(old) = space.install(Generation { number, index }) {
            old.index.retire();
        }
        info!("Published space '{space_id}' generation {number} with {count} documents");
        Ok(count)
    }
}

impl Drop for ReindexGuard {
    fn drop(&mut self) {
        self.space.indexing.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for ReindexGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReindexGuard")
            .field("space_id", &self.space.space_id)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
