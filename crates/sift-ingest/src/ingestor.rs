//! Change ingestion.
//!
//! [`ChangeIngestor`] turns storage change events into upserts and deletes
//! on the [`SpaceIndexManager`] and runs full reindexes from the storage
//! collaborator's authoritative listing.

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use log::{debug, error, info, warn};
use serde::Serialize;
use sift_core::{
    ChangeEvent, ChangeKind, ChangeSource, Error, Result, SpaceId, StorageProvider, UserId,
};
use sift_index::{SpaceIndexManager, WriteOutcome};
use tokio::sync::mpsc::Receiver;

/// Counters of one consume loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Events that changed an index.
    pub applied: u64,
    /// Events ignored because a newer change was already applied.
    pub stale: u64,
    /// Malformed events and events that failed to apply.
    pub skipped: u64,
}

/// Applies storage changes to space indices.
pub struct ChangeIngestor {
    manager: Arc<SpaceIndexManager>,
    storage: Arc<dyn StorageProvider>,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ChangeIngestor {
    /// Create an ingestor.
    ///
    /// Reindex retries default to 3 attempts, starting at 1 second and
    /// capped at 10 seconds.
    pub fn new(manager: Arc<SpaceIndexManager>, storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            manager,
            storage,
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Sets the maximum number of reindex retries.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial delay between reindex retries.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between reindex retries.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// The manager events are applied to.
    pub fn manager(&self) -> &Arc<SpaceIndexManager> {
        &self.manager
    }

    /// Apply one change event.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for malformed events; any error from the
    /// index otherwise.
    pub async fn apply(&self, event: ChangeEvent) -> Result<WriteOutcome> {
        validate(&event)?;
        match event.kind {
            ChangeKind::Deleted => {
                self.manager
                    .delete(&event.space_id, &event.resource_id, event.sequence)
                    .await
            }
            ChangeKind::Created | ChangeKind::Updated | ChangeKind::Moved => {
                let mut document = event
                    .document
                    .ok_or_else(|| Error::invalid_argument("upsert event without a document"))?;
                document.sequence = event.sequence;
                self.manager.upsert(&document).await
            }
        }
    }

    /// Consume events until the feed closes.
    ///
    /// Malformed events and events that fail to apply are logged and
    /// skipped; the loop never stops on a single bad event.
    pub async fn run(&self, mut events: Receiver<ChangeEvent>) -> IngestStats {
        let mut stats = IngestStats::default();
        while let Some(event) = events.recv().await {
            let (space_id, resource_id, kind) =
                (event.space_id.clone(), event.resource_id.clone(), event.kind);
            match self.apply(event).await {
                Ok(WriteOutcome::Applied) => stats.applied += 1,
                Ok(WriteOutcome::Stale) => stats.stale += 1,
                Err(e) if e.is_invalid_argument() => {
                    warn!("Skipping malformed {kind:?} event for '{resource_id}' in '{space_id}': {e}");
                    stats.skipped += 1;
                }
                Err(e) => {
                    error!("Failed to apply {kind:?} of '{resource_id}' in '{space_id}': {e}");
                    stats.skipped += 1;
                }
            }
        }
        info!(
            "Change feed closed: {} applied, {} stale, {} skipped",
            stats.applied, stats.stale, stats.skipped
        );
        stats
    }

    /// Subscribe to a change source and consume it until it closes.
    pub async fn run_source(&self, source: &dyn ChangeSource) -> Result<IngestStats> {
        let events = source.subscribe_changes().await?;
        Ok(self.run(events).await)
    }

    /// Replace a space's index with the storage listing.
    ///
    /// Serialized per space: a reindex started while another is running
    /// waits for it. Incremental events for the space wait for the
    /// reindex. A failed listing leaves the existing index untouched.
    /// Returns the number of indexed documents.
    pub async fn reindex_space(&self, space_id: &SpaceId, user_id: &UserId) -> Result<usize> {
        if space_id.is_empty() {
            return Err(Error::invalid_argument("space id must not be empty"));
        }
        let guard = self.manager.begin_reindex(space_id).await?;
        debug!(
            "Listing '{space_id}' from {} storage for reindex",
            self.storage.name()
        );
        let documents = match self.storage.list_resources(space_id, user_id).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!("Reindex of '{space_id}' aborted, storage listing failed: {e}");
                return Err(e);
            }
        };
        guard.replace_all(documents)
    }

    /// [`reindex_space`](Self::reindex_space) with exponential backoff on
    /// retryable failures.
    pub async fn reindex_space_with_retry(
        &self,
        space_id: &SpaceId,
        user_id: &UserId,
    ) -> Result<usize> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts as usize);

        (|| async { self.reindex_space(space_id, user_id).await })
            .retry(backoff)
            .when(Error::is_retryable)
            .notify(|e, delay| warn!("Reindex of '{space_id}' failed ({e}), retrying in {delay:?}"))
            .await
    }
}

impl std::fmt::Debug for ChangeIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeIngestor")
            .field("storage", &self.storage.name())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

fn validate(event: &ChangeEvent) -> Result<()> {
    if event.space_id.is_empty() || event.resource_id.is_empty() {
        return Err(Error::invalid_argument("event has an empty space or resource id"));
    }
    match (&event.document, event.kind.is_upsert()) {
        (None, true) => Err(Error::invalid_argument(format!(
            "{:?} event carries no document",
            event.kind
        ))),
        (Some(doc), true) if doc.space_id() != &event.space_id || doc.resource_id() != &event.resource_id => {
            Err(Error::invalid_argument(
                "event document does not match the event's resource",
            ))
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Tests
// ============================================================================
