//! Bounded change feed.
//!
//! The producer half of the channel the [`ChangeIngestor`] consumes.
//! Capacity is fixed at construction; producers either wait for room
//! ([`ChangeFeed::publish`]) or drop the event ([`ChangeFeed::try_publish`]).
//!
//! [`ChangeIngestor`]: crate::ChangeIngestor

use log::warn;
use sift_core::{ChangeEvent, Error, Result};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

/// Default number of buffered events.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Producer handle of the change feed.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Create a feed and its consumer half.
    ///
    /// A capacity of zero is raised to one.
    pub fn channel(capacity: usize) -> (Self, Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Publish an event, waiting while the feed is full.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] when the consumer has stopped.
    pub async fn publish(&self, event: ChangeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::unavailable("change feed is closed"))
    }

    /// Publish an event without waiting.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] when the feed is full (the event is dropped)
    /// or the consumer has stopped.
    pub fn try_publish(&self, event: ChangeEvent) -> Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Change feed full, dropping {:?} of '{}' in '{}'",
                    event.kind, event.resource_id, event.space_id
                );
                Err(Error::unavailable("change feed is full"))
            }
            Err(TrySendError::Closed(_)) => Err(Error::unavailable("change feed is closed")),
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// True once the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
