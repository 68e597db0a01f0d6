//! Change ingestion for Sift.
//!
//! Keeps space indices current with storage:
//!
//! - [`ChangeFeed`]: bounded producer handle with explicit backpressure
//! - [`ChangeIngestor`]: consume loop, single-event apply, full reindex
//! - [`storage`]: in-memory and filesystem [`StorageProvider`] adapters
//!
//! [`StorageProvider`]: sift_core::StorageProvider

pub mod feed;
pub mod ingestor;
pub mod mime;
pub mod storage;

pub use feed::{ChangeFeed, DEFAULT_FEED_CAPACITY};
pub use ingestor::{ChangeIngestor, IngestStats};
pub use storage::{FsStorage, MemoryStorage};
