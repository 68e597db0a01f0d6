//! Storage adapters.
//!
//! - [`MemoryStorage`]: documents held in memory, with change events
//! - [`FsStorage`]: spaces are directories under a root

pub mod fs;
pub mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
