//! Storage layer implementation for slotdb.
//!
//! This module provides everything below the object manager:
//!
//! - **Page**: Fixed-size (8KB) blocks of data, the basic unit of I/O
//! - **PageManager**: Reads/writes pages of a volume file and grants new pages
//! - **BufferPool**: In-memory cache of pinned pages with LRU eviction
//! - **SlottedPage**: Slotted page format holding objects and their slots
//!
//! Pages are pinned through guards; dropping a guard unpins the page.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
pub use disk::{PageManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{ObjectHeader, PageId, SlottedPage, VolumeId};
