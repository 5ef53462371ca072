//! Object layer on top of slotted pages.
//!
//! This module implements the object-level storage manager of a data file:
//!
//! - **ObjectManager**: Creates, destroys, reads and navigates objects
//! - **ObjectId**: Volume, page, slot and uniquifier of an object
//! - **Available-space lists**: Per-file buckets of pages by free space
//! - **File map**: The doubly linked chain of a file's pages
//! - **DeallocList**: Pages a destroy emptied, released later by the caller
//!
//! Every operation pins the catalog page and the data pages it touches for
//! its own duration only; guards unpin on drop.

pub mod avail_space;
pub mod create;
pub mod dealloc;
pub mod destroy;
pub mod error;
pub mod file_map;
pub mod id;
pub mod manager;
pub mod scan;

pub use avail_space::SpaceBucket;
pub use dealloc::{DeallocEntry, DeallocList};
pub use error::ObjectError;
pub use id::{Object, ObjectId};
pub use manager::{ObjectManager, PageInfo};
pub use scan::{ObjectScanner, ScanDirection};

#[cfg(test)]
pub(crate) mod testing {
    use crate::catalog::{Catalog, CatalogRef};
    use crate::object::ObjectManager;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::buffer::BufferPoolManager;
    use crate::storage::disk::PageManager;
    use crate::storage::page::VolumeId;
    use anyhow::Result;
    use tempfile::{tempdir, TempDir};

    /// A fresh volume with one empty data file.
    pub fn single_file_store() -> Result<(TempDir, ObjectManager, CatalogRef)> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let buffer_pool = BufferPoolManager::new(page_manager, Box::new(LruReplacer::new(16)), 16);
        let catalog = Catalog::initialize(buffer_pool.clone(), VolumeId(1))?;
        let file = catalog.create_file(100)?;
        Ok((dir, ObjectManager::new(buffer_pool), file))
    }
}
