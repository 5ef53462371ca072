use crate::catalog::{Catalog, CatalogRef, FileCatalogEntry};
use crate::config::StoreOptions;
use crate::object::{DeallocEntry, DeallocList, ObjectManager};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::disk::PageManager;
use crate::storage::page::VolumeId;
use anyhow::{bail, Result};
use log::{debug, error};
use std::path::Path;

/// A volume file with its catalog and object manager wired together.
pub struct Database {
    buffer_pool: BufferPoolManager,
    catalog: Catalog,
    objects: ObjectManager,
    options: StoreOptions,
}

impl Database {
    /// Create a new volume at the specified path
    pub fn create(path: &Path, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        if path.exists() {
            bail!("Volume file already exists at {:?}", path);
        }

        let page_manager = PageManager::create(path)?;
        let buffer_pool = Self::buffer_pool(page_manager, &options);
        let catalog = Catalog::initialize(buffer_pool.clone(), VolumeId(options.volume))?;

        Ok(Self::assemble(buffer_pool, catalog, options))
    }

    /// Open an existing volume
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        if !path.exists() {
            bail!("Volume file does not exist at {:?}", path);
        }

        let page_manager = PageManager::open(path)?;
        let buffer_pool = Self::buffer_pool(page_manager, &options);
        let catalog = Catalog::open(buffer_pool.clone())?;

        Ok(Self::assemble(buffer_pool, catalog, options))
    }

    fn buffer_pool(page_manager: PageManager, options: &StoreOptions) -> BufferPoolManager {
        let frames = options.buffer_pool_frames;
        BufferPoolManager::new(page_manager, Box::new(LruReplacer::new(frames)), frames)
    }

    fn assemble(buffer_pool: BufferPoolManager, catalog: Catalog, options: StoreOptions) -> Self {
        let objects = ObjectManager::new(buffer_pool.clone());
        Self {
            buffer_pool,
            catalog,
            objects,
            options,
        }
    }

    pub fn volume(&self) -> VolumeId {
        self.catalog.volume()
    }

    /// Create a new data file using the configured fill factor
    pub fn create_file(&self) -> Result<CatalogRef> {
        self.catalog.create_file(self.options.extent_fill_factor)
    }

    pub fn files(&self) -> Result<Vec<(CatalogRef, FileCatalogEntry)>> {
        self.catalog.list_files()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    /// Hands the pages queued by destroys back to the allocator. Returns the
    /// number of pages released.
    pub fn release_deallocated(&self, list: &mut DeallocList) -> Result<usize> {
        let mut released = 0;
        for entry in list.drain() {
            match entry {
                DeallocEntry::Page(page_id) => {
                    self.buffer_pool.deallocate_page(page_id)?;
                    debug!("released page {}", page_id.0);
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    /// Flush all dirty pages to disk
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("failed to flush volume on close: {}", e);
        }
    }
}
