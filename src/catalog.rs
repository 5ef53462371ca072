//! Per-file catalog entries.
//!
//! The catalog lives on page 0 of a volume. Its header carries the volume
//! number, the next file id and the volume-wide uniquifier counter; the rest
//! of the page is an array of fixed-size file entries.

use crate::object::avail_space::{self, SPACE_LIST_COUNT};
use crate::object::error::ObjectError;
use crate::storage::buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
use crate::storage::page::{PageId, SlottedPage, VolumeId};
use crate::storage::PAGE_SIZE;
use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

pub const CATALOG_PAGE: PageId = PageId(0);
const CATALOG_MAGIC: u32 = 0x534C_4F54;

// Catalog page header (16 bytes)
const HEADER_SIZE: usize = 16;
const MAGIC_OFFSET: usize = 0;
const VOLUME_OFFSET: usize = 4;
const ENTRY_COUNT_OFFSET: usize = 6;
const NEXT_FILE_ID_OFFSET: usize = 8;
const NEXT_UNIQUE_OFFSET: usize = 12;

// File entry (36 bytes)
const ENTRY_SIZE: usize = 36;
const FILE_ID_FIELD: usize = 0;
const VOLUME_FIELD: usize = 4;
const FILL_FACTOR_FIELD: usize = 6;
const FIRST_PAGE_FIELD: usize = 8;
const LAST_PAGE_FIELD: usize = 12;
const SPACE_LISTS_FIELD: usize = 16;

pub const MAX_FILES: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

/// Extent fill factors are percentages in 1..=100.
pub fn validate_fill_factor(fill_factor: u16) -> Result<()> {
    if !(1..=100).contains(&fill_factor) {
        bail!(
            "Extent fill factor must be between 1 and 100, got {}",
            fill_factor
        );
    }
    Ok(())
}

/// Addresses one file entry inside a catalog page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogRef {
    pub page_id: PageId,
    pub entry: u16,
}

impl CatalogRef {
    pub fn new(page_id: PageId, entry: u16) -> Self {
        Self { page_id, entry }
    }
}

/// Decoded copy of a file entry. Object operations mutate it and write it
/// back before releasing the catalog pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCatalogEntry {
    pub file_id: u32,
    pub volume: VolumeId,
    pub fill_factor: u16,
    pub first_page: PageId,
    pub last_page: PageId,
    pub space_lists: [Option<PageId>; SPACE_LIST_COUNT],
}

pub struct CatalogPage<B> {
    data: B,
}

impl<'a> CatalogPage<&'a mut [u8; PAGE_SIZE]> {
    pub fn new(data: &'a mut [u8; PAGE_SIZE], volume: VolumeId) -> Self {
        data.fill(0);
        let mut page = Self { data };
        page.write_u32(MAGIC_OFFSET, CATALOG_MAGIC);
        page.write_u16(VOLUME_OFFSET, volume.0);
        page.write_u32(NEXT_FILE_ID_OFFSET, 1);
        page.write_u32(NEXT_UNIQUE_OFFSET, 1);
        page
    }

    pub fn from_data(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }
}

impl<'a> CatalogPage<&'a [u8; PAGE_SIZE]> {
    pub fn view(data: &'a [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }
}

impl<B: Deref<Target = [u8; PAGE_SIZE]>> CatalogPage<B> {
    fn read_u16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.data[offset..offset + 2])
    }

    fn read_u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.data[offset..offset + 4])
    }

    pub fn is_catalog(&self) -> bool {
        self.read_u32(MAGIC_OFFSET) == CATALOG_MAGIC
    }

    pub fn volume(&self) -> VolumeId {
        VolumeId(self.read_u16(VOLUME_OFFSET))
    }

    pub fn entry_count(&self) -> u16 {
        self.read_u16(ENTRY_COUNT_OFFSET)
    }

    pub fn entry(&self, index: u16) -> Result<FileCatalogEntry> {
        if index >= self.entry_count() {
            return Err(ObjectError::BadCatalogObject(format!(
                "entry {} out of range ({} entries)",
                index,
                self.entry_count()
            ))
            .into());
        }

        let base = HEADER_SIZE + index as usize * ENTRY_SIZE;
        let file_id = self.read_u32(base + FILE_ID_FIELD);
        if file_id == 0 {
            return Err(ObjectError::BadCatalogObject(format!("entry {} is unused", index)).into());
        }

        let mut space_lists = [None; SPACE_LIST_COUNT];
        for (i, head) in space_lists.iter_mut().enumerate() {
            *head = PageId::from_raw(self.read_u32(base + SPACE_LISTS_FIELD + i * 4));
        }

        Ok(FileCatalogEntry {
            file_id,
            volume: VolumeId(self.read_u16(base + VOLUME_FIELD)),
            fill_factor: self.read_u16(base + FILL_FACTOR_FIELD),
            first_page: PageId(self.read_u32(base + FIRST_PAGE_FIELD)),
            last_page: PageId(self.read_u32(base + LAST_PAGE_FIELD)),
            space_lists,
        })
    }
}

impl<B: DerefMut<Target = [u8; PAGE_SIZE]>> CatalogPage<B> {
    fn write_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.data[offset..offset + 2], value);
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.data[offset..offset + 4], value);
    }

    pub fn set_entry(&mut self, index: u16, entry: &FileCatalogEntry) {
        let base = HEADER_SIZE + index as usize * ENTRY_SIZE;
        self.write_u32(base + FILE_ID_FIELD, entry.file_id);
        self.write_u16(base + VOLUME_FIELD, entry.volume.0);
        self.write_u16(base + FILL_FACTOR_FIELD, entry.fill_factor);
        self.write_u32(base + FIRST_PAGE_FIELD, entry.first_page.0);
        self.write_u32(base + LAST_PAGE_FIELD, entry.last_page.0);
        for (i, head) in entry.space_lists.iter().enumerate() {
            self.write_u32(base + SPACE_LISTS_FIELD + i * 4, PageId::to_raw(*head));
        }
    }

    fn push_entry(&mut self, entry: &FileCatalogEntry) -> Result<u16> {
        let index = self.entry_count();
        if index as usize >= MAX_FILES {
            bail!("Catalog page is full ({} files)", MAX_FILES);
        }
        self.set_entry(index, entry);
        self.write_u16(ENTRY_COUNT_OFFSET, index + 1);
        Ok(index)
    }

    fn allocate_file_id(&mut self) -> u32 {
        let file_id = self.read_u32(NEXT_FILE_ID_OFFSET);
        self.write_u32(NEXT_FILE_ID_OFFSET, file_id + 1);
        file_id
    }

    /// Hands out the next volume-wide uniquifier.
    pub fn next_unique(&mut self) -> u32 {
        let unique = self.read_u32(NEXT_UNIQUE_OFFSET);
        self.write_u32(NEXT_UNIQUE_OFFSET, unique.wrapping_add(1).max(1));
        unique
    }
}

/// Pins the catalog page behind `catalog` for mutation, rejecting references
/// that do not point at a catalog page.
pub(crate) fn pin_catalog_write(
    buffer_pool: &BufferPoolManager,
    catalog: CatalogRef,
) -> Result<PageWriteGuard> {
    check_catalog_page(buffer_pool, catalog)?;
    let guard = buffer_pool.fetch_page_write(catalog.page_id)?;
    if !CatalogPage::view(&guard).is_catalog() {
        return Err(not_a_catalog(catalog));
    }
    Ok(guard)
}

pub(crate) fn pin_catalog_read(
    buffer_pool: &BufferPoolManager,
    catalog: CatalogRef,
) -> Result<PageReadGuard> {
    check_catalog_page(buffer_pool, catalog)?;
    let guard = buffer_pool.fetch_page(catalog.page_id)?;
    if !CatalogPage::view(&guard).is_catalog() {
        return Err(not_a_catalog(catalog));
    }
    Ok(guard)
}

fn check_catalog_page(buffer_pool: &BufferPoolManager, catalog: CatalogRef) -> Result<()> {
    if catalog.page_id.0 >= buffer_pool.num_pages()? {
        return Err(not_a_catalog(catalog));
    }
    Ok(())
}

fn not_a_catalog(catalog: CatalogRef) -> anyhow::Error {
    ObjectError::BadCatalogObject(format!("page {} is not a catalog page", catalog.page_id.0))
        .into()
}

/// Catalog of the data files of one volume.
#[derive(Clone)]
pub struct Catalog {
    buffer_pool: BufferPoolManager,
    volume: VolumeId,
}

impl Catalog {
    /// Formats the catalog page of a fresh volume.
    pub fn initialize(buffer_pool: BufferPoolManager, volume: VolumeId) -> Result<Self> {
        let (page_id, mut guard) = buffer_pool.new_page()?;
        if page_id != CATALOG_PAGE {
            bail!("Expected catalog page to be PageId(0), got {:?}", page_id);
        }
        CatalogPage::new(&mut guard, volume);
        guard.mark_dirty();
        drop(guard);

        Ok(Self {
            buffer_pool,
            volume,
        })
    }

    pub fn open(buffer_pool: BufferPoolManager) -> Result<Self> {
        let guard = buffer_pool.fetch_page(CATALOG_PAGE)?;
        let page = CatalogPage::view(&guard);
        if !page.is_catalog() {
            bail!("Page 0 is not a catalog page");
        }
        let volume = page.volume();
        drop(guard);

        Ok(Self {
            buffer_pool,
            volume,
        })
    }

    pub fn volume(&self) -> VolumeId {
        self.volume
    }

    /// Registers a new data file and formats its first page.
    pub fn create_file(&self, fill_factor: u16) -> Result<CatalogRef> {
        validate_fill_factor(fill_factor)?;
        let mut cat_guard = self.buffer_pool.fetch_page_write(CATALOG_PAGE)?;
        let mut catalog = CatalogPage::from_data(&mut cat_guard);
        if catalog.entry_count() as usize >= MAX_FILES {
            bail!("Catalog page is full ({} files)", MAX_FILES);
        }
        let file_id = catalog.allocate_file_id();

        let (page_id, mut guard) = self.buffer_pool.new_page()?;
        let mut page = SlottedPage::new(&mut guard, page_id, self.volume, file_id);

        let mut entry = FileCatalogEntry {
            file_id,
            volume: self.volume,
            fill_factor,
            first_page: page_id,
            last_page: page_id,
            space_lists: [None; SPACE_LIST_COUNT],
        };
        avail_space::put_in_list(&self.buffer_pool, &mut entry, &mut page)?;
        let index = catalog.push_entry(&entry)?;
        guard.mark_dirty();
        cat_guard.mark_dirty();

        debug!(
            "created file {} (catalog entry {}) with first page {}",
            file_id, index, page_id.0
        );
        Ok(CatalogRef::new(CATALOG_PAGE, index))
    }

    pub fn entry(&self, catalog: CatalogRef) -> Result<FileCatalogEntry> {
        let guard = pin_catalog_read(&self.buffer_pool, catalog)?;
        CatalogPage::view(&guard).entry(catalog.entry)
    }

    pub fn list_files(&self) -> Result<Vec<(CatalogRef, FileCatalogEntry)>> {
        let guard = self.buffer_pool.fetch_page(CATALOG_PAGE)?;
        let page = CatalogPage::view(&guard);
        let mut files = Vec::new();
        for index in 0..page.entry_count() {
            if let Ok(entry) = page.entry(index) {
                files.push((CatalogRef::new(CATALOG_PAGE, index), entry));
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::avail_space::SpaceBucket;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::disk::PageManager;
    use tempfile::{tempdir, TempDir};

    fn create_test_catalog() -> Result<(TempDir, BufferPoolManager, Catalog)> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let buffer_pool = BufferPoolManager::new(page_manager, Box::new(LruReplacer::new(8)), 8);
        let catalog = Catalog::initialize(buffer_pool.clone(), VolumeId(4))?;
        Ok((dir, buffer_pool, catalog))
    }

    #[test]
    fn test_create_file_registers_first_page() -> Result<()> {
        let (_dir, buffer_pool, catalog) = create_test_catalog()?;

        let file = catalog.create_file(90)?;
        assert_eq!(file, CatalogRef::new(CATALOG_PAGE, 0));

        let entry = catalog.entry(file)?;
        assert_eq!(entry.file_id, 1);
        assert_eq!(entry.volume, VolumeId(4));
        assert_eq!(entry.fill_factor, 90);
        assert_eq!(entry.first_page, entry.last_page);
        assert_eq!(
            entry.space_lists[SpaceBucket::Free50.index()],
            Some(entry.first_page)
        );

        let guard = buffer_pool.fetch_page(entry.first_page)?;
        let page = SlottedPage::view(&guard);
        assert!(page.is_slotted());
        assert_eq!(page.file_id(), 1);
        assert_eq!(page.space_list(), Some(SpaceBucket::Free50.index() as u8));
        Ok(())
    }

    #[test]
    fn test_files_get_distinct_ids() -> Result<()> {
        let (_dir, _buffer_pool, catalog) = create_test_catalog()?;

        let a = catalog.create_file(100)?;
        let b = catalog.create_file(100)?;

        let files = catalog.list_files()?;
        assert_eq!(files.len(), 2);
        assert_ne!(catalog.entry(a)?.file_id, catalog.entry(b)?.file_id);
        assert_ne!(catalog.entry(a)?.first_page, catalog.entry(b)?.first_page);
        Ok(())
    }

    #[test]
    fn test_bad_references_are_rejected() -> Result<()> {
        let (_dir, _buffer_pool, catalog) = create_test_catalog()?;
        let file = catalog.create_file(100)?;
        let first_page = catalog.entry(file)?.first_page;

        for bad in [
            CatalogRef::new(CATALOG_PAGE, 5),
            CatalogRef::new(first_page, 0),
            CatalogRef::new(PageId(1000), 0),
        ] {
            let err = catalog.entry(bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ObjectError>(),
                Some(ObjectError::BadCatalogObject(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_create_file_rejects_bad_fill_factor() -> Result<()> {
        let (_dir, _buffer_pool, catalog) = create_test_catalog()?;

        assert!(catalog.create_file(0).is_err());
        assert!(catalog.create_file(500).is_err());
        assert!(catalog.list_files()?.is_empty());

        let file = catalog.create_file(1)?;
        assert_eq!(catalog.entry(file)?.fill_factor, 1);
        Ok(())
    }

    #[test]
    fn test_uniquifiers_are_monotonic() {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let mut page = CatalogPage::new(&mut data, VolumeId(1));

        let first = page.next_unique();
        let second = page.next_unique();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[test]
    fn test_reopen_reads_volume() -> Result<()> {
        let (_dir, buffer_pool, catalog) = create_test_catalog()?;
        catalog.create_file(100)?;

        let reopened = Catalog::open(buffer_pool)?;
        assert_eq!(reopened.volume(), VolumeId(4));
        assert_eq!(reopened.list_files()?.len(), 1);
        Ok(())
    }
}
