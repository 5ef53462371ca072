use crate::catalog::{self, CatalogPage, CatalogRef, FileCatalogEntry};
use crate::object::avail_space::SpaceBucket;
use crate::object::error::ObjectError;
use crate::object::id::{Object, ObjectId};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{PageId, SlottedPage};
use crate::storage::PAGE_SIZE;
use anyhow::{bail, Result};
use std::ops::Deref;

/// Object-level operations over the data files of one volume.
#[derive(Clone)]
pub struct ObjectManager {
    pub(crate) buffer_pool: BufferPoolManager,
}

/// Space accounting of one page of a file, in chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: PageId,
    pub n_slots: u16,
    pub live_objects: usize,
    pub free: u16,
    pub unused: u16,
    pub contiguous_free: usize,
    pub total_free: usize,
    pub space_list: Option<SpaceBucket>,
}

impl ObjectManager {
    pub fn new(buffer_pool: BufferPoolManager) -> Self {
        Self { buffer_pool }
    }

    /// Copies an object out of its page.
    pub fn read_object(&self, catalog: CatalogRef, oid: ObjectId) -> Result<Object> {
        let cat_guard = catalog::pin_catalog_read(&self.buffer_pool, catalog)?;
        let entry = CatalogPage::view(&cat_guard).entry(catalog.entry)?;
        self.check_oid_target(&entry, catalog, oid)?;

        let guard = self.buffer_pool.fetch_page(oid.page_id)?;
        let page = SlottedPage::view(&guard);
        check_object(&page, &entry, oid)?;

        let header = page.object_header(oid.slot)?;
        let data = page.object_data(oid.slot)?.to_vec();
        Ok(Object::new(oid, header, data))
    }

    /// Walks the page chain of a file and reports each page's free space.
    pub fn file_pages(&self, catalog: CatalogRef) -> Result<Vec<PageInfo>> {
        let entry = self.load_entry(catalog)?;
        let mut pages = Vec::new();
        let mut remaining = self.buffer_pool.num_pages()?;
        let mut current = Some(entry.first_page);

        while let Some(page_id) = current {
            if remaining == 0 {
                bail!("Page chain of file {} does not terminate", entry.file_id);
            }
            remaining -= 1;

            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = SlottedPage::view(&guard);
            check_file_page(&page, &entry)?;
            pages.push(PageInfo {
                page_id,
                n_slots: page.n_slots(),
                live_objects: page.live_objects(),
                free: page.free(),
                unused: page.unused(),
                contiguous_free: page.contiguous_free(),
                total_free: page.total_free(),
                space_list: page.space_list().and_then(SpaceBucket::from_index),
            });
            current = page.next_page();
        }
        Ok(pages)
    }

    /// Pages on the available-space list of `bucket`, head first.
    pub fn space_list_pages(&self, catalog: CatalogRef, bucket: SpaceBucket) -> Result<Vec<PageId>> {
        let entry = self.load_entry(catalog)?;
        let mut pages = Vec::new();
        let mut remaining = self.buffer_pool.num_pages()?;
        let mut current = entry.space_lists[bucket.index()];

        while let Some(page_id) = current {
            if remaining == 0 {
                bail!("Space list {:?} of file {} does not terminate", bucket, entry.file_id);
            }
            remaining -= 1;

            pages.push(page_id);
            let guard = self.buffer_pool.fetch_page(page_id)?;
            current = SlottedPage::view(&guard).space_next();
        }
        Ok(pages)
    }

    pub(crate) fn load_entry(&self, catalog: CatalogRef) -> Result<FileCatalogEntry> {
        let guard = catalog::pin_catalog_read(&self.buffer_pool, catalog)?;
        CatalogPage::view(&guard).entry(catalog.entry)
    }

    /// Rejects ids that name another volume, the catalog page or a page past
    /// the end of the volume, before any data page is pinned.
    pub(crate) fn check_oid_target(
        &self,
        entry: &FileCatalogEntry,
        catalog: CatalogRef,
        oid: ObjectId,
    ) -> Result<()> {
        if oid.volume != entry.volume {
            return Err(ObjectError::bad_oid(
                oid,
                format!("file lives on volume {}", entry.volume.0),
            )
            .into());
        }
        if oid.page_id == catalog.page_id {
            return Err(ObjectError::bad_oid(oid, "names the catalog page").into());
        }
        if oid.page_id.0 >= self.buffer_pool.num_pages()? {
            return Err(ObjectError::bad_oid(oid, "page is beyond the end of the volume").into());
        }
        Ok(())
    }
}

pub(crate) fn belongs_to_file<B: Deref<Target = [u8; PAGE_SIZE]>>(
    page: &SlottedPage<B>,
    entry: &FileCatalogEntry,
) -> bool {
    page.is_slotted() && page.file_id() == entry.file_id && page.volume() == entry.volume
}

/// A page reached through the file's own links must belong to the file.
pub(crate) fn check_file_page<B: Deref<Target = [u8; PAGE_SIZE]>>(
    page: &SlottedPage<B>,
    entry: &FileCatalogEntry,
) -> Result<()> {
    if !belongs_to_file(page, entry) {
        bail!(
            "Page {} is linked from file {} but does not belong to it",
            page.page_id().0,
            entry.file_id
        );
    }
    Ok(())
}

/// The object named by `oid` must be live on `page` with a matching
/// uniquifier.
pub(crate) fn check_object<B: Deref<Target = [u8; PAGE_SIZE]>>(
    page: &SlottedPage<B>,
    entry: &FileCatalogEntry,
    oid: ObjectId,
) -> Result<()> {
    if !belongs_to_file(page, entry) {
        return Err(ObjectError::bad_oid(
            oid,
            format!("page is not a page of file {}", entry.file_id),
        )
        .into());
    }
    let slot = page
        .occupied_slot(oid.slot)
        .map_err(|e| ObjectError::bad_oid(oid, e.to_string()))?;
    if slot.unique != oid.unique {
        return Err(ObjectError::bad_oid(
            oid,
            format!("slot now holds uniquifier {}", slot.unique),
        )
        .into());
    }
    Ok(())
}
