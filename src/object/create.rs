use crate::catalog::{self, CatalogPage, CatalogRef, FileCatalogEntry};
use crate::object::avail_space::{self, SpaceBucket};
use crate::object::error::ObjectError;
use crate::object::file_map;
use crate::object::id::ObjectId;
use crate::object::manager::{belongs_to_file, check_file_page, ObjectManager};
use crate::storage::buffer::PageWriteGuard;
use crate::storage::page::slotted_page::{aligned_length, needed_space, LARGE_OBJECT_THRESHOLD};
use crate::storage::page::{ObjectHeader, PageId, SlottedPage};
use anyhow::{bail, Result};
use log::debug;

impl ObjectManager {
    /// Stores `data` as a new object of the file behind `catalog`.
    ///
    /// With `near`, the object goes on the near object's page when it has
    /// room, otherwise on a fresh page linked right after it. Without a hint
    /// the available-space lists are searched, then the last page, then a
    /// fresh page is appended. The header template supplies properties and
    /// tag; the length is always taken from `data`.
    pub fn create_object(
        &self,
        catalog: CatalogRef,
        near: Option<ObjectId>,
        template: Option<&ObjectHeader>,
        data: &[u8],
    ) -> Result<ObjectId> {
        if u32::try_from(data.len()).is_err() {
            return Err(ObjectError::BadLength(data.len()).into());
        }
        if aligned_length(data.len()) > LARGE_OBJECT_THRESHOLD {
            return Err(ObjectError::NotSupported {
                length: data.len(),
                threshold: LARGE_OBJECT_THRESHOLD,
            }
            .into());
        }
        let header = template.copied().unwrap_or_default();
        let needed = needed_space(data.len());

        let mut cat_guard = catalog::pin_catalog_write(&self.buffer_pool, catalog)?;
        let mut cat_page = CatalogPage::from_data(&mut cat_guard);
        let mut entry = cat_page.entry(catalog.entry)?;

        let (page_id, mut guard) = match near {
            Some(near) => {
                self.check_oid_target(&entry, catalog, near)?;
                self.place_near(&mut entry, near, needed)?
            }
            None => self.place_anywhere(&mut entry, catalog, needed)?,
        };

        let mut page = SlottedPage::from_data(&mut guard);
        let unique = cat_page.next_unique();
        let slot = page.insert_object(&header, data, unique)?;
        avail_space::put_in_list(&self.buffer_pool, &mut entry, &mut page)?;
        cat_page.set_entry(catalog.entry, &entry);
        guard.mark_dirty();
        cat_guard.mark_dirty();

        let oid = ObjectId::new(entry.volume, page_id, slot, unique);
        debug!("created object {} of {} bytes", oid, data.len());
        Ok(oid)
    }

    fn place_near(
        &self,
        entry: &mut FileCatalogEntry,
        near: ObjectId,
        needed: usize,
    ) -> Result<(PageId, PageWriteGuard)> {
        let mut guard = self.buffer_pool.fetch_page_write(near.page_id)?;
        let mut page = SlottedPage::from_data(&mut guard);
        if !belongs_to_file(&page, entry) {
            return Err(ObjectError::bad_oid(
                near,
                format!("page is not a page of file {}", entry.file_id),
            )
            .into());
        }

        if page.total_free() >= needed {
            avail_space::remove_from_list(&self.buffer_pool, entry, &mut page)?;
            if page.contiguous_free() < needed {
                page.compact(Some(near.slot))?;
                debug!(
                    "compacted page {} keeping slot {} last",
                    near.page_id.0, near.slot
                );
            }
            return Ok((near.page_id, guard));
        }

        drop(guard);
        self.allocate_after(entry, near.page_id)
    }

    fn place_anywhere(
        &self,
        entry: &mut FileCatalogEntry,
        catalog: CatalogRef,
        needed: usize,
    ) -> Result<(PageId, PageWriteGuard)> {
        for bucket in SpaceBucket::candidates(needed) {
            let Some(head) = entry.space_lists[bucket.index()] else {
                continue;
            };
            if let Some(placed) = self.try_page(entry, catalog, head, needed)? {
                debug!("placing {} bytes on page {} from {:?}", needed, head.0, bucket);
                return Ok(placed);
            }
        }

        let last = entry.last_page;
        if let Some(placed) = self.try_page(entry, catalog, last, needed)? {
            return Ok(placed);
        }
        self.allocate_after(entry, last)
    }

    /// Pins `page_id` and readies it for `needed` bytes, or returns `None`
    /// when its total free space falls short.
    fn try_page(
        &self,
        entry: &mut FileCatalogEntry,
        catalog: CatalogRef,
        page_id: PageId,
        needed: usize,
    ) -> Result<Option<(PageId, PageWriteGuard)>> {
        if page_id == catalog.page_id {
            bail!("File {} links to the catalog page", entry.file_id);
        }

        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        let mut page = SlottedPage::from_data(&mut guard);
        check_file_page(&page, entry)?;
        if page.total_free() < needed {
            return Ok(None);
        }

        avail_space::remove_from_list(&self.buffer_pool, entry, &mut page)?;
        if page.contiguous_free() < needed {
            page.compact(None)?;
            debug!("compacted page {}", page_id.0);
        }
        Ok(Some((page_id, guard)))
    }

    /// Grants a page as close as possible to `after`, within the file's
    /// extent fill factor, and links it into the chain behind it.
    fn allocate_after(
        &self,
        entry: &mut FileCatalogEntry,
        after: PageId,
    ) -> Result<(PageId, PageWriteGuard)> {
        let (page_id, mut guard) = self
            .buffer_pool
            .new_page_near(after, entry.fill_factor)?;
        let mut page = SlottedPage::new(&mut guard, page_id, entry.volume, entry.file_id);
        file_map::add_page(&self.buffer_pool, entry, after, &mut page)?;
        debug!(
            "allocated page {} after page {} for file {}",
            page_id.0, after.0, entry.file_id
        );
        Ok((page_id, guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::testing::single_file_store;
    use crate::storage::page::slotted_page::DATA_AREA_SIZE;

    #[test]
    fn test_first_objects_share_first_page() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let first_page = objects.load_entry(file)?.first_page;

        let a = objects.create_object(file, None, None, &[1u8; 10])?;
        let b = objects.create_object(file, None, Some(&ObjectHeader::new(2, 7)), &[2u8; 20])?;

        assert_eq!(a.page_id, first_page);
        assert_eq!(b.page_id, first_page);
        assert_eq!((a.slot, b.slot), (0, 1));
        assert!(b.unique > a.unique);

        let read = objects.read_object(file, b)?;
        assert_eq!(read.data, vec![2u8; 20]);
        assert_eq!(read.header.properties, 2);
        assert_eq!(read.header.tag, 7);
        assert_eq!(read.header.length, 20);
        Ok(())
    }

    #[test]
    fn test_oversized_object_rejected() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;

        let data = vec![0u8; LARGE_OBJECT_THRESHOLD + 1];
        let err = objects.create_object(file, None, None, &data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ObjectError>(),
            Some(ObjectError::NotSupported { .. })
        ));

        // The largest small object still fits on an empty page.
        let data = vec![9u8; LARGE_OBJECT_THRESHOLD];
        let oid = objects.create_object(file, None, None, &data)?;
        assert_eq!(objects.read_object(file, oid)?.data.len(), LARGE_OBJECT_THRESHOLD);
        assert!(LARGE_OBJECT_THRESHOLD < DATA_AREA_SIZE);
        Ok(())
    }

    #[test]
    fn test_near_hint_places_on_same_page() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;

        let anchor = objects.create_object(file, None, None, &[1u8; 3000])?;
        let filler = objects.create_object(file, None, None, &[2u8; 3000])?;
        // No room left next to the anchor: a fresh page follows it.
        let spill = objects.create_object(file, Some(anchor), None, &[3u8; 3000])?;
        let close = objects.create_object(file, Some(spill), None, &[4u8; 100])?;

        assert_eq!(filler.page_id, anchor.page_id);
        assert_ne!(spill.page_id, anchor.page_id);
        assert_eq!(close.page_id, spill.page_id);

        let pages = objects.file_pages(file)?;
        let order: Vec<_> = pages.iter().map(|p| p.page_id).collect();
        assert_eq!(order, vec![anchor.page_id, spill.page_id]);
        Ok(())
    }

    #[test]
    fn test_near_hint_compacts_page() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;

        let mut oids = Vec::new();
        for i in 0..4u8 {
            oids.push(objects.create_object(file, None, None, &[i; 1900])?);
        }
        let mut dealloc = crate::object::DeallocList::new();
        objects.destroy_object(file, oids[1], &mut dealloc)?;

        // Only the hole left by oids[1] makes room.
        let before = objects.file_pages(file)?;
        assert!(before[0].contiguous_free < needed_space(1500));
        assert!(before[0].total_free >= needed_space(1500));

        let placed = objects.create_object(file, Some(oids[2]), None, &[9u8; 1500])?;
        assert_eq!(placed.page_id, oids[0].page_id);
        assert_eq!(placed.slot, 1);

        let after = objects.file_pages(file)?;
        assert_eq!(after[0].unused, 0);
        for (oid, byte) in [(oids[0], 0u8), (oids[2], 2), (oids[3], 3)] {
            assert_eq!(objects.read_object(file, oid)?.data, vec![byte; 1900]);
        }
        assert_eq!(objects.read_object(file, placed)?.data, vec![9u8; 1500]);
        assert!(dealloc.is_empty());
        Ok(())
    }

    #[test]
    fn test_near_hint_from_other_volume_rejected() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let anchor = objects.create_object(file, None, None, b"anchor")?;

        let foreign = ObjectId {
            volume: crate::storage::page::VolumeId(9),
            ..anchor
        };
        let err = objects
            .create_object(file, Some(foreign), None, b"x")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ObjectError>(),
            Some(ObjectError::BadObjectId { .. })
        ));
        Ok(())
    }
}
