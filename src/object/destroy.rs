use crate::catalog::{self, CatalogPage, CatalogRef};
use crate::object::avail_space;
use crate::object::dealloc::{DeallocEntry, DeallocList};
use crate::object::file_map;
use crate::object::id::ObjectId;
use crate::object::manager::{check_object, ObjectManager};
use crate::storage::page::SlottedPage;
use anyhow::Result;
use log::debug;

impl ObjectManager {
    /// Removes the object named by `oid` from the file behind `catalog`.
    ///
    /// A page other than the file's first one that loses its last object is
    /// unlinked from the file and queued on `dealloc`; the caller releases it
    /// once no one can still reach it.
    pub fn destroy_object(
        &self,
        catalog: CatalogRef,
        oid: ObjectId,
        dealloc: &mut DeallocList,
    ) -> Result<()> {
        let mut cat_guard = catalog::pin_catalog_write(&self.buffer_pool, catalog)?;
        let mut cat_page = CatalogPage::from_data(&mut cat_guard);
        let mut entry = cat_page.entry(catalog.entry)?;
        self.check_oid_target(&entry, catalog, oid)?;

        let mut guard = self.buffer_pool.fetch_page_write(oid.page_id)?;
        let mut page = SlottedPage::from_data(&mut guard);
        check_object(&page, &entry, oid)?;

        avail_space::remove_from_list(&self.buffer_pool, &mut entry, &mut page)?;
        page.remove_object(oid.slot)?;

        if page.n_slots() == 0 && oid.page_id != entry.first_page {
            file_map::delete_page(&self.buffer_pool, &mut entry, &mut page)?;
            dealloc.push(DeallocEntry::Page(oid.page_id));
            debug!(
                "page {} of file {} emptied and queued for deallocation",
                oid.page_id.0, entry.file_id
            );
        } else {
            avail_space::put_in_list(&self.buffer_pool, &mut entry, &mut page)?;
        }

        cat_page.set_entry(catalog.entry, &entry);
        guard.mark_dirty();
        cat_guard.mark_dirty();
        debug!("destroyed object {}", oid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::avail_space::SpaceBucket;
    use crate::object::error::ObjectError;
    use crate::object::testing::single_file_store;

    fn is_bad_oid(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<ObjectError>(),
            Some(ObjectError::BadObjectId { .. })
        )
    }

    #[test]
    fn test_destroy_then_read_fails() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let a = objects.create_object(file, None, None, b"first")?;
        let b = objects.create_object(file, None, None, b"second")?;

        let mut dealloc = DeallocList::new();
        objects.destroy_object(file, a, &mut dealloc)?;

        assert!(is_bad_oid(&objects.read_object(file, a).unwrap_err()));
        assert_eq!(objects.read_object(file, b)?.data, b"second");
        assert!(is_bad_oid(
            &objects.destroy_object(file, a, &mut dealloc).unwrap_err()
        ));
        assert!(dealloc.is_empty());
        Ok(())
    }

    #[test]
    fn test_stale_uniquifier_rejected() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let old = objects.create_object(file, None, None, b"old")?;
        let _keep = objects.create_object(file, None, None, b"keep")?;

        let mut dealloc = DeallocList::new();
        objects.destroy_object(file, old, &mut dealloc)?;
        let new = objects.create_object(file, None, None, b"new")?;

        // Same slot, different identity.
        assert_eq!((new.page_id, new.slot), (old.page_id, old.slot));
        assert_ne!(new.unique, old.unique);
        assert!(is_bad_oid(&objects.read_object(file, old).unwrap_err()));
        assert!(is_bad_oid(
            &objects.destroy_object(file, old, &mut dealloc).unwrap_err()
        ));
        assert_eq!(objects.read_object(file, new)?.data, b"new");
        Ok(())
    }

    #[test]
    fn test_emptied_first_page_stays() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let only = objects.create_object(file, None, None, &[5u8; 64])?;

        let mut dealloc = DeallocList::new();
        objects.destroy_object(file, only, &mut dealloc)?;

        assert!(dealloc.is_empty());
        let pages = objects.file_pages(file)?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].n_slots, 0);
        assert_eq!(pages[0].free, 0);
        assert_eq!(pages[0].space_list, Some(SpaceBucket::Free50));
        Ok(())
    }

    #[test]
    fn test_emptied_page_is_unlinked_and_queued() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let big = objects.create_object(file, None, None, &[1u8; 6000])?;
        let spilled = objects.create_object(file, None, None, &[2u8; 6000])?;
        assert_ne!(big.page_id, spilled.page_id);

        let mut dealloc = DeallocList::new();
        objects.destroy_object(file, spilled, &mut dealloc)?;

        assert_eq!(dealloc.pages().collect::<Vec<_>>(), vec![spilled.page_id]);
        let entry = objects.load_entry(file)?;
        assert_eq!(entry.last_page, big.page_id);
        for bucket in SpaceBucket::ALL {
            assert!(!objects
                .space_list_pages(file, bucket)?
                .contains(&spilled.page_id));
        }
        let pages = objects.file_pages(file)?;
        assert_eq!(pages.len(), 1);
        Ok(())
    }

    #[test]
    fn test_operations_release_their_pins() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let a = objects.create_object(file, None, None, &[1u8; 6000])?;
        let b = objects.create_object(file, None, None, &[2u8; 6000])?;
        let c = objects.create_object(file, Some(a), None, &[3u8; 100])?;
        objects.read_object(file, c)?;
        objects.next_object(file, Some(a))?;
        objects.prev_object(file, None)?;

        let mut dealloc = DeallocList::new();
        objects.destroy_object(file, b, &mut dealloc)?;
        // Failed calls unpin as well.
        assert!(objects.destroy_object(file, b, &mut dealloc).is_err());

        let pool = &objects.buffer_pool;
        for page_id in [file.page_id, a.page_id, b.page_id, c.page_id] {
            assert_eq!(pool.pin_count(page_id), 0, "page {} still pinned", page_id.0);
        }
        Ok(())
    }

    #[test]
    fn test_unlinked_page_rejected_as_near_hint() -> Result<()> {
        let (_dir, objects, file) = single_file_store()?;
        let kept = objects.create_object(file, None, None, &[1u8; 6000])?;
        let spilled = objects.create_object(file, None, None, &[2u8; 6000])?;

        let mut dealloc = DeallocList::new();
        objects.destroy_object(file, spilled, &mut dealloc)?;
        assert_eq!(dealloc.pages().collect::<Vec<_>>(), vec![spilled.page_id]);

        let err = objects
            .create_object(file, Some(spilled), None, b"orphan")
            .unwrap_err();
        assert!(is_bad_oid(&err));

        // Nothing was written through the stale hint.
        let pages = objects.file_pages(file)?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_id, kept.page_id);
        for bucket in SpaceBucket::ALL {
            assert!(!objects
                .space_list_pages(file, bucket)?
                .contains(&spilled.page_id));
        }
        assert!(is_bad_oid(&objects.read_object(file, spilled).unwrap_err()));
        Ok(())
    }
}
