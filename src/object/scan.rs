//! Object navigation in file order.
//!
//! File order is page-chain order, then slot order within a page. Empty
//! slots and pages without live objects are skipped in both directions.

use crate::catalog::{self, CatalogPage, CatalogRef, FileCatalogEntry};
use crate::object::error::ObjectError;
use crate::object::id::ObjectId;
use crate::object::manager::{belongs_to_file, check_file_page, ObjectManager};
use crate::storage::page::{ObjectHeader, SlottedPage};
use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl ObjectManager {
    /// The object after `current`, or the first object of the file when
    /// `current` is `None`. `Ok(None)` marks the end of the file.
    ///
    /// `current` only has to name a page of the file; its slot may have been
    /// emptied since it was returned.
    pub fn next_object(
        &self,
        catalog: CatalogRef,
        current: Option<ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        self.step(catalog, current, ScanDirection::Forward)
    }

    /// The object before `current`, or the last object of the file when
    /// `current` is `None`. `Ok(None)` marks the start of the file.
    pub fn prev_object(
        &self,
        catalog: CatalogRef,
        current: Option<ObjectId>,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        self.step(catalog, current, ScanDirection::Backward)
    }

    pub fn scan(&self, catalog: CatalogRef, direction: ScanDirection) -> ObjectScanner {
        ObjectScanner::new(self.clone(), catalog, direction)
    }

    fn step(
        &self,
        catalog: CatalogRef,
        current: Option<ObjectId>,
        direction: ScanDirection,
    ) -> Result<Option<(ObjectId, ObjectHeader)>> {
        let cat_guard = catalog::pin_catalog_read(&self.buffer_pool, catalog)?;
        let entry = CatalogPage::view(&cat_guard).entry(catalog.entry)?;

        let (mut page_id, mut position) = match current {
            None => {
                let start = match direction {
                    ScanDirection::Forward => entry.first_page,
                    ScanDirection::Backward => entry.last_page,
                };
                (Some(start), None)
            }
            Some(cur) => {
                self.check_oid_target(&entry, catalog, cur)?;
                self.check_current_page(&entry, cur)?;
                (Some(cur.page_id), Some(cur.slot))
            }
        };

        let mut remaining = self.buffer_pool.num_pages()?;
        while let Some(pid) = page_id {
            if remaining == 0 {
                bail!("Page chain of file {} does not terminate", entry.file_id);
            }
            remaining -= 1;

            let guard = self.buffer_pool.fetch_page(pid)?;
            let page = SlottedPage::view(&guard);
            check_file_page(&page, &entry)?;

            let found = match direction {
                ScanDirection::Forward => page.next_occupied(position),
                ScanDirection::Backward => page.prev_occupied(position),
            };
            if let Some(slot_id) = found {
                let slot = page.slot(slot_id)?;
                let header = page.object_header(slot_id)?;
                let oid = ObjectId::new(entry.volume, pid, slot_id, slot.unique);
                return Ok(Some((oid, header)));
            }

            page_id = match direction {
                ScanDirection::Forward => page.next_page(),
                ScanDirection::Backward => page.prev_page(),
            };
            position = None;
        }
        Ok(None)
    }

    fn check_current_page(&self, entry: &FileCatalogEntry, cur: ObjectId) -> Result<()> {
        let guard = self.buffer_pool.fetch_page(cur.page_id)?;
        let page = SlottedPage::view(&guard);
        if !belongs_to_file(&page, entry) {
            return Err(ObjectError::bad_oid(
                cur,
                format!("page is not a page of file {}", entry.file_id),
            )
            .into());
        }
        Ok(())
    }
}

/// Iterator over the objects of one file.
///
/// Each step is an independent navigation call, so objects destroyed behind
/// the cursor do not disturb the scan.
pub struct ObjectScanner {
    objects: ObjectManager,
    catalog: CatalogRef,
    direction: ScanDirection,
    current: Option<ObjectId>,
    finished: bool,
}

impl ObjectScanner {
    pub fn new(objects: ObjectManager, catalog: CatalogRef, direction: ScanDirection) -> Self {
        Self {
            objects,
            catalog,
            direction,
            current: None,
            finished: false,
        }
    }
}

impl Iterator for ObjectScanner {
    type Item = Result<(ObjectId, ObjectHeader)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let step = match self.direction {
            ScanDirection::Forward => self.objects.next_object(self.catalog, self.current),
            ScanDirection::Backward => self.objects.prev_object(self.catalog, self.current),
        };
        match step {
            Ok(Some((oid, header))) => {
                self.current = Some(oid);
                Some(Ok((oid, header)))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
