//! Available-space lists.
//!
//! Each file keeps five doubly linked lists of its pages, bucketed by total
//! free space: at least 50%, 40%, 30%, 20% or 10% of a page. A page with
//! less than 10% free is in no list. The list heads live in the catalog
//! entry; the links and the list index live in each page header.

use crate::catalog::FileCatalogEntry;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::SlottedPage;
use crate::storage::PAGE_SIZE;
use anyhow::{bail, Result};
use log::trace;
use std::ops::DerefMut;

pub const SPACE_LIST_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SpaceBucket {
    Free50 = 0,
    Free40 = 1,
    Free30 = 2,
    Free20 = 3,
    Free10 = 4,
}

impl SpaceBucket {
    /// Buckets from the loosest guarantee to the tightest.
    pub const ALL: [SpaceBucket; SPACE_LIST_COUNT] = [
        SpaceBucket::Free50,
        SpaceBucket::Free40,
        SpaceBucket::Free30,
        SpaceBucket::Free20,
        SpaceBucket::Free10,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn percent(self) -> usize {
        50 - 10 * self.index()
    }

    /// Free bytes every page of this bucket is known to have.
    pub fn guaranteed(self) -> usize {
        PAGE_SIZE * self.percent() / 100
    }

    /// Bucket a page with `total_free` bytes belongs to.
    pub fn for_free_space(total_free: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|bucket| total_free >= bucket.guaranteed())
    }

    /// Tightest bucket whose guarantee covers `needed` bytes.
    pub fn select(needed: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .rev()
            .find(|bucket| bucket.guaranteed() >= needed)
    }

    /// Buckets worth probing for `needed` bytes, tightest first. Requests
    /// beyond every guarantee still probe the 50% bucket, whose head has to
    /// be checked against the actual free space.
    pub fn candidates(needed: usize) -> Vec<SpaceBucket> {
        match Self::select(needed) {
            Some(bucket) => Self::ALL[..=bucket.index()].iter().rev().copied().collect(),
            None => vec![SpaceBucket::Free50],
        }
    }
}

/// Unlinks `page` from whichever list it is on. A page on no list is left
/// untouched.
pub fn remove_from_list<B: DerefMut<Target = [u8; PAGE_SIZE]>>(
    buffer_pool: &BufferPoolManager,
    entry: &mut FileCatalogEntry,
    page: &mut SlottedPage<B>,
) -> Result<()> {
    let Some(index) = page.space_list() else {
        return Ok(());
    };
    let Some(bucket) = SpaceBucket::from_index(index) else {
        bail!("Page {} is on unknown space list {}", page.page_id().0, index);
    };

    let page_id = page.page_id();
    let prev = page.space_prev();
    let next = page.space_next();
    if prev == Some(page_id) || next == Some(page_id) {
        bail!("Space list of page {} links to itself", page_id.0);
    }

    match prev {
        Some(prev_id) => {
            let mut guard = buffer_pool.fetch_page_write(prev_id)?;
            let mut prev_page = SlottedPage::from_data(&mut guard);
            prev_page.set_space_next(next);
            guard.mark_dirty();
        }
        None => {
            if entry.space_lists[bucket.index()] != Some(page_id) {
                bail!(
                    "Page {} has no predecessor but is not the head of {:?}",
                    page_id.0,
                    bucket
                );
            }
            entry.space_lists[bucket.index()] = next;
        }
    }

    if let Some(next_id) = next {
        let mut guard = buffer_pool.fetch_page_write(next_id)?;
        let mut next_page = SlottedPage::from_data(&mut guard);
        next_page.set_space_prev(prev);
        guard.mark_dirty();
    }

    page.set_space_list(None);
    page.set_space_prev(None);
    page.set_space_next(None);
    trace!("page {} left {:?}", page_id.0, bucket);
    Ok(())
}

/// Pushes `page` onto the head of the list matching its total free space.
/// Returns the chosen bucket, or `None` when the page is too full for any.
pub fn put_in_list<B: DerefMut<Target = [u8; PAGE_SIZE]>>(
    buffer_pool: &BufferPoolManager,
    entry: &mut FileCatalogEntry,
    page: &mut SlottedPage<B>,
) -> Result<Option<SpaceBucket>> {
    if page.space_list().is_some() {
        remove_from_list(buffer_pool, entry, page)?;
    }

    let Some(bucket) = SpaceBucket::for_free_space(page.total_free()) else {
        return Ok(None);
    };

    let page_id = page.page_id();
    let head = entry.space_lists[bucket.index()];
    if let Some(head_id) = head {
        if head_id == page_id {
            bail!("Page {} is already the head of {:?}", page_id.0, bucket);
        }
        let mut guard = buffer_pool.fetch_page_write(head_id)?;
        let mut head_page = SlottedPage::from_data(&mut guard);
        head_page.set_space_prev(Some(page_id));
        guard.mark_dirty();
    }

    page.set_space_next(head);
    page.set_space_prev(None);
    page.set_space_list(Some(bucket.index() as u8));
    entry.space_lists[bucket.index()] = Some(page_id);
    trace!(
        "page {} joined {:?} with {} bytes free",
        page_id.0,
        bucket,
        page.total_free()
    );
    Ok(Some(bucket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::disk::PageManager;
    use crate::storage::page::{ObjectHeader, PageId, VolumeId};
    use tempfile::tempdir;

    fn empty_entry(first_page: PageId) -> FileCatalogEntry {
        FileCatalogEntry {
            file_id: 1,
            volume: VolumeId(1),
            fill_factor: 100,
            first_page,
            last_page: first_page,
            space_lists: [None; SPACE_LIST_COUNT],
        }
    }

    #[test]
    fn test_bucket_bands() {
        assert_eq!(SpaceBucket::Free50.guaranteed(), 4096);
        assert_eq!(SpaceBucket::Free10.guaranteed(), 819);

        assert_eq!(SpaceBucket::for_free_space(8152), Some(SpaceBucket::Free50));
        assert_eq!(SpaceBucket::for_free_space(4095), Some(SpaceBucket::Free40));
        assert_eq!(SpaceBucket::for_free_space(819), Some(SpaceBucket::Free10));
        assert_eq!(SpaceBucket::for_free_space(818), None);
    }

    #[test]
    fn test_select_picks_tightest_guarantee() {
        assert_eq!(SpaceBucket::select(16), Some(SpaceBucket::Free10));
        assert_eq!(SpaceBucket::select(820), Some(SpaceBucket::Free20));
        assert_eq!(SpaceBucket::select(4096), Some(SpaceBucket::Free50));
        assert_eq!(SpaceBucket::select(4097), None);

        assert_eq!(
            SpaceBucket::candidates(2000),
            vec![
                SpaceBucket::Free30,
                SpaceBucket::Free40,
                SpaceBucket::Free50
            ]
        );
        assert_eq!(SpaceBucket::candidates(6000), vec![SpaceBucket::Free50]);
    }

    #[test]
    fn test_put_and_remove_keep_links_consistent() -> Result<()> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let buffer_pool = BufferPoolManager::new(page_manager, Box::new(LruReplacer::new(8)), 8);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (page_id, mut guard) = buffer_pool.new_page()?;
            SlottedPage::new(&mut guard, page_id, VolumeId(1), 1);
            guard.mark_dirty();
            ids.push(page_id);
        }
        let mut entry = empty_entry(ids[0]);

        for &page_id in &ids {
            let mut guard = buffer_pool.fetch_page_write(page_id)?;
            let mut page = SlottedPage::from_data(&mut guard);
            assert_eq!(
                put_in_list(&buffer_pool, &mut entry, &mut page)?,
                Some(SpaceBucket::Free50)
            );
            guard.mark_dirty();
        }
        // Pushed at the head: ids[2] -> ids[1] -> ids[0]
        assert_eq!(entry.space_lists[0], Some(ids[2]));

        {
            let mut guard = buffer_pool.fetch_page_write(ids[1])?;
            let mut page = SlottedPage::from_data(&mut guard);
            remove_from_list(&buffer_pool, &mut entry, &mut page)?;
            assert_eq!(page.space_list(), None);
            guard.mark_dirty();
        }

        let head = buffer_pool.fetch_page(ids[2])?;
        assert_eq!(SlottedPage::view(&head).space_next(), Some(ids[0]));
        let tail = buffer_pool.fetch_page(ids[0])?;
        assert_eq!(SlottedPage::view(&tail).space_prev(), Some(ids[2]));
        drop(head);
        drop(tail);

        {
            let mut guard = buffer_pool.fetch_page_write(ids[2])?;
            let mut page = SlottedPage::from_data(&mut guard);
            remove_from_list(&buffer_pool, &mut entry, &mut page)?;
            guard.mark_dirty();
        }
        assert_eq!(entry.space_lists[0], Some(ids[0]));
        Ok(())
    }

    #[test]
    fn test_full_page_joins_no_list() -> Result<()> {
        let dir = tempdir()?;
        let page_manager = PageManager::create(&dir.path().join("test.db"))?;
        let buffer_pool = BufferPoolManager::new(page_manager, Box::new(LruReplacer::new(4)), 4);

        let (page_id, mut guard) = buffer_pool.new_page()?;
        let mut page = SlottedPage::new(&mut guard, page_id, VolumeId(1), 1);
        page.insert_object(&ObjectHeader::default(), &[7u8; 7500], 1)?;

        let mut entry = empty_entry(page_id);
        assert_eq!(put_in_list(&buffer_pool, &mut entry, &mut page)?, None);
        assert_eq!(page.space_list(), None);
        assert!(entry.space_lists.iter().all(Option::is_none));
        Ok(())
    }
}
