use crate::storage::page::PageId;
use anyhow::{bail, Context, Result};
use log::debug;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 8192;

/// Pages per extent.
pub const EXTENT_SIZE: u32 = 16;

/// Number of pages of an extent a file with `fill_factor`% may occupy.
pub fn extent_limit(fill_factor: u16) -> u32 {
    let limit = (EXTENT_SIZE * fill_factor as u32).div_ceil(100);
    limit.clamp(1, EXTENT_SIZE)
}

/// Page-granular access to a volume file, plus the page allocator.
///
/// Freed pages are remembered in memory only; after a reopen they are not
/// handed out again until the volume is rebuilt.
pub struct PageManager {
    file: File,
    free_pages: BTreeSet<PageId>,
}

impl PageManager {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create volume file: {:?}", path))?;

        Ok(Self {
            file,
            free_pages: BTreeSet::new(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open volume file: {:?}", path))?;

        Ok(Self {
            file,
            free_pages: BTreeSet::new(),
        })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            bail!(
                "Buffer size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                buf.len()
            );
        }

        let offset = Self::page_offset(page_id);
        if offset >= self.file.metadata()?.len() {
            bail!("Page {} does not exist", page_id.0);
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.read_exact(buf).context("Failed to read page")?;

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            bail!(
                "Data size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                data.len()
            );
        }

        let offset = Self::page_offset(page_id);
        if offset >= self.file.metadata()?.len() {
            self.file
                .set_len(offset + PAGE_SIZE as u64)
                .context("Failed to extend volume file")?;
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.write_all(data).context("Failed to write page")?;
        self.file.sync_data().context("Failed to sync")?;

        Ok(())
    }

    pub fn num_pages(&self) -> Result<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    /// Grants a page at the end of the volume.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let current_pages = self.num_pages()?;
        let new_page_id = PageId(current_pages);

        self.file
            .set_len((current_pages as u64 + 1) * PAGE_SIZE as u64)
            .context("Failed to extend volume file")?;

        Ok(new_page_id)
    }

    /// Grants a page close to `near` for a file with the given extent fill
    /// factor (percent).
    ///
    /// Only `fill_factor`% of the pages of an extent are handed out through
    /// this call. The closest freed page in an extent still under that limit
    /// is reused first; otherwise the volume grows, skipping to the next
    /// extent when the last one is already filled to the limit. Skipped pages
    /// are recorded as free.
    pub fn allocate_page_near(&mut self, near: PageId, fill_factor: u16) -> Result<PageId> {
        let limit = extent_limit(fill_factor);

        let mut candidates: Vec<PageId> = self.free_pages.iter().copied().collect();
        candidates.sort_by_key(|p| (p.0.abs_diff(near.0), p.0 > near.0));
        for page_id in candidates {
            if self.pages_in_use(page_id.0 / EXTENT_SIZE)? < limit {
                self.free_pages.remove(&page_id);
                debug!("reusing freed page {} near page {}", page_id.0, near.0);
                return Ok(page_id);
            }
        }

        let num_pages = self.num_pages()?;
        let extent = num_pages / EXTENT_SIZE;
        if num_pages % EXTENT_SIZE != 0 && self.pages_in_use(extent)? >= limit {
            let next_extent_start = (extent + 1) * EXTENT_SIZE;
            for skipped in num_pages..next_extent_start {
                self.free_pages.insert(PageId(skipped));
            }
            self.file
                .set_len((next_extent_start as u64 + 1) * PAGE_SIZE as u64)
                .context("Failed to extend volume file")?;
            debug!(
                "extent {} filled to {}%, starting extent at page {}",
                extent, fill_factor, next_extent_start
            );
            return Ok(PageId(next_extent_start));
        }

        self.allocate_page()
    }

    /// Returns a page to the allocator.
    pub fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        if page_id.0 >= self.num_pages()? {
            bail!("Cannot deallocate page {}: beyond end of volume", page_id.0);
        }
        if !self.free_pages.insert(page_id) {
            bail!("Page {} is already deallocated", page_id.0);
        }
        Ok(())
    }

    pub fn free_page_count(&self) -> usize {
        self.free_pages.len()
    }

    /// Pages of `extent` that are allocated and not freed.
    fn pages_in_use(&self, extent: u32) -> Result<u32> {
        let start = extent * EXTENT_SIZE;
        let end = ((extent + 1) * EXTENT_SIZE).min(self.num_pages()?);
        if end <= start {
            return Ok(0);
        }
        let freed = self.free_pages.range(PageId(start)..PageId(end)).count() as u32;
        Ok(end - start - freed)
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}
