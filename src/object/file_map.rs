//! The page chain of a file.
//!
//! Pages of a file form a doubly linked list through the `next_page` and
//! `prev_page` header fields. The catalog entry records both ends; the first
//! page never leaves the chain.

use crate::catalog::FileCatalogEntry;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{PageId, SlottedPage};
use crate::storage::PAGE_SIZE;
use anyhow::{bail, Result};
use std::ops::DerefMut;

/// Links `page` into the chain right after `after`.
pub fn add_page<B: DerefMut<Target = [u8; PAGE_SIZE]>>(
    buffer_pool: &BufferPoolManager,
    entry: &mut FileCatalogEntry,
    after: PageId,
    page: &mut SlottedPage<B>,
) -> Result<()> {
    let page_id = page.page_id();
    if after == page_id {
        bail!("Cannot link page {} after itself", page_id.0);
    }

    let next = {
        let mut guard = buffer_pool.fetch_page_write(after)?;
        let mut prev_page = SlottedPage::from_data(&mut guard);
        if !prev_page.is_slotted() || prev_page.file_id() != entry.file_id {
            bail!("Page {} is not part of file {}", after.0, entry.file_id);
        }
        let next = prev_page.next_page();
        prev_page.set_next_page(Some(page_id));
        guard.mark_dirty();
        next
    };

    match next {
        Some(next_id) => {
            let mut guard = buffer_pool.fetch_page_write(next_id)?;
            let mut next_page = SlottedPage::from_data(&mut guard);
            next_page.set_prev_page(Some(page_id));
            guard.mark_dirty();
        }
        None => entry.last_page = page_id,
    }

    page.set_prev_page(Some(after));
    page.set_next_page(next);
    Ok(())
}

/// Unlinks `page` from the chain and detaches it from the file.
pub fn delete_page<B: DerefMut<Target = [u8; PAGE_SIZE]>>(
    buffer_pool: &BufferPoolManager,
    entry: &mut FileCatalogEntry,
    page: &mut SlottedPage<B>,
) -> Result<()> {
    let page_id = page.page_id();
    if page_id == entry.first_page {
        bail!("The first page {} of a file cannot be unlinked", page_id.0);
    }

    let next = page.next_page();
    let Some(prev_id) = page.prev_page() else {
        bail!("Page {} has no predecessor in file {}", page_id.0, entry.file_id);
    };

    {
        let mut guard = buffer_pool.fetch_page_write(prev_id)?;
        let mut prev_page = SlottedPage::from_data(&mut guard);
        prev_page.set_next_page(next);
        guard.mark_dirty();
    }

    match next {
        Some(next_id) => {
            let mut guard = buffer_pool.fetch_page_write(next_id)?;
            let mut next_page = SlottedPage::from_data(&mut guard);
            next_page.set_prev_page(Some(prev_id));
            guard.mark_dirty();
        }
        None => entry.last_page = prev_id,
    }

    page.release();
    Ok(())
}
