pub mod lru;
pub mod replacer;

use crate::storage::error::StorageError;
use crate::storage::{PageId, PageManager, PAGE_SIZE};
use anyhow::{bail, Result};
use dashmap::DashMap;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.data.fill(0);
    }
}

/// Page cache: pins pages of one volume in memory frames.
///
/// A pin lasts as long as the returned guard; dropping the guard unpins.
/// Exclusive guards must not coexist with any other guard on the same page;
/// callers serialize conflicting pins.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: DashMap<PageId, FrameId>,
    frames: RwLock<HashMap<FrameId, Frame>>,
    replacer: Mutex<Box<dyn Replacer>>,
    page_manager: Mutex<PageManager>,
    next_frame_id: AtomicU32,
    max_frames: usize,
}

impl BufferPoolInner {
    fn unpin(&self, frame_id: FrameId) {
        let should_unpin = {
            let frames = self.frames.read();
            match frames.get(&frame_id) {
                Some(frame) => frame.pin_count.fetch_sub(1, Ordering::SeqCst) == 1,
                None => false,
            }
        };

        if should_unpin {
            self.replacer.lock().unpin(frame_id);
        }
    }
}

impl BufferPoolManager {
    pub fn new(page_manager: PageManager, replacer: Box<dyn Replacer>, max_frames: usize) -> Self {
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: DashMap::new(),
                frames: RwLock::new(HashMap::with_capacity(max_frames)),
                replacer: Mutex::new(replacer),
                page_manager: Mutex::new(page_manager),
                next_frame_id: AtomicU32::new(0),
                max_frames,
            }),
        }
    }

    /// Pins an existing page for reading.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard> {
        let (frame_id, data) = self.pin_existing(page_id)?;
        Ok(PageReadGuard {
            inner: self.inner.clone(),
            frame_id,
            data,
        })
    }

    /// Pins an existing page for mutation. Call `mark_dirty` on the guard
    /// before dropping it when the page was changed.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard> {
        let (frame_id, data) = self.pin_existing(page_id)?;
        Ok(PageWriteGuard {
            inner: self.inner.clone(),
            frame_id,
            page_id,
            data,
        })
    }

    /// Allocates a page at the end of the volume and pins it zeroed.
    pub fn new_page(&self) -> Result<(PageId, PageWriteGuard)> {
        let frame_id = self.get_frame()?;
        let allocated = self.inner.page_manager.lock().allocate_page();
        self.pin_new(frame_id, allocated)
    }

    /// Allocates a page close to `near`, honouring the extent fill factor of
    /// the requesting file, and pins it zeroed.
    pub fn new_page_near(
        &self,
        near: PageId,
        fill_factor: u16,
    ) -> Result<(PageId, PageWriteGuard)> {
        let frame_id = self.get_frame()?;
        let allocated = self
            .inner
            .page_manager
            .lock()
            .allocate_page_near(near, fill_factor);
        self.pin_new(frame_id, allocated)
    }

    /// Drops a page from the cache and hands it back to the allocator.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if let Some((_, frame_id)) = self.inner.page_table.remove(&page_id) {
            let mut frames = self.inner.frames.write();
            if let Some(frame) = frames.get_mut(&frame_id) {
                if frame.pin_count.load(Ordering::SeqCst) > 0 {
                    self.inner.page_table.insert(page_id, frame_id);
                    bail!("Cannot deallocate page {}: still pinned", page_id.0);
                }
                frame.reset();
            }
        }

        self.inner.page_manager.lock().deallocate_page(page_id)?;
        debug!("deallocated page {}", page_id.0);
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let frames = self.inner.frames.read();
        let mut page_manager = self.inner.page_manager.lock();

        for frame in frames.values() {
            if let Some(page_id) = frame.page_id {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    page_manager.write_page(page_id, frame.data.as_ref())?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }

        Ok(())
    }

    pub fn num_pages(&self) -> Result<u32> {
        self.inner.page_manager.lock().num_pages()
    }

    pub fn free_page_count(&self) -> usize {
        self.inner.page_manager.lock().free_page_count()
    }

    /// Number of outstanding pins on `page_id`, zero when not cached.
    pub fn pin_count(&self, page_id: PageId) -> u32 {
        let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) else {
            return 0;
        };
        let frames = self.inner.frames.read();
        frames
            .get(&frame_id)
            .map_or(0, |frame| frame.pin_count.load(Ordering::SeqCst))
    }

    fn pin_existing(&self, page_id: PageId) -> Result<(FrameId, *mut [u8; PAGE_SIZE])> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let mut frames = self.inner.frames.write();
            if let Some(frame) = frames.get_mut(&frame_id) {
                frame.pin_count.fetch_add(1, Ordering::SeqCst);
                self.inner.replacer.lock().pin(frame_id);
                return Ok((frame_id, frame.data.as_mut() as *mut [u8; PAGE_SIZE]));
            }
        }

        let frame_id = self.get_frame()?;
        let data = {
            let mut frames = self.inner.frames.write();
            let mut page_manager = self.inner.page_manager.lock();
            let frame = frames
                .get_mut(&frame_id)
                .ok_or(StorageError::BufferPoolFull)?;

            if let Err(e) = page_manager.read_page(page_id, frame.data.as_mut()) {
                frame.reset();
                drop(page_manager);
                drop(frames);
                self.inner.replacer.lock().unpin(frame_id);
                return Err(e);
            }
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(false, Ordering::SeqCst);
            frame.data.as_mut() as *mut [u8; PAGE_SIZE]
        };

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);
        trace!("loaded page {} into frame {}", page_id.0, frame_id);

        Ok((frame_id, data))
    }

    fn pin_new(
        &self,
        frame_id: FrameId,
        allocated: Result<PageId>,
    ) -> Result<(PageId, PageWriteGuard)> {
        let page_id = match allocated {
            Ok(page_id) => page_id,
            Err(e) => {
                self.inner.replacer.lock().unpin(frame_id);
                return Err(e);
            }
        };

        let mut frames = self.inner.frames.write();
        let frame = frames
            .get_mut(&frame_id)
            .ok_or(StorageError::BufferPoolFull)?;
        frame.reset();
        frame.page_id = Some(page_id);
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(true, Ordering::SeqCst);

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
        drop(frames);

        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                page_id,
                data,
            },
        ))
    }

    fn get_frame(&self) -> Result<FrameId> {
        {
            let frames = self.inner.frames.read();
            if frames.len() < self.inner.max_frames {
                drop(frames);
                let mut frames = self.inner.frames.write();
                // Double-check after acquiring write lock
                if frames.len() < self.inner.max_frames {
                    let frame_id = self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst);
                    frames.insert(frame_id, Frame::new());
                    return Ok(frame_id);
                }
            }
        }

        let evict_frame_id = self
            .inner
            .replacer
            .lock()
            .evict()
            .ok_or(StorageError::BufferPoolFull)?;

        let (old_page_id, is_dirty, data) = {
            let frames = self.inner.frames.read();
            match frames.get(&evict_frame_id) {
                Some(frame) => (
                    frame.page_id,
                    frame.is_dirty.load(Ordering::SeqCst),
                    frame.data.clone(),
                ),
                None => return Ok(evict_frame_id),
            }
        };

        // Flush without holding the frames lock
        if let Some(page_id) = old_page_id {
            if is_dirty {
                let mut page_manager = self.inner.page_manager.lock();
                page_manager.write_page(page_id, data.as_ref())?;
            }
            self.inner.page_table.remove(&page_id);
            trace!("evicted page {} from frame {}", page_id.0, evict_frame_id);
        }

        if let Some(frame) = self.inner.frames.write().get_mut(&evict_frame_id) {
            frame.reset();
        }

        Ok(evict_frame_id)
    }
}

pub struct PageReadGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    data: *const [u8; PAGE_SIZE],
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the frame is pinned while the guard lives, so it is neither
        // evicted nor reset and the boxed buffer does not move.
        unsafe { &*self.data }
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        self.inner.unpin(self.frame_id);
    }
}

pub struct PageWriteGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    page_id: PageId,
    data: *mut [u8; PAGE_SIZE],
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Flags the page so eviction or a flush writes it back.
    pub fn mark_dirty(&self) {
        let frames = self.inner.frames.read();
        if let Some(frame) = frames.get(&self.frame_id) {
            frame.is_dirty.store(true, Ordering::SeqCst);
        }
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        // SAFETY: see PageReadGuard::deref.
        unsafe { &*self.data }
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the pin keeps the buffer alive; exclusivity is the caller's
        // pin discipline.
        unsafe { &mut *self.data }
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        self.inner.unpin(self.frame_id);
    }
}

unsafe impl Send for PageReadGuard {}
unsafe impl Sync for PageReadGuard {}
unsafe impl Send for PageWriteGuard {}
unsafe impl Sync for PageWriteGuard {}
