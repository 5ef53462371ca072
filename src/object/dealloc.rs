use crate::storage::page::PageId;

/// Something a destroy released that the caller must give back to the
/// allocator once it is safe to do so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeallocEntry {
    Page(PageId),
}

/// Deferred deallocations collected across object operations.
#[derive(Debug, Default)]
pub struct DeallocList {
    entries: Vec<DeallocEntry>,
}

impl DeallocList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DeallocEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.entries.iter().map(|entry| match entry {
            DeallocEntry::Page(page_id) => *page_id,
        })
    }

    pub fn drain(&mut self) -> impl Iterator<Item = DeallocEntry> + '_ {
        self.entries.drain(..)
    }
}
