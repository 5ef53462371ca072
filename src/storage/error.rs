//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors raised by the page layer when a page image fails a bounds check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Slot {slot_id} is empty")]
    EmptySlot { slot_id: u16 },

    #[error("Invalid slot ID: {slot_id} (slot count: {n_slots})")]
    InvalidSlotId { slot_id: u16, n_slots: u16 },

    #[error("Page is full: requires {required} contiguous bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("Corrupt page {page_id:?}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    #[error("Buffer pool is full: no frame can be evicted")]
    BufferPoolFull,
}

/// Result type for page-level operations.
pub type StorageResult<T> = Result<T, StorageError>;
