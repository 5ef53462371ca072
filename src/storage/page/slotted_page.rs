//! Slotted page format for objects.
//!
//! ```text
//! +----------------------+ 0
//! |    Page Header       |  40 bytes
//! +----------------------+ HEADER_SIZE
//! |    Object Data       |  grows upward, offsets relative to HEADER_SIZE
//! |     [object 0]       |
//! |     [object 2]       |
//! |        ...           |  <- free (high-water mark)
//! +----------------------+
//! |    Free Space        |
//! +----------------------+
//! |      [slot 1]        |  8 bytes per slot, grows downward
//! |      [slot 0]        |
//! +----------------------+ PAGE_SIZE
//! ```
//!
//! Destroyed objects below the high-water mark become holes; their bytes are
//! only counted in `unused` until the page is compacted.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, VolumeId};
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::ops::{Deref, DerefMut, Range};

// Header structure (40 bytes)
pub const HEADER_SIZE: usize = 40;
const PAGE_NO_OFFSET: usize = 0;
const VOLUME_OFFSET: usize = 4;
const PAGE_TYPE_OFFSET: usize = 6;
const SPACE_LIST_OFFSET: usize = 7;
const FILE_ID_OFFSET: usize = 8;
const NEXT_PAGE_OFFSET: usize = 12;
const PREV_PAGE_OFFSET: usize = 16;
const SPACE_NEXT_OFFSET: usize = 20;
const SPACE_PREV_OFFSET: usize = 24;
const N_SLOTS_OFFSET: usize = 28;
const FREE_OFFSET: usize = 30;
const UNUSED_OFFSET: usize = 32;

pub const SLOTTED_PAGE_TYPE: u8 = 1;
/// Page type of a page unlinked from its file and awaiting deallocation.
pub const RELEASED_PAGE_TYPE: u8 = 0;
const NO_SPACE_LIST: u8 = 0xFF;

// Slot size (8 bytes: 2 offset, 2 reserved, 4 uniquifier)
pub const SLOT_SIZE: usize = 8;
pub const EMPTY_SLOT: u16 = 0xFFFF;

// Object header size (8 bytes: 2 properties, 2 tag, 4 length)
pub const OBJECT_HEADER_SIZE: usize = 8;
pub const ALIGNMENT: usize = 4;

pub const DATA_AREA_SIZE: usize = PAGE_SIZE - HEADER_SIZE;

/// Largest aligned payload that can be stored on a slotted page.
pub const LARGE_OBJECT_THRESHOLD: usize = DATA_AREA_SIZE - OBJECT_HEADER_SIZE - SLOT_SIZE;

/// Rounds a payload length up to the addressing granularity.
pub const fn aligned_length(length: usize) -> usize {
    (length + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Bytes an object with `length` payload bytes occupies in the data area.
pub const fn object_footprint(length: usize) -> usize {
    OBJECT_HEADER_SIZE + aligned_length(length)
}

/// Bytes of page space a new object needs, counting a fresh slot.
pub const fn needed_space(length: usize) -> usize {
    object_footprint(length) + SLOT_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectHeader {
    pub properties: u16,
    pub tag: u16,
    pub length: u32,
}

impl ObjectHeader {
    pub fn new(properties: u16, tag: u16) -> Self {
        Self {
            properties,
            tag,
            length: 0,
        }
    }

    fn read_from(bytes: &[u8]) -> Self {
        Self {
            properties: LittleEndian::read_u16(&bytes[0..2]),
            tag: LittleEndian::read_u16(&bytes[2..4]),
            length: LittleEndian::read_u32(&bytes[4..8]),
        }
    }

    fn write_to(&self, bytes: &mut [u8]) {
        LittleEndian::write_u16(&mut bytes[0..2], self.properties);
        LittleEndian::write_u16(&mut bytes[2..4], self.tag);
        LittleEndian::write_u32(&mut bytes[4..8], self.length);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u16,
    pub unique: u32,
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.offset == EMPTY_SLOT
    }

    fn read_from(data: &[u8; PAGE_SIZE], slot_id: u16) -> Self {
        let pos = slot_position(slot_id);
        Self {
            offset: LittleEndian::read_u16(&data[pos..pos + 2]),
            unique: LittleEndian::read_u32(&data[pos + 4..pos + 8]),
        }
    }

    fn write_to(&self, data: &mut [u8; PAGE_SIZE], slot_id: u16) {
        let pos = slot_position(slot_id);
        LittleEndian::write_u16(&mut data[pos..pos + 2], self.offset);
        LittleEndian::write_u16(&mut data[pos + 2..pos + 4], 0);
        LittleEndian::write_u32(&mut data[pos + 4..pos + 8], self.unique);
    }
}

fn slot_position(slot_id: u16) -> usize {
    PAGE_SIZE - (slot_id as usize + 1) * SLOT_SIZE
}

pub struct SlottedPage<B> {
    data: B,
}

impl<'a> SlottedPage<&'a mut [u8; PAGE_SIZE]> {
    /// Formats `data` as an empty slotted page owned by `file_id`.
    pub fn new(
        data: &'a mut [u8; PAGE_SIZE],
        page_id: PageId,
        volume: VolumeId,
        file_id: u32,
    ) -> Self {
        data[..HEADER_SIZE].fill(0);
        let mut page = Self { data };
        page.write_u32(PAGE_NO_OFFSET, page_id.0);
        page.write_u16(VOLUME_OFFSET, volume.0);
        page.data[PAGE_TYPE_OFFSET] = SLOTTED_PAGE_TYPE;
        page.data[SPACE_LIST_OFFSET] = NO_SPACE_LIST;
        page.write_u32(FILE_ID_OFFSET, file_id);
        page.set_next_page(None);
        page.set_prev_page(None);
        page.set_space_next(None);
        page.set_space_prev(None);
        page
    }

    pub fn from_data(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }
}

impl<'a> SlottedPage<&'a [u8; PAGE_SIZE]> {
    /// Read-only view over a page image.
    pub fn view(data: &'a [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }
}

impl<B: Deref<Target = [u8; PAGE_SIZE]>> SlottedPage<B> {
    fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn read_u16(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.bytes()[offset..offset + 2])
    }

    fn read_u32(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.bytes()[offset..offset + 4])
    }

    pub fn page_id(&self) -> PageId {
        PageId(self.read_u32(PAGE_NO_OFFSET))
    }

    pub fn volume(&self) -> VolumeId {
        VolumeId(self.read_u16(VOLUME_OFFSET))
    }

    pub fn is_slotted(&self) -> bool {
        self.bytes()[PAGE_TYPE_OFFSET] == SLOTTED_PAGE_TYPE
    }

    pub fn file_id(&self) -> u32 {
        self.read_u32(FILE_ID_OFFSET)
    }

    pub fn next_page(&self) -> Option<PageId> {
        PageId::from_raw(self.read_u32(NEXT_PAGE_OFFSET))
    }

    pub fn prev_page(&self) -> Option<PageId> {
        PageId::from_raw(self.read_u32(PREV_PAGE_OFFSET))
    }

    pub fn space_next(&self) -> Option<PageId> {
        PageId::from_raw(self.read_u32(SPACE_NEXT_OFFSET))
    }

    pub fn space_prev(&self) -> Option<PageId> {
        PageId::from_raw(self.read_u32(SPACE_PREV_OFFSET))
    }

    /// Index of the free-space bucket this page is threaded on, if any.
    pub fn space_list(&self) -> Option<u8> {
        match self.bytes()[SPACE_LIST_OFFSET] {
            NO_SPACE_LIST => None,
            index => Some(index),
        }
    }

    pub fn n_slots(&self) -> u16 {
        self.read_u16(N_SLOTS_OFFSET)
    }

    /// First free byte after the highest-addressed object.
    pub fn free(&self) -> u16 {
        self.read_u16(FREE_OFFSET)
    }

    /// Bytes sitting in holes below `free`.
    pub fn unused(&self) -> u16 {
        self.read_u16(UNUSED_OFFSET)
    }

    fn slot_array_size(&self) -> usize {
        self.n_slots() as usize * SLOT_SIZE
    }

    /// Free bytes in one run between the data area and the slot array.
    pub fn contiguous_free(&self) -> usize {
        DATA_AREA_SIZE.saturating_sub(self.free() as usize + self.slot_array_size())
    }

    pub fn total_free(&self) -> usize {
        self.contiguous_free() + self.unused() as usize
    }

    pub fn slot(&self, slot_id: u16) -> StorageResult<Slot> {
        let n_slots = self.n_slots();
        if slot_id >= n_slots {
            return Err(StorageError::InvalidSlotId { slot_id, n_slots });
        }
        Ok(Slot::read_from(self.bytes(), slot_id))
    }

    pub fn occupied_slot(&self, slot_id: u16) -> StorageResult<Slot> {
        let slot = self.slot(slot_id)?;
        if slot.is_empty() {
            return Err(StorageError::EmptySlot { slot_id });
        }
        Ok(slot)
    }

    fn corrupt(&self, reason: String) -> StorageError {
        StorageError::CorruptPage {
            page_id: self.page_id(),
            reason,
        }
    }

    /// Absolute byte range of `len` bytes at data-area `offset`, checked
    /// against the header-declared bounds.
    fn data_range(&self, offset: u16, len: usize) -> StorageResult<Range<usize>> {
        let free = self.free() as usize;
        if HEADER_SIZE + free > PAGE_SIZE - self.slot_array_size() {
            return Err(self.corrupt(format!("free offset {} overlaps slot array", free)));
        }
        let end = offset as usize + len;
        if end > free {
            return Err(self.corrupt(format!(
                "object at {}..{} extends past free offset {}",
                offset, end, free
            )));
        }
        Ok(HEADER_SIZE + offset as usize..HEADER_SIZE + end)
    }

    fn header_at(&self, offset: u16) -> StorageResult<ObjectHeader> {
        let range = self.data_range(offset, OBJECT_HEADER_SIZE)?;
        let header = ObjectHeader::read_from(&self.bytes()[range]);
        self.data_range(offset, object_footprint(header.length as usize))?;
        Ok(header)
    }

    pub fn object_header(&self, slot_id: u16) -> StorageResult<ObjectHeader> {
        let slot = self.occupied_slot(slot_id)?;
        self.header_at(slot.offset)
    }

    pub fn object_data(&self, slot_id: u16) -> StorageResult<&[u8]> {
        let slot = self.occupied_slot(slot_id)?;
        let header = self.header_at(slot.offset)?;
        let start = slot.offset as usize + OBJECT_HEADER_SIZE;
        let range = self.data_range(start as u16, header.length as usize)?;
        Ok(&self.bytes()[range])
    }

    pub fn live_objects(&self) -> usize {
        (0..self.n_slots())
            .filter(|&i| !Slot::read_from(self.bytes(), i).is_empty())
            .count()
    }

    /// First occupied slot after `after`, or from slot 0 when `None`.
    pub fn next_occupied(&self, after: Option<u16>) -> Option<u16> {
        let start = after.map_or(0, |s| s as u32 + 1);
        (start..self.n_slots() as u32)
            .map(|i| i as u16)
            .find(|&i| !Slot::read_from(self.bytes(), i).is_empty())
    }

    /// Last occupied slot before `before`, or the last occupied slot when `None`.
    pub fn prev_occupied(&self, before: Option<u16>) -> Option<u16> {
        let end = before.map_or(self.n_slots(), |s| s.min(self.n_slots()));
        (0..end)
            .rev()
            .find(|&i| !Slot::read_from(self.bytes(), i).is_empty())
    }
}

impl<B: DerefMut<Target = [u8; PAGE_SIZE]>> SlottedPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.bytes_mut()[offset..offset + 2], value);
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.bytes_mut()[offset..offset + 4], value);
    }

    pub fn set_next_page(&mut self, page_id: Option<PageId>) {
        self.write_u32(NEXT_PAGE_OFFSET, PageId::to_raw(page_id));
    }

    pub fn set_prev_page(&mut self, page_id: Option<PageId>) {
        self.write_u32(PREV_PAGE_OFFSET, PageId::to_raw(page_id));
    }

    pub fn set_space_next(&mut self, page_id: Option<PageId>) {
        self.write_u32(SPACE_NEXT_OFFSET, PageId::to_raw(page_id));
    }

    pub fn set_space_prev(&mut self, page_id: Option<PageId>) {
        self.write_u32(SPACE_PREV_OFFSET, PageId::to_raw(page_id));
    }

    pub fn set_space_list(&mut self, index: Option<u8>) {
        self.bytes_mut()[SPACE_LIST_OFFSET] = index.unwrap_or(NO_SPACE_LIST);
    }

    /// Detaches the page from its file. It stops being a slotted page of any
    /// file until it is formatted again.
    pub fn release(&mut self) {
        self.bytes_mut()[PAGE_TYPE_OFFSET] = RELEASED_PAGE_TYPE;
        self.write_u32(FILE_ID_OFFSET, 0);
        self.set_space_list(None);
        self.set_next_page(None);
        self.set_prev_page(None);
        self.set_space_next(None);
        self.set_space_prev(None);
    }

    fn set_n_slots(&mut self, n_slots: u16) {
        self.write_u16(N_SLOTS_OFFSET, n_slots);
    }

    fn set_free(&mut self, free: u16) {
        self.write_u16(FREE_OFFSET, free);
    }

    fn set_unused(&mut self, unused: u16) {
        self.write_u16(UNUSED_OFFSET, unused);
    }

    /// Writes an object at the high-water mark and binds it to the lowest
    /// empty slot, appending a slot when none is empty.
    pub fn insert_object(
        &mut self,
        header: &ObjectHeader,
        payload: &[u8],
        unique: u32,
    ) -> StorageResult<u16> {
        let n_slots = self.n_slots();
        let slot_id = (0..n_slots)
            .find(|&i| Slot::read_from(self.bytes(), i).is_empty())
            .unwrap_or(n_slots);
        let appending = slot_id == n_slots;

        let footprint = object_footprint(payload.len());
        let required = footprint + if appending { SLOT_SIZE } else { 0 };
        let available = self.contiguous_free();
        if available < required {
            return Err(StorageError::PageFull {
                required,
                available,
            });
        }

        let offset = self.free();
        let start = HEADER_SIZE + offset as usize;
        let header = ObjectHeader {
            length: payload.len() as u32,
            ..*header
        };
        header.write_to(&mut self.bytes_mut()[start..start + OBJECT_HEADER_SIZE]);
        let payload_start = start + OBJECT_HEADER_SIZE;
        self.bytes_mut()[payload_start..payload_start + payload.len()].copy_from_slice(payload);
        self.bytes_mut()[payload_start + payload.len()..start + footprint].fill(0);

        if appending {
            self.set_n_slots(n_slots + 1);
        }
        Slot { offset, unique }.write_to(self.bytes_mut(), slot_id);
        self.set_free(offset + footprint as u16);

        Ok(slot_id)
    }

    /// Empties `slot_id` and accounts for the released bytes. Returns the
    /// footprint of the removed object.
    pub fn remove_object(&mut self, slot_id: u16) -> StorageResult<usize> {
        let slot = self.occupied_slot(slot_id)?;
        let header = self.header_at(slot.offset)?;
        let footprint = object_footprint(header.length as usize);

        Slot {
            offset: EMPTY_SLOT,
            unique: slot.unique,
        }
        .write_to(self.bytes_mut(), slot_id);

        let mut n_slots = self.n_slots();
        while n_slots > 0 && Slot::read_from(self.bytes(), n_slots - 1).is_empty() {
            n_slots -= 1;
        }
        self.set_n_slots(n_slots);

        if slot.offset as usize + footprint == self.free() as usize {
            self.set_free(slot.offset);
        } else {
            self.set_unused(self.unused() + footprint as u16);
        }

        if n_slots == 0 {
            self.set_free(0);
            self.set_unused(0);
        }

        Ok(footprint)
    }

    /// Moves every live object to the front of the data area in slot order.
    /// The object of `excluded`, when occupied, is moved last so it ends at
    /// the new high-water mark.
    pub fn compact(&mut self, excluded: Option<u16>) -> StorageResult<()> {
        let n_slots = self.n_slots();
        let mut plan = Vec::with_capacity(n_slots as usize);
        let mut last = None;
        for slot_id in 0..n_slots {
            let slot = Slot::read_from(self.bytes(), slot_id);
            if slot.is_empty() {
                continue;
            }
            let header = self.header_at(slot.offset)?;
            let entry = (slot_id, slot, object_footprint(header.length as usize));
            if Some(slot_id) == excluded {
                last = Some(entry);
            } else {
                plan.push(entry);
            }
        }
        plan.extend(last);

        let snapshot: Box<[u8; PAGE_SIZE]> = Box::new(*self.bytes());
        let mut cursor = 0usize;
        for (slot_id, slot, footprint) in plan {
            let src = HEADER_SIZE + slot.offset as usize;
            let dst = HEADER_SIZE + cursor;
            self.bytes_mut()[dst..dst + footprint].copy_from_slice(&snapshot[src..src + footprint]);
            Slot {
                offset: cursor as u16,
                unique: slot.unique,
            }
            .write_to(self.bytes_mut(), slot_id);
            cursor += footprint;
        }

        self.set_unused(0);
        self.set_free(cursor as u16);
        Ok(())
    }
}
