pub mod slotted_page;

use serde::{Deserialize, Serialize};

/// Page number within a volume file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

/// Volume number stamped on every page and object id of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId(pub u16);

/// On-disk encoding of "no page" in link fields.
pub const NIL_PAGE: u32 = u32::MAX;

impl PageId {
    pub(crate) fn from_raw(raw: u32) -> Option<PageId> {
        (raw != NIL_PAGE).then_some(PageId(raw))
    }

    pub(crate) fn to_raw(page_id: Option<PageId>) -> u32 {
        page_id.map_or(NIL_PAGE, |p| p.0)
    }
}

pub use slotted_page::{ObjectHeader, Slot, SlottedPage};
