//! Identifiers and compile-time constants shared across the storage
//! layers.

use bytemuck::{Pod, Zeroable};

/// Size in bytes of one page, the unit of disk I/O and caching.
pub const PAGE_SIZE: usize = 4096;

/// Capacity of one bucket in the page-table hash directory.
pub const BUCKET_SIZE: usize = 64;

/// Identifier of a page on disk.
///
/// Page ids are stored inside page bodies (parent and sibling links), so
/// the type is plain-old-data with `-1` reserved as the "no page"
/// sentinel rather than an `Option` wrapper.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct PageId(pub i32);

pub const INVALID_PAGE_ID: PageId = PageId(-1);

unsafe impl Zeroable for PageId {}
unsafe impl Pod for PageId {}

impl PageId {
    pub fn is_valid(self) -> bool {
        self != INVALID_PAGE_ID
    }
}

/// Index of a frame slot inside the buffer pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FrameId(pub usize);

/// Log sequence number stamped into page headers.
pub type Lsn = u32;

/// Locator of a record stored outside the index: owning page plus slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

unsafe impl Zeroable for Rid {}
unsafe impl Pod for Rid {}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Rid { page_id, slot_num }
    }
}
