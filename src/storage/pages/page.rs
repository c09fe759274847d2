use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLock};

use crate::common::{Lsn, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Byte offset of the LSN field inside every index-page header.
const LSN_OFFSET: usize = 4;

/// One page worth of bytes. The alignment lets typed header and entry
/// views be cast straight out of the buffer.
#[repr(align(8))]
pub struct PageData(pub [u8; PAGE_SIZE]);

impl PageData {
    pub fn zeroed() -> Self {
        PageData([0u8; PAGE_SIZE])
    }
}

impl Deref for PageData {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PageData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Shared handle to a frame's byte buffer. Callers holding a pin lock
/// it for reading or writing; the buffer pool itself only touches it
/// during I/O on unpinned frames.
pub type PageRef = Arc<RwLock<PageData>>;

/// A buffer pool frame: one page-sized buffer plus residency metadata.
/// A frame holds no page while `page_id` is the invalid sentinel.
pub struct Page {
    data: PageRef,
    page_id: PageId,
    pin_count: usize,
    is_dirty: bool,
}

impl Page {
    pub fn new() -> Self {
        Page {
            data: Arc::new(RwLock::new(PageData::zeroed())),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }

    pub fn data(&self) -> PageRef {
        Arc::clone(&self.data)
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count
    }

    pub fn set_pin_count(&mut self, pin_count: usize) {
        self.pin_count = pin_count;
    }

    pub fn increase_pin_count(&mut self) {
        self.pin_count += 1;
    }

    pub fn decrease_pin_count(&mut self) {
        debug_assert!(self.pin_count > 0);
        self.pin_count -= 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn set_dirty(&mut self, is_dirty: bool) {
        self.is_dirty = is_dirty;
    }

    /// LSN of the resident page, read from the fixed header offset.
    pub fn lsn(&self) -> Lsn {
        let data = self.data.read().unwrap();
        bytemuck::pod_read_unaligned(&data.0[LSN_OFFSET..LSN_OFFSET + 4])
    }

    pub fn reset_data(&mut self) {
        self.data.write().unwrap().0.fill(0);
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}
