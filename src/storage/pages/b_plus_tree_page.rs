//! Header shared by internal and leaf index pages, plus the comparator
//! seam the node operations order keys with.

use std::cmp::Ordering;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::buffer::lru_replacer::Replacer;
use crate::common::{FrameId, Lsn, PageId};
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::pages::page::PageData;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IndexPageKind {
    Invalid,
    Internal,
    Leaf,
}

/// On-page header, field order fixed: `page_type, lsn, size, max_size,
/// parent_page_id, page_id`, all four bytes. Leaf pages extend it with
/// their sibling link.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct IndexPageHeader {
    page_type: u32,
    lsn: Lsn,
    size: u32,
    max_size: u32,
    parent_page_id: PageId,
    page_id: PageId,
}

unsafe impl Zeroable for IndexPageHeader {}
unsafe impl Pod for IndexPageHeader {}

pub const INDEX_PAGE_HEADER_SIZE: usize = size_of::<IndexPageHeader>();

impl IndexPageHeader {
    pub fn kind(&self) -> IndexPageKind {
        match self.page_type {
            1 => IndexPageKind::Internal,
            2 => IndexPageKind::Leaf,
            _ => IndexPageKind::Invalid,
        }
    }

    pub fn set_kind(&mut self, kind: IndexPageKind) {
        self.page_type = match kind {
            IndexPageKind::Invalid => 0,
            IndexPageKind::Internal => 1,
            IndexPageKind::Leaf => 2,
        };
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = lsn;
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size as u32;
    }

    pub fn max_size(&self) -> usize {
        self.max_size as usize
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size as u32;
    }

    pub fn parent_page_id(&self) -> PageId {
        self.parent_page_id
    }

    pub fn set_parent_page_id(&mut self, parent_page_id: PageId) {
        self.parent_page_id = parent_page_id;
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }
}

/// View the common header at the front of any index page.
pub fn header(data: &PageData) -> &IndexPageHeader {
    bytemuck::from_bytes(&data.0[..INDEX_PAGE_HEADER_SIZE])
}

pub fn header_mut(data: &mut PageData) -> &mut IndexPageHeader {
    bytemuck::from_bytes_mut(&mut data.0[..INDEX_PAGE_HEADER_SIZE])
}

/// Total order over index keys. Node operations never assume `Ord` on
/// the key type itself; the comparator travels with every call, the way
/// the index layer wires a schema-aware comparison down to the pages.
pub trait KeyComparator<K> {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Comparator for key types with a usable natural order.
#[derive(Clone, Copy, Default, Debug)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

/// Point a child's parent link at `parent_id`, through the pool: fetch,
/// rewrite the header, unpin dirty. Works on either node kind since the
/// header prefix is shared.
pub(crate) fn reparent_child<R, D>(
    bpm: &BufferPoolManager<R, D>,
    child_id: PageId,
    parent_id: PageId,
) where
    R: Replacer<FrameId>,
    D: DiskManager,
{
    let page = bpm
        .fetch_page(child_id)
        .expect("all pages pinned while re-parenting a child");
    {
        let mut guard = page.write().unwrap();
        header_mut(&mut guard).set_parent_page_id(parent_id);
    }
    bpm.unpin_page(child_id, true);
}
