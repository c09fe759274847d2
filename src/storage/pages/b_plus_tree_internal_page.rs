//! Internal B+-tree node: an ordered array of `(key, child)` slots laid
//! out in a pooled page. Slot 0's key is an invalid sentinel; its child
//! covers everything below the key at slot 1.
//!
//! Operations run inside the caller's pin of this page. Parent and
//! child pages touched by structural moves are fetched and unpinned
//! through the buffer pool, one page at a time.

use std::cmp::Ordering;
use std::fmt;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::buffer::lru_replacer::Replacer;
use crate::common::{FrameId, PageId, PAGE_SIZE};
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::pages::b_plus_tree_page::{
    reparent_child, IndexPageHeader, IndexPageKind, KeyComparator, INDEX_PAGE_HEADER_SIZE,
};
use crate::storage::pages::page::PageData;

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct InternalEntry<K> {
    pub key: K,
    pub child: PageId,
}

unsafe impl<K: Zeroable> Zeroable for InternalEntry<K> {}
unsafe impl<K: Pod> Pod for InternalEntry<K> {}

/// Typed view over an internal node resident in a page buffer.
pub struct BPlusTreeInternalPage<'a, K> {
    header: &'a mut IndexPageHeader,
    slots: &'a mut [InternalEntry<K>],
}

impl<'a, K: Pod> BPlusTreeInternalPage<'a, K> {
    pub fn view_mut(data: &'a mut PageData) -> Self {
        assert_eq!(
            size_of::<InternalEntry<K>>(),
            size_of::<K>() + size_of::<PageId>(),
            "key type must pack against a page id without padding"
        );
        let capacity = (PAGE_SIZE - INDEX_PAGE_HEADER_SIZE) / size_of::<InternalEntry<K>>();
        let (head, body) = data.0.split_at_mut(INDEX_PAGE_HEADER_SIZE);
        BPlusTreeInternalPage {
            header: bytemuck::from_bytes_mut(head),
            slots: bytemuck::cast_slice_mut(&mut body[..capacity * size_of::<InternalEntry<K>>()]),
        }
    }

    /// Set up a freshly allocated page. Size starts at one for the
    /// sentinel slot.
    pub fn init(&mut self, page_id: PageId, parent_id: PageId) {
        self.header.set_kind(IndexPageKind::Internal);
        self.header.set_lsn(0);
        self.header.set_size(1);
        self.header.set_max_size(self.slots.len());
        self.header.set_parent_page_id(parent_id);
        self.header.set_page_id(page_id);
    }

    pub fn page_id(&self) -> PageId {
        self.header.page_id()
    }

    pub fn parent_page_id(&self) -> PageId {
        self.header.parent_page_id()
    }

    pub fn set_parent_page_id(&mut self, parent_id: PageId) {
        self.header.set_parent_page_id(parent_id);
    }

    pub fn size(&self) -> usize {
        self.header.size()
    }

    pub fn max_size(&self) -> usize {
        self.header.max_size()
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        self.slots[index].key
    }

    pub fn set_key_at(&mut self, index: usize, key: K) {
        debug_assert!(index < self.size());
        self.slots[index].key = key;
    }

    pub fn value_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        self.slots[index].child
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        debug_assert!(index < self.size());
        self.slots[index].child = child;
    }

    /// First slot routing to `child`, scanning the whole node.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&index| self.slots[index].child == child)
    }

    /// Child covering `key`: the rightmost slot at or past index one
    /// whose key does not exceed it, falling back to the leftmost
    /// child. Keys above slot 0 are strictly increasing, so the scan's
    /// last hit is the right one.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        debug_assert!(self.size() > 1);
        let mut found = 0;
        for index in 1..self.size() {
            if comparator.compare(&self.slots[index].key, key) != Ordering::Greater {
                found = index;
            }
        }
        self.slots[found].child
    }

    /// Turn a freshly initialised page into the root produced by a
    /// root split: the old root below the sentinel, the new sibling
    /// keyed by the pushed-up separator.
    pub fn populate_new_root(&mut self, old_child: PageId, new_key: K, new_child: PageId) {
        assert_eq!(self.size(), 1, "new root must be freshly initialised");
        self.slots[0].child = old_child;
        self.slots[1] = InternalEntry {
            key: new_key,
            child: new_child,
        };
        self.header.set_size(2);
    }

    /// Insert `new_key -> new_child` immediately after the slot routing
    /// to `old_child`. Returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, new_key: K, new_child: PageId) -> usize {
        let index = self
            .value_index(old_child)
            .expect("anchor child missing from this node");
        let size = self.size();
        assert!(size < self.max_size());
        self.slots.copy_within(index + 1..size, index + 2);
        self.slots[index + 1] = InternalEntry {
            key: new_key,
            child: new_child,
        };
        self.header.set_size(size + 1);
        size + 1
    }

    /// Split on overflow: hand the upper `(size + 1) / 2` entries to
    /// `recipient`, a freshly initialised node. The recipient's slot-0
    /// key is the separator to push up into the parent; callers must
    /// read it before mutating the recipient further. Moved children
    /// are re-parented through the pool.
    pub fn move_half_to<R, D>(
        &mut self,
        recipient: &mut BPlusTreeInternalPage<'_, K>,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let size = self.size();
        let split = (size + 1) / 2;
        let start = size - split;
        recipient.copy_half_from(&self.slots[start..size]);
        for index in start..size {
            reparent_child(bpm, self.slots[index].child, recipient.page_id());
        }
        self.header.set_size(size - split);
    }

    fn copy_half_from(&mut self, entries: &[InternalEntry<K>]) {
        debug_assert_eq!(self.size(), 1);
        self.slots[..entries.len()].copy_from_slice(entries);
        // slot 0 keeps its child but donates its key upward, so the
        // count grows by one less than the entries received
        self.header.set_size(self.size() + entries.len() - 1);
    }

    /// Close the gap at `index`.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        self.slots.copy_within(index + 1..size, index);
        self.header.set_size(size - 1);
    }

    /// Root collapse: the node is down to one real entry; surrender its
    /// child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        self.header.set_size(self.size() - 1);
        assert_eq!(self.size(), 1, "node still routes more than one child");
        self.slots[0].child
    }

    /// Merge into the left sibling. The separator at `index_in_parent`
    /// drops down to give slot 0 a real key, the whole array moves, and
    /// every moved child is re-parented.
    pub fn move_all_to<R, D>(
        &mut self,
        recipient: &mut BPlusTreeInternalPage<'_, K>,
        index_in_parent: usize,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let parent_id = self.parent_page_id();
        let parent_page = bpm
            .fetch_page(parent_id)
            .expect("all pages pinned while merging");
        {
            let mut guard = parent_page.write().unwrap();
            let parent = BPlusTreeInternalPage::<K>::view_mut(&mut guard);
            self.slots[0].key = parent.key_at(index_in_parent);
        }
        bpm.unpin_page(parent_id, true);

        let size = self.size();
        recipient.copy_all_from(&self.slots[..size]);
        for index in 0..size {
            reparent_child(bpm, self.slots[index].child, recipient.page_id());
        }
        self.header.set_size(0);
    }

    fn copy_all_from(&mut self, entries: &[InternalEntry<K>]) {
        let start = self.size();
        assert!(start + entries.len() <= self.max_size());
        self.slots[start..start + entries.len()].copy_from_slice(entries);
        self.header.set_size(start + entries.len());
    }

    /// Redistribution towards the left sibling: the leftmost real entry
    /// leaves, its key rotating up through the parent while the old
    /// separator rotates down onto the recipient's tail.
    pub fn move_first_to_end_of<R, D>(
        &mut self,
        recipient: &mut BPlusTreeInternalPage<'_, K>,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let moved = InternalEntry {
            key: self.key_at(1),
            child: self.value_at(0),
        };
        let next_first = self.value_at(1);
        self.slots[0].child = next_first;
        self.remove(1);
        recipient.copy_last_from(&moved, bpm);
        reparent_child(bpm, moved.child, recipient.page_id());
    }

    fn copy_last_from<R, D>(&mut self, entry: &InternalEntry<K>, bpm: &BufferPoolManager<R, D>)
    where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let parent_id = self.parent_page_id();
        let parent_page = bpm
            .fetch_page(parent_id)
            .expect("all pages pinned while redistributing");
        {
            let mut guard = parent_page.write().unwrap();
            let mut parent = BPlusTreeInternalPage::<K>::view_mut(&mut guard);
            let index = parent
                .value_index(self.page_id())
                .expect("page missing from its parent");
            let separator = parent.key_at(index + 1);
            let size = self.size();
            assert!(size < self.max_size());
            self.slots[size] = InternalEntry {
                key: separator,
                child: entry.child,
            };
            self.header.set_size(size + 1);
            parent.set_key_at(index + 1, entry.key);
        }
        bpm.unpin_page(parent_id, true);
    }

    /// Redistribution towards the right sibling: the last entry moves
    /// to the recipient's front, rotating keys through the separator at
    /// `parent_index`.
    pub fn move_last_to_front_of<R, D>(
        &mut self,
        recipient: &mut BPlusTreeInternalPage<'_, K>,
        parent_index: usize,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let moved = self.slots[self.size() - 1];
        recipient.copy_first_from(&moved, parent_index, bpm);
        reparent_child(bpm, moved.child, recipient.page_id());
        let last = self.size() - 1;
        self.remove(last);
    }

    fn copy_first_from<R, D>(
        &mut self,
        entry: &InternalEntry<K>,
        parent_index: usize,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let parent_id = self.parent_page_id();
        let parent_page = bpm
            .fetch_page(parent_id)
            .expect("all pages pinned while redistributing");
        {
            let mut guard = parent_page.write().unwrap();
            let mut parent = BPlusTreeInternalPage::<K>::view_mut(&mut guard);
            let separator = parent.key_at(parent_index);
            parent.set_key_at(parent_index, entry.key);
            let size = self.size();
            assert!(size < self.max_size());
            self.slots.copy_within(0..size, 1);
            self.slots[1].key = separator;
            self.slots[0].child = entry.child;
            self.header.set_size(size + 1);
        }
        bpm.unpin_page(parent_id, true);
    }

    /// Rotate the first real entry into the sentinel slot and return
    /// it; used when the tree sheds a root level.
    pub fn push_up_index(&mut self) -> InternalEntry<K> {
        let pair = self.slots[1];
        self.slots[0].child = pair.child;
        self.remove(1);
        pair
    }
}

impl<K: Pod + fmt::Debug> fmt::Debug for BPlusTreeInternalPage<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[page {:?} parent {:?}]<{}>",
            self.page_id(),
            self.parent_page_id(),
            self.size()
        )?;
        for index in 1..self.size() {
            write!(f, " {:?}({:?})", self.slots[index].key, self.slots[index].child)?;
        }
        Ok(())
    }
}
