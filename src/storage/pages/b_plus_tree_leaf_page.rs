//! Leaf B+-tree node: a sorted array of `(key, record id)` slots plus a
//! right-sibling link for range scans.

use std::cmp::Ordering;
use std::fmt;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};

use bytemuck::{Pod, Zeroable};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::buffer::lru_replacer::Replacer;
use crate::common::{FrameId, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::pages::b_plus_tree_internal_page::BPlusTreeInternalPage;
use crate::storage::pages::b_plus_tree_page::{IndexPageHeader, IndexPageKind, KeyComparator};
use crate::storage::pages::page::PageData;

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct LeafEntry<K> {
    pub key: K,
    pub value: Rid,
}

unsafe impl<K: Zeroable> Zeroable for LeafEntry<K> {}
unsafe impl<K: Pod> Pod for LeafEntry<K> {}

/// The shared index-page header followed by the sibling link.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct LeafPageHeader {
    base: IndexPageHeader,
    next_page_id: PageId,
}

unsafe impl Zeroable for LeafPageHeader {}
unsafe impl Pod for LeafPageHeader {}

pub const LEAF_PAGE_HEADER_SIZE: usize = size_of::<LeafPageHeader>();

impl Deref for LeafPageHeader {
    type Target = IndexPageHeader;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl DerefMut for LeafPageHeader {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

/// Typed view over a leaf node resident in a page buffer.
pub struct BPlusTreeLeafPage<'a, K> {
    header: &'a mut LeafPageHeader,
    slots: &'a mut [LeafEntry<K>],
}

impl<'a, K: Pod> BPlusTreeLeafPage<'a, K> {
    pub fn view_mut(data: &'a mut PageData) -> Self {
        assert_eq!(
            size_of::<LeafEntry<K>>(),
            size_of::<K>() + size_of::<Rid>(),
            "key type must pack against a record id without padding"
        );
        let capacity = (PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / size_of::<LeafEntry<K>>();
        let (head, body) = data.0.split_at_mut(LEAF_PAGE_HEADER_SIZE);
        BPlusTreeLeafPage {
            header: bytemuck::from_bytes_mut(head),
            slots: bytemuck::cast_slice_mut(&mut body[..capacity * size_of::<LeafEntry<K>>()]),
        }
    }

    pub fn init(&mut self, page_id: PageId, parent_id: PageId) {
        self.header.set_kind(IndexPageKind::Leaf);
        self.header.set_lsn(0);
        self.header.set_size(0);
        self.header.set_max_size(self.slots.len());
        self.header.set_parent_page_id(parent_id);
        self.header.set_page_id(page_id);
        self.header.next_page_id = INVALID_PAGE_ID;
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

    pub fn next_page_id(&self) -> PageId {
        self.header.next_page_id
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        self.header.next_page_id = next_page_id;
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        self.slots[index].key
    }

    pub fn item(&self, index: usize) -> LeafEntry<K> {
        debug_assert!(index < self.size());
        self.slots[index]
    }

    /// First slot whose key is at or above `key`, or `None` when every
    /// resident key is smaller.
    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<usize> {
        (0..self.size())
            .find(|&index| comparator.compare(&self.slots[index].key, key) != Ordering::Less)
    }

    /// Ordered insert. Returns the new size; the caller splits once it
    /// reaches `max_size`, so the write itself always has a slot free.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: K, value: Rid, comparator: &C) -> usize {
        let size = self.size();
        assert!(size < self.max_size());
        let entry = LeafEntry { key, value };
        match self.key_index(&key, comparator) {
            Some(index) => {
                self.slots.copy_within(index..size, index + 1);
                self.slots[index] = entry;
            }
            None => self.slots[size] = entry,
        }
        self.header.set_size(size + 1);
        size + 1
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<Rid> {
        (0..self.size())
            .find(|&index| comparator.compare(&self.slots[index].key, key) == Ordering::Equal)
            .map(|index| self.slots[index].value)
    }

    /// Delete `key` if present. Returns the resulting size either way.
    pub fn remove_and_delete_record<C: KeyComparator<K>>(
        &mut self,
        key: &K,
        comparator: &C,
    ) -> usize {
        let size = self.size();
        let index = match (0..size)
            .find(|&index| comparator.compare(&self.slots[index].key, key) == Ordering::Equal)
        {
            Some(index) => index,
            None => return size,
        };
        self.slots.copy_within(index + 1..size, index);
        self.header.set_size(size - 1);
        size - 1
    }

    /// Split on overflow: the upper `size / 2` entries move to
    /// `recipient`, a fresh right sibling, which also inherits this
    /// page's sibling link. The caller re-links `this.next` to the
    /// recipient afterwards.
    pub fn move_half_to(&mut self, recipient: &mut BPlusTreeLeafPage<'_, K>) {
        let size = self.size();
        let split = size / 2;
        let start = size - split;
        recipient.copy_half_from(&self.slots[start..size]);
        self.header.set_size(start);
        recipient.set_next_page_id(self.next_page_id());
    }

    fn copy_half_from(&mut self, entries: &[LeafEntry<K>]) {
        debug_assert_eq!(self.size(), 0);
        self.slots[..entries.len()].copy_from_slice(entries);
        self.header.set_size(entries.len());
    }

    /// Merge into the left sibling; this page is the right one, so the
    /// recipient takes over its sibling link.
    pub fn move_all_to(&mut self, recipient: &mut BPlusTreeLeafPage<'_, K>) {
        let size = self.size();
        recipient.copy_all_from(&self.slots[..size]);
        recipient.set_next_page_id(self.next_page_id());
        self.header.set_size(0);
    }

    fn copy_all_from(&mut self, entries: &[LeafEntry<K>]) {
        let start = self.size();
        assert!(start + entries.len() <= self.max_size());
        self.slots[start..start + entries.len()].copy_from_slice(entries);
        self.header.set_size(start + entries.len());
    }

    /// Redistribution towards the left sibling: slot 0 moves to the
    /// recipient's tail and the parent's separator for this page is
    /// refreshed to the new first key.
    pub fn move_first_to_end_of<R, D>(
        &mut self,
        recipient: &mut BPlusTreeLeafPage<'_, K>,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let moved = self.slots[0];
        recipient.copy_last_from(&moved);
        let size = self.size();
        self.slots.copy_within(1..size, 0);
        self.header.set_size(size - 1);

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
            parent.set_key_at(index, self.key_at(0));
        }
        bpm.unpin_page(parent_id, true);
    }

    fn copy_last_from(&mut self, entry: &LeafEntry<K>) {
        let size = self.size();
        assert!(size < self.max_size());
        self.slots[size] = *entry;
        self.header.set_size(size + 1);
    }

    /// Redistribution towards the right sibling: the last entry moves
    /// to the recipient's front, and the parent's separator at
    /// `parent_index` becomes the donated key.
    pub fn move_last_to_front_of<R, D>(
        &mut self,
        recipient: &mut BPlusTreeLeafPage<'_, K>,
        parent_index: usize,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let new_size = self.size() - 1;
        let moved = self.slots[new_size];
        recipient.copy_first_from(&moved, parent_index, bpm);
        self.header.set_size(new_size);
    }

    fn copy_first_from<R, D>(
        &mut self,
        entry: &LeafEntry<K>,
        parent_index: usize,
        bpm: &BufferPoolManager<R, D>,
    ) where
        R: Replacer<FrameId>,
        D: DiskManager,
    {
        let size = self.size();
        assert!(size < self.max_size());
        self.slots.copy_within(0..size, 1);
        self.slots[0] = *entry;
        self.header.set_size(size + 1);

        let parent_id = self.parent_page_id();
        let parent_page = bpm
            .fetch_page(parent_id)
            .expect("all pages pinned while redistributing");
        {
            let mut guard = parent_page.write().unwrap();
            let mut parent = BPlusTreeInternalPage::<K>::view_mut(&mut guard);
            parent.set_key_at(parent_index, entry.key);
        }
        bpm.unpin_page(parent_id, true);
    }
}

impl<K: Pod + fmt::Debug> fmt::Debug for BPlusTreeLeafPage<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[page {:?} parent {:?} next {:?}]<{}>",
            self.page_id(),
            self.parent_page_id(),
            self.next_page_id(),
            self.size()
        )?;
        for index in 0..self.size() {
            write!(f, " {:?}", self.slots[index].key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::buffer_pool_manager::LruBufferPoolManager;
    use crate::storage::disk::disk_manager::MemoryDiskManager;
    use crate::storage::pages::b_plus_tree_page::OrdComparator;
    use rand::seq::SliceRandom;
    use std::sync::Arc;

    type Bpm = LruBufferPoolManager<MemoryDiskManager>;

    fn pool(pool_size: usize) -> Bpm {
        crate::testing::init_logger();
        Bpm::new(pool_size, Arc::new(MemoryDiskManager::new()), None)
    }

    fn rid(key: i32) -> Rid {
        Rid::new(PageId(key), key as u32)
    }

    fn fill(leaf: &mut BPlusTreeLeafPage<'_, i32>, keys: &[i32]) {
        let cmp = OrdComparator;
        for &key in keys {
            leaf.insert(key, rid(key), &cmp);
        }
    }

    fn keys_of(leaf: &BPlusTreeLeafPage<'_, i32>) -> Vec<i32> {
        (0..leaf.size()).map(|i| leaf.key_at(i)).collect()
    }

    #[test]
    fn init_computes_capacity() {
        let bpm = pool(2);
        let (page_id, data) = bpm.new_page().unwrap();
        let mut guard = data.write().unwrap();
        let mut leaf = BPlusTreeLeafPage::<i32>::view_mut(&mut guard);
        leaf.init(page_id, INVALID_PAGE_ID);
        assert_eq!(leaf.size(), 0);
        assert_eq!(leaf.max_size(), (PAGE_SIZE - LEAF_PAGE_HEADER_SIZE) / 12);
        assert_eq!(leaf.next_page_id(), INVALID_PAGE_ID);
    }

    #[test]
    fn insert_keeps_keys_sorted() {
        let bpm = pool(2);
        let (page_id, data) = bpm.new_page().unwrap();
        let mut guard = data.write().unwrap();
        let mut leaf = BPlusTreeLeafPage::<i32>::view_mut(&mut guard);
        leaf.init(page_id, INVALID_PAGE_ID);

        let cmp = OrdComparator;
        fill(&mut leaf, &[5, 2, 8, 1]);
        assert_eq!(keys_of(&leaf), vec![1, 2, 5, 8]);
        assert_eq!(leaf.lookup(&5, &cmp), Some(rid(5)));
        assert_eq!(leaf.lookup(&3, &cmp), None);
        assert_eq!(leaf.key_index(&3, &cmp), Some(2));
        assert_eq!(leaf.key_index(&9, &cmp), None);
        assert_eq!(leaf.item(2).value, rid(5));
    }

    #[test]
    fn shuffled_inserts_end_up_ordered() {
        let bpm = pool(2);
        let (page_id, data) = bpm.new_page().unwrap();
        let mut guard = data.write().unwrap();
        let mut leaf = BPlusTreeLeafPage::<i32>::view_mut(&mut guard);
        leaf.init(page_id, INVALID_PAGE_ID);

        let cmp = OrdComparator;
        let mut keys: Vec<i32> = (0..128).collect();
        keys.shuffle(&mut rand::thread_rng());
        for &key in &keys {
            leaf.insert(key, rid(key), &cmp);
        }
        assert_eq!(keys_of(&leaf), (0..128).collect::<Vec<i32>>());
        for key in 0..128 {
            assert_eq!(leaf.lookup(&key, &cmp), Some(rid(key)));
        }
    }

    #[test]
    fn delete_shifts_and_reports_size() {
        let bpm = pool(2);
        let (page_id, data) = bpm.new_page().unwrap();
        let mut guard = data.write().unwrap();
        let mut leaf = BPlusTreeLeafPage::<i32>::view_mut(&mut guard);
        leaf.init(page_id, INVALID_PAGE_ID);

        let cmp = OrdComparator;
        fill(&mut leaf, &[1, 2, 5, 8]);
        assert_eq!(leaf.remove_and_delete_record(&5, &cmp), 3);
        assert_eq!(keys_of(&leaf), vec![1, 2, 8]);
        // absent key leaves the page untouched
        assert_eq!(leaf.remove_and_delete_record(&7, &cmp), 3);
        assert_eq!(leaf.lookup(&5, &cmp), None);
    }

    #[test]
    fn split_moves_upper_half_and_sibling_link() {
        let bpm = pool(4);
        let (left_id, left_data) = bpm.new_page().unwrap();
        let (right_id, right_data) = bpm.new_page().unwrap();

        let mut left_guard = left_data.write().unwrap();
        let mut left = BPlusTreeLeafPage::<i32>::view_mut(&mut left_guard);
        left.init(left_id, INVALID_PAGE_ID);
        fill(&mut left, &[1, 2, 3, 4, 5, 6]);
        left.set_next_page_id(PageId(77));

        let mut right_guard = right_data.write().unwrap();
        let mut right = BPlusTreeLeafPage::<i32>::view_mut(&mut right_guard);
        right.init(right_id, INVALID_PAGE_ID);

        left.move_half_to(&mut right);
        // the donor keeps the lower half and re-links itself
        left.set_next_page_id(right.page_id());

        assert_eq!(keys_of(&left), vec![1, 2, 3]);
        assert_eq!(keys_of(&right), vec![4, 5, 6]);
        assert_eq!(right.next_page_id(), PageId(77));
        assert_eq!(left.next_page_id(), right_id);
    }

    #[test]
    fn merge_appends_and_takes_over_link() {
        let bpm = pool(4);
        let (left_id, left_data) = bpm.new_page().unwrap();
        let (right_id, right_data) = bpm.new_page().unwrap();

        let mut left_guard = left_data.write().unwrap();
        let mut left = BPlusTreeLeafPage::<i32>::view_mut(&mut left_guard);
        left.init(left_id, INVALID_PAGE_ID);
        fill(&mut left, &[1, 2]);
        left.set_next_page_id(right_id);

        let mut right_guard = right_data.write().unwrap();
        let mut right = BPlusTreeLeafPage::<i32>::view_mut(&mut right_guard);
        right.init(right_id, INVALID_PAGE_ID);
        fill(&mut right, &[10, 11]);
        right.set_next_page_id(PageId(77));

        right.move_all_to(&mut left);

        assert_eq!(right.size(), 0);
        assert_eq!(keys_of(&left), vec![1, 2, 10, 11]);
        assert_eq!(left.next_page_id(), PageId(77));
    }

    #[test]
    fn redistribute_first_to_left_sibling() {
        let bpm = pool(8);
        let (parent_id, parent_data) = bpm.new_page().unwrap();
        let (left_id, left_data) = bpm.new_page().unwrap();
        let (right_id, right_data) = bpm.new_page().unwrap();

        {
            let mut guard = parent_data.write().unwrap();
            let mut parent = BPlusTreeInternalPage::<i32>::view_mut(&mut guard);
            parent.init(parent_id, INVALID_PAGE_ID);
            parent.populate_new_root(left_id, 100, right_id);
        }
        assert!(bpm.unpin_page(parent_id, true));

        let mut left_guard = left_data.write().unwrap();
        let mut left = BPlusTreeLeafPage::<i32>::view_mut(&mut left_guard);
        left.init(left_id, parent_id);
        fill(&mut left, &[1, 2]);

        let mut right_guard = right_data.write().unwrap();
        let mut right = BPlusTreeLeafPage::<i32>::view_mut(&mut right_guard);
        right.init(right_id, parent_id);
        fill(&mut right, &[100, 110, 120]);

        right.move_first_to_end_of(&mut left, &bpm);

        assert_eq!(keys_of(&left), vec![1, 2, 100]);
        assert_eq!(keys_of(&right), vec![110, 120]);

        drop(left_guard);
        drop(right_guard);
        let parent_page = bpm.fetch_page(parent_id).unwrap();
        {
            let mut guard = parent_page.write().unwrap();
            let parent = BPlusTreeInternalPage::<i32>::view_mut(&mut guard);
            assert_eq!(parent.key_at(1), 110);
        }
        assert!(bpm.unpin_page(parent_id, false));
    }

    #[test]
    fn redistribute_last_to_right_sibling() {
        let bpm = pool(8);
        let (parent_id, parent_data) = bpm.new_page().unwrap();
        let (left_id, left_data) = bpm.new_page().unwrap();
        let (right_id, right_data) = bpm.new_page().unwrap();

        {
            let mut guard = parent_data.write().unwrap();
            let mut parent = BPlusTreeInternalPage::<i32>::view_mut(&mut guard);
            parent.init(parent_id, INVALID_PAGE_ID);
            parent.populate_new_root(left_id, 100, right_id);
        }
        assert!(bpm.unpin_page(parent_id, true));

        let mut left_guard = left_data.write().unwrap();
        let mut left = BPlusTreeLeafPage::<i32>::view_mut(&mut left_guard);
        left.init(left_id, parent_id);
        fill(&mut left, &[1, 2, 3]);

        let mut right_guard = right_data.write().unwrap();
        let mut right = BPlusTreeLeafPage::<i32>::view_mut(&mut right_guard);
        right.init(right_id, parent_id);
        fill(&mut right, &[100, 110]);

        left.move_last_to_front_of(&mut right, 1, &bpm);

        assert_eq!(keys_of(&left), vec![1, 2]);
        assert_eq!(keys_of(&right), vec![3, 100, 110]);

        drop(left_guard);
        drop(right_guard);
        let parent_page = bpm.fetch_page(parent_id).unwrap();
        {
            let mut guard = parent_page.write().unwrap();
            let parent = BPlusTreeInternalPage::<i32>::view_mut(&mut guard);
            assert_eq!(parent.key_at(1), 3);
        }
        assert!(bpm.unpin_page(parent_id, false));
    }
}
