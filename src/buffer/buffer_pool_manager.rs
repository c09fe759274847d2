use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::buffer::lru_replacer::{LruReplacer, Replacer};
use crate::common::{FrameId, PageId, BUCKET_SIZE, INVALID_PAGE_ID};
use crate::container::extendible_hash_table::ExtendibleHashTable;
use crate::logging::log_manager::LogManager;
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::pages::page::{Page, PageRef};

struct PoolState {
    frames: Vec<Page>,
    free_list: VecDeque<FrameId>,
}

/// Fixed-size cache of pages backed by a disk manager. Every public
/// operation runs under one pool-wide mutex; the page directory and the
/// replacer carry their own locks but are only entered from here, so
/// the lock order is always pool, then directory or replacer.
///
/// Callers pair every `fetch_page`/`new_page` with exactly one
/// `unpin_page` carrying the dirty verdict.
pub struct BufferPoolManager<R, D>
where
    R: Replacer<FrameId>,
    D: DiskManager,
{
    pool_size: usize,
    state: Mutex<PoolState>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: R,
    disk_manager: Arc<D>,
    log_manager: Option<Arc<LogManager>>,
}

/// The default pool evicts in LRU order.
pub type LruBufferPoolManager<D> = BufferPoolManager<LruReplacer<FrameId>, D>;

impl<R, D> BufferPoolManager<R, D>
where
    R: Replacer<FrameId>,
    D: DiskManager,
{
    pub fn new(pool_size: usize, disk_manager: Arc<D>, log_manager: Option<Arc<LogManager>>) -> Self {
        let frames = (0..pool_size).map(|_| Page::new()).collect();
        let free_list = (0..pool_size).map(FrameId).collect();
        BufferPoolManager {
            pool_size,
            state: Mutex::new(PoolState { frames, free_list }),
            page_table: ExtendibleHashTable::new(BUCKET_SIZE),
            replacer: R::new(),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Pin the page, reading it in from disk if it is not resident.
    /// `None` when the pool is out of unpinned frames.
    pub fn fetch_page(&self, page_id: PageId) -> Option<PageRef> {
        assert!(page_id.is_valid());
        let mut state = self.state.lock().unwrap();
        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &mut state.frames[frame_id.0];
            frame.increase_pin_count();
            self.replacer.erase(&frame_id);
            return Some(frame.data());
        }
        let frame_id = self.take_candidate(&mut state)?;
        let frame = &mut state.frames[frame_id.0];
        assert_eq!(frame.pin_count(), 0, "eviction candidate is pinned");
        if frame.is_dirty() {
            debug!(
                "evicting dirty page {:?} from frame {:?}",
                frame.page_id(),
                frame_id
            );
            self.write_back(frame);
        }
        if frame.page_id().is_valid() {
            self.page_table.remove(&frame.page_id());
        }
        self.page_table.insert(page_id, frame_id);
        frame.set_page_id(page_id);
        frame.set_pin_count(1);
        frame.set_dirty(false);
        {
            let data = frame.data();
            let mut guard = data.write().unwrap();
            self.disk_manager.read_page(page_id, &mut guard.0);
        }
        Some(frame.data())
    }

    /// Drop one pin. Reaching zero makes the frame evictable. The dirty
    /// flag only ever accumulates; it is cleared on eviction, not here.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = &mut state.frames[frame_id.0];
        if frame.pin_count() == 0 {
            return false;
        }
        frame.decrease_pin_count();
        if frame.pin_count() == 0 {
            self.replacer.insert(frame_id);
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        true
    }

    /// Write the resident page to disk, dirty or not. The dirty flag is
    /// left untouched.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        if !page_id.is_valid() {
            return false;
        }
        let state = self.state.lock().unwrap();
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        self.write_back(&state.frames[frame_id.0]);
        true
    }

    pub fn flush_all_pages(&self) {
        let state = self.state.lock().unwrap();
        for frame in state.frames.iter() {
            if frame.page_id().is_valid() && frame.is_dirty() {
                self.write_back(frame);
            }
        }
    }

    /// Evict the page and hand its id back to the disk manager. Refused
    /// while any pin is outstanding.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        if !page_id.is_valid() {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };
        let frame = &mut state.frames[frame_id.0];
        if frame.pin_count() != 0 {
            debug!("refusing to delete pinned page {:?}", page_id);
            return false;
        }
        frame.reset_data();
        frame.set_page_id(INVALID_PAGE_ID);
        frame.set_dirty(false);
        self.replacer.erase(&frame_id);
        self.page_table.remove(&page_id);
        self.disk_manager.deallocate_page(page_id);
        state.free_list.push_back(frame_id);
        true
    }

    /// Allocate a fresh page, pinned and zeroed. `None` when every
    /// frame is pinned.
    pub fn new_page(&self) -> Option<(PageId, PageRef)> {
        let mut state = self.state.lock().unwrap();
        let frame_id = self.take_candidate(&mut state)?;
        let frame = &mut state.frames[frame_id.0];
        assert_eq!(frame.pin_count(), 0, "eviction candidate is pinned");
        if frame.is_dirty() {
            debug!(
                "evicting dirty page {:?} from frame {:?}",
                frame.page_id(),
                frame_id
            );
            self.write_back(frame);
        }
        if frame.page_id().is_valid() {
            self.page_table.remove(&frame.page_id());
        }
        let page_id = self.disk_manager.allocate_page();
        self.page_table.insert(page_id, frame_id);
        frame.set_page_id(page_id);
        frame.set_pin_count(1);
        frame.set_dirty(false);
        frame.reset_data();
        debug!("page {:?} created in frame {:?}", page_id, frame_id);
        Some((page_id, frame.data()))
    }

    /// Free list first, then the replacer.
    fn take_candidate(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some(frame_id);
        }
        self.replacer.victim()
    }

    fn write_back(&self, frame: &Page) {
        if let Some(log_manager) = &self.log_manager {
            // data must not overtake the log
            log_manager.flush_until(frame.lsn());
        }
        let data = frame.data();
        let guard = data.read().unwrap();
        self.disk_manager.write_page(frame.page_id(), &guard.0);
    }
}
