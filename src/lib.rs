//! Page-oriented storage core: a pin/unpin buffer pool over a disk
//! manager, the extendible-hash directory it uses as its page table, an
//! LRU victim selector, and the B+-tree node pages that live inside
//! pooled pages.

pub mod buffer;
pub mod common;
pub mod container;
pub mod logging;
pub mod storage;

pub use common::{FrameId, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
