//! Buffer management for Minirel.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size pool of frames shared by any number of paged files
//! - Clock eviction with reference bits
//! - Pin counting, pinned pages are never evicted
//! - Dirty page tracking with write-back on eviction, flush and teardown

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{FrameId, FrameInfo};
pub use page_table::PageIndex;
pub use pool::{BufferManager, BufferSnapshot, BufferStats, PageHandle};
