//! Paged file capability consumed by the buffer manager.

use crate::error::Result;
use crate::page::{FileId, Page, PageNo};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(0);

/// Hands out a process-wide unique file identity.
///
/// Every backend draws from the same counter so that files of different
/// kinds can share one buffer manager without their page keys colliding.
pub fn next_file_id() -> FileId {
    NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Page-granular storage backend.
///
/// The buffer manager only ever talks to storage through this trait, so any
/// backend (an OS file, an in-memory file, a remote store) can sit below it.
/// Implementations use interior mutability: every method takes `&self`.
pub trait PagedFile: Send + Sync {
    /// Returns the identity used to key this file's pages in the page index.
    fn file_id(&self) -> FileId;

    /// Fills `page` with the stored contents of `page_no`.
    ///
    /// Fails if the page does not exist or the read fails.
    fn read_page(&self, page_no: PageNo, page: &mut Page) -> Result<()>;

    /// Persists `page` as the contents of `page_no`.
    fn write_page(&self, page_no: PageNo, page: &Page) -> Result<()>;

    /// Reserves a fresh page number. Fails if storage is exhausted.
    fn allocate_page(&self) -> Result<PageNo>;

    /// Releases `page_no` for reuse.
    fn dispose_page(&self, page_no: PageNo) -> Result<()>;
}
