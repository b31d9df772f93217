//! In-memory paged file.
//!
//! Keeps every page in a heap buffer and records how often each page was
//! read or written. Reads, writes and allocations can be made to fail on
//! demand so callers can exercise their error paths.

use minirel_common::{
    next_file_id, zeroed_page, FileId, MinirelError, Page, PageKey, PageNo, PagedFile, Result,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Paged file held entirely in memory.
pub struct MemFile {
    file_id: FileId,
    inner: Mutex<MemFileInner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_allocations: AtomicBool,
}

struct MemFileInner {
    /// Slot per page number; None once disposed.
    pages: Vec<Option<Box<Page>>>,
    /// Disposed page numbers available for reuse.
    free: Vec<PageNo>,
    /// Upper bound on page count, None = unbounded.
    max_pages: Option<u32>,
    reads: HashMap<PageNo, u64>,
    writes: HashMap<PageNo, u64>,
}

impl MemFile {
    /// Creates an empty, unbounded in-memory file.
    pub fn new() -> Self {
        Self {
            file_id: next_file_id(),
            inner: Mutex::new(MemFileInner {
                pages: Vec::new(),
                free: Vec::new(),
                max_pages: None,
                reads: HashMap::new(),
                writes: HashMap::new(),
            }),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_allocations: AtomicBool::new(false),
        }
    }

    /// Creates a file with `num_pages` zero-filled pages numbered from 0.
    pub fn with_pages(num_pages: u32) -> Self {
        let file = Self::new();
        {
            let mut inner = file.inner.lock();
            inner.pages = (0..num_pages).map(|_| Some(zeroed_page())).collect();
        }
        file
    }

    /// Caps the number of page numbers the file may hand out.
    pub fn with_max_pages(self, max_pages: u32) -> Self {
        self.inner.lock().max_pages = Some(max_pages);
        self
    }

    /// Makes subsequent reads fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Makes subsequent allocations fail (or succeed again).
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Release);
    }

    /// Number of successful reads of `page_no`.
    pub fn reads(&self, page_no: PageNo) -> u64 {
        self.inner.lock().reads.get(&page_no).copied().unwrap_or(0)
    }

    /// Number of successful writes of `page_no`.
    pub fn writes(&self, page_no: PageNo) -> u64 {
        self.inner.lock().writes.get(&page_no).copied().unwrap_or(0)
    }

    /// Total successful reads across all pages.
    pub fn total_reads(&self) -> u64 {
        self.inner.lock().reads.values().sum()
    }

    /// Total successful writes across all pages.
    pub fn total_writes(&self) -> u64 {
        self.inner.lock().writes.values().sum()
    }

    /// Returns a copy of the stored contents of `page_no`, if allocated.
    pub fn stored_page(&self, page_no: PageNo) -> Option<Box<Page>> {
        let inner = self.inner.lock();
        inner
            .pages
            .get(page_no as usize)
            .and_then(|slot| slot.as_ref())
            .cloned()
    }

    /// Returns true if `page_no` is currently allocated.
    pub fn is_allocated(&self, page_no: PageNo) -> bool {
        let inner = self.inner.lock();
        matches!(inner.pages.get(page_no as usize), Some(Some(_)))
    }

    /// Number of allocated pages.
    pub fn num_pages(&self) -> usize {
        self.inner.lock().pages.iter().filter(|p| p.is_some()).count()
    }

    fn not_found(&self, page_no: PageNo) -> MinirelError {
        MinirelError::PageNotFound {
            page: PageKey::new(self.file_id, page_no),
        }
    }
}

impl Default for MemFile {
    fn default() -> Self {
        Self::new()
    }
}

impl PagedFile for MemFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_no: PageNo, page: &mut Page) -> Result<()> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(MinirelError::IoError(format!(
                "injected read failure on page {}",
                PageKey::new(self.file_id, page_no)
            )));
        }

        let mut inner = self.inner.lock();
        let stored = match inner.pages.get(page_no as usize) {
            Some(Some(stored)) => stored,
            _ => return Err(self.not_found(page_no)),
        };
        page.copy_from_slice(&stored[..]);
        *inner.reads.entry(page_no).or_insert(0) += 1;
        Ok(())
    }

    fn write_page(&self, page_no: PageNo, page: &Page) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(MinirelError::IoError(format!(
                "injected write failure on page {}",
                PageKey::new(self.file_id, page_no)
            )));
        }

        let mut inner = self.inner.lock();
        match inner.pages.get_mut(page_no as usize) {
            Some(Some(stored)) => stored.copy_from_slice(&page[..]),
            _ => return Err(self.not_found(page_no)),
        }
        *inner.writes.entry(page_no).or_insert(0) += 1;
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageNo> {
        if self.fail_allocations.load(Ordering::Acquire) {
            return Err(MinirelError::StorageFull {
                file_id: self.file_id,
            });
        }

        let mut inner = self.inner.lock();
        if let Some(page_no) = inner.free.pop() {
            inner.pages[page_no as usize] = Some(zeroed_page());
            return Ok(page_no);
        }

        let page_no = inner.pages.len() as u64;
        let limit = inner.max_pages.map(u64::from).unwrap_or(u32::MAX as u64);
        if page_no >= limit {
            return Err(MinirelError::StorageFull {
                file_id: self.file_id,
            });
        }
        inner.pages.push(Some(zeroed_page()));
        Ok(page_no as PageNo)
    }

    fn dispose_page(&self, page_no: PageNo) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .pages
            .get_mut(page_no as usize)
            .filter(|slot| slot.is_some())
            .ok_or_else(|| self.not_found(page_no))?;
        *slot = None;
        inner.free.push(page_no);
        Ok(())
    }
}

impl std::fmt::Debug for MemFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFile")
            .field("file_id", &self.file_id)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}
