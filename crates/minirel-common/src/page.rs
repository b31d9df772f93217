//! Page identity types for Minirel storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4 * 1024;

/// Raw contents of a page. Layout is owned by the layers above the buffer.
pub type Page = [u8; PAGE_SIZE];

/// Identifier of a paged file, unique among the files open in a process.
pub type FileId = u32;

/// Page number within a paged file.
pub type PageNo = u32;

/// Returns a zero-filled page on the heap.
pub fn zeroed_page() -> Box<Page> {
    Box::new([0u8; PAGE_SIZE])
}

/// Identity of a cached page: the owning file plus the page number in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    /// Owning file.
    pub file_id: FileId,
    /// Page number within the file.
    pub page_no: PageNo,
}

impl PageKey {
    /// Creates a new PageKey.
    pub fn new(file_id: FileId, page_no: PageNo) -> Self {
        Self { file_id, page_no }
    }

    /// Returns the key as a single u64 for hashing.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_no as u64)
    }

    /// Creates a PageKey from a u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_no: value as u32,
        }
    }
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_no)
    }
}
