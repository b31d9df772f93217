//! Error types for Minirel.

use crate::page::PageKey;
use thiserror::Error;

/// Result type alias using MinirelError.
pub type Result<T> = std::result::Result<T, MinirelError>;

/// Errors that can occur in Minirel operations.
#[derive(Debug, Error)]
pub enum MinirelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Page not found: {page}")]
    PageNotFound { page: PageKey },

    #[error("Storage full, unable to allocate page in file {file_id}")]
    StorageFull { file_id: u32 },

    #[error("File corrupted: {path}, reason: {reason}")]
    FileCorrupted { path: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("File is still in use: {0}")]
    FileInUse(String),

    // Buffer errors
    #[error("Buffer pool exceeded, all frames are pinned")]
    BufferExceeded,

    #[error("Page {page} is not in the buffer pool")]
    HashNotFound { page: PageKey },

    #[error("Page {page} is not pinned")]
    PageNotPinned { page: PageKey },

    #[error("Page {page} is pinned")]
    PagePinned { page: PageKey },

    #[error("Page index error: {0}")]
    HashTableError(String),

    #[error("Bad buffer frame {frame}: {reason}")]
    BadBuffer { frame: u32, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MinirelError {
    /// Returns true if the caller may retry after releasing resources.
    ///
    /// Only capacity exhaustion qualifies: unpinning a page and retrying
    /// can succeed, while storage failures are fatal to the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MinirelError::BufferExceeded)
    }

    /// Returns true if the error reports a caller bug in the pin protocol.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            MinirelError::HashNotFound { .. }
                | MinirelError::PageNotPinned { .. }
                | MinirelError::PagePinned { .. }
        )
    }

    /// Returns true if the page index or frame table is inconsistent.
    pub fn is_index_inconsistency(&self) -> bool {
        matches!(
            self,
            MinirelError::HashTableError(_) | MinirelError::BadBuffer { .. }
        )
    }
}
