//! Minirel common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Minirel components.

pub mod config;
pub mod error;
pub mod file;
pub mod page;

pub use config::{BufferConfig, MinirelConfig, StorageConfig};
pub use error::{MinirelError, Result};
pub use file::{next_file_id, PagedFile};
pub use page::{zeroed_page, FileId, Page, PageKey, PageNo, PAGE_SIZE};
