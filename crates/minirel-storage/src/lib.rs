//! Paged file backends for Minirel.
//!
//! This crate provides:
//! - `DiskFile`, a paged file stored in one OS file with an on-disk free list
//! - `DiskManager` for creating, opening and destroying paged files
//! - `MemFile`, an in-memory paged file with I/O counters and fault injection

mod disk;
mod mem;

pub use disk::{DiskFile, DiskManager};
pub use mem::MemFile;
