//! Configuration structures for Minirel.

use crate::error::{MinirelError, Result};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use sysinfo::System;

/// Smallest pool `BufferConfig::auto_sized` will produce.
const MIN_AUTO_FRAMES: usize = 64;

/// Largest accepted `index_oversize`.
pub const MAX_INDEX_OVERSIZE: f64 = 16.0;

/// Buffer manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// Page index bucket count as a multiple of `num_frames`.
    pub index_oversize: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            num_frames: 1024,
            index_oversize: 1.2,
        }
    }
}

impl BufferConfig {
    /// Creates a config with `num_frames` frames and the default oversize.
    pub fn with_frames(num_frames: usize) -> Self {
        Self {
            num_frames,
            ..Default::default()
        }
    }

    /// Sizes the pool to 25% of available system RAM.
    ///
    /// Never goes below 64 frames so low-memory hosts still cache something.
    pub fn auto_sized() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(MIN_AUTO_FRAMES);

        Self::with_frames(num_frames)
    }

    /// Number of page index buckets: oversized and rounded up to odd.
    ///
    /// Fails unless the count stays within `MAX_INDEX_OVERSIZE` times the
    /// frame count.
    pub fn index_buckets(&self) -> Result<usize> {
        let invalid = || MinirelError::InvalidParameter {
            name: "index_oversize".to_string(),
            value: self.index_oversize.to_string(),
        };

        let limit = self
            .num_frames
            .checked_mul(MAX_INDEX_OVERSIZE as usize)
            .ok_or_else(invalid)?;
        let buckets = (self.num_frames as f64) * self.index_oversize;
        if !buckets.is_finite() || buckets < 0.0 || buckets > limit as f64 {
            return Err(invalid());
        }
        Ok((buckets as usize).max(1) | 1)
    }

    /// Returns the total pool size in bytes.
    pub fn pool_size_bytes(&self) -> usize {
        self.num_frames * PAGE_SIZE
    }

    /// Rejects configurations the buffer manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_frames == 0 {
            return Err(MinirelError::InvalidParameter {
                name: "num_frames".to_string(),
                value: self.num_frames.to_string(),
            });
        }
        if self.num_frames > u32::MAX as usize {
            return Err(MinirelError::InvalidParameter {
                name: "num_frames".to_string(),
                value: self.num_frames.to_string(),
            });
        }
        if !(1.0..=MAX_INDEX_OVERSIZE).contains(&self.index_oversize) {
            return Err(MinirelError::InvalidParameter {
                name: "index_oversize".to_string(),
                value: self.index_oversize.to_string(),
            });
        }
        self.index_buckets()?;
        Ok(())
    }
}

/// Storage configuration for on-disk paged files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after every page write.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Rejects configurations the disk manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(MinirelError::ConfigError("data_dir is empty".to_string()));
        }
        Ok(())
    }
}

/// Combined configuration for a Minirel instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinirelConfig {
    pub buffer: BufferConfig,
    pub storage: StorageConfig,
}

impl MinirelConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        self.storage.validate()
    }
}
