//! Page index mapping cached page identities to frames.

use crate::frame::FrameId;
use minirel_common::{MinirelError, PageKey, Result};

/// Chained hash table from `PageKey` to `FrameId`.
///
/// The bucket count is fixed at construction. The buffer manager sizes it a
/// little larger than the pool and odd, so chains stay short.
pub struct PageIndex {
    buckets: Box<[Vec<(PageKey, FrameId)>]>,
    len: usize,
}

impl PageIndex {
    /// Creates an index with `num_buckets` chains (at least one).
    pub fn new(num_buckets: usize) -> Self {
        let buckets = (0..num_buckets.max(1)).map(|_| Vec::new()).collect();
        Self { buckets, len: 0 }
    }

    #[inline(always)]
    fn bucket(&self, key: PageKey) -> usize {
        // FxHash-style multiply for distribution
        let hash = key.as_u64().wrapping_mul(0x517cc1b727220a95);
        ((hash >> 32) as usize) % self.buckets.len()
    }

    /// Maps `key` to `frame_id`. Fails if the key is already mapped.
    pub fn insert(&mut self, key: PageKey, frame_id: FrameId) -> Result<()> {
        let idx = self.bucket(key);
        let chain = &mut self.buckets[idx];
        if let Some((_, existing)) = chain.iter().find(|(k, _)| *k == key) {
            return Err(MinirelError::HashTableError(format!(
                "page {} already mapped to {}",
                key, existing
            )));
        }
        chain.push((key, frame_id));
        self.len += 1;
        Ok(())
    }

    /// Looks up the frame caching `key`.
    ///
    /// Absence is reported as `HashNotFound`, distinct from other errors.
    #[inline]
    pub fn lookup(&self, key: PageKey) -> Result<FrameId> {
        self.buckets[self.bucket(key)]
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, frame_id)| *frame_id)
            .ok_or(MinirelError::HashNotFound { page: key })
    }

    /// Removes the mapping for `key` and returns the frame it pointed at.
    pub fn remove(&mut self, key: PageKey) -> Result<FrameId> {
        let idx = self.bucket(key);
        let chain = &mut self.buckets[idx];
        match chain.iter().position(|(k, _)| *k == key) {
            Some(pos) => {
                let (_, frame_id) = chain.swap_remove(pos);
                self.len -= 1;
                Ok(frame_id)
            }
            None => Err(MinirelError::HashNotFound { page: key }),
        }
    }

    /// Returns true if the key is in the index.
    pub fn contains(&self, key: PageKey) -> bool {
        self.lookup(key).is_ok()
    }

    /// Returns the number of entries in the index.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of chains.
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        for chain in self.buckets.iter_mut() {
            chain.clear();
        }
        self.len = 0;
    }

    /// Iterates over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (PageKey, FrameId)> + '_ {
        self.buckets.iter().flat_map(|chain| chain.iter().copied())
    }
}

impl std::fmt::Debug for PageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageIndex")
            .field("len", &self.len)
            .field("num_buckets", &self.buckets.len())
            .finish()
    }
}
