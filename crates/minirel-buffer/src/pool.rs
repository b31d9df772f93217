//! Buffer manager.

use crate::frame::{FrameDesc, FrameId, FrameInfo};
use crate::page_table::PageIndex;
use crate::replacer::{ClockChoice, ClockReplacer};
use minirel_common::{
    zeroed_page, BufferConfig, MinirelError, Page, PageKey, PageNo, PagedFile, Result, PAGE_SIZE,
};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Counters kept by the buffer manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Calls to `fetch`, hits and misses alike.
    pub accesses: u64,
    /// Misses that went to the paged file.
    pub disk_reads: u64,
    /// Pages written back, by eviction, flush or teardown.
    pub disk_writes: u64,
    /// Occupied frames reclaimed by the clock scan.
    pub evictions: u64,
    /// Frames visited by the clock hand.
    pub clock_steps: u64,
}

impl BufferStats {
    /// Fetches served without I/O.
    pub fn hits(&self) -> u64 {
        self.accesses.saturating_sub(self.disk_reads)
    }

    /// Fraction of fetches served without I/O, 0.0 when nothing was fetched.
    pub fn hit_ratio(&self) -> f64 {
        if self.accesses == 0 {
            return 0.0;
        }
        self.hits() as f64 / self.accesses as f64
    }
}

impl std::fmt::Display for BufferStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "accesses: {}, disk reads: {}, disk writes: {}, evictions: {}, clock steps: {}",
            self.accesses, self.disk_reads, self.disk_writes, self.evictions, self.clock_steps
        )
    }
}

/// Point-in-time view of every frame, used for diagnostics.
#[derive(Debug, Clone)]
pub struct BufferSnapshot {
    pub frames: Vec<FrameInfo>,
    pub stats: BufferStats,
    pub clock_hand: usize,
}

impl BufferSnapshot {
    /// Number of frames holding a page.
    pub fn valid_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.valid).count()
    }

    /// Number of frames with at least one pin.
    pub fn pinned_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.pin_count > 0).count()
    }

    /// Number of frames holding unwritten changes.
    pub fn dirty_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.dirty).count()
    }
}

impl std::fmt::Display for BufferSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Buffer pool: {} frames, clock hand at {}",
            self.frames.len(),
            self.clock_hand
        )?;
        for frame in &self.frames {
            writeln!(f, "{}", frame)?;
        }
        writeln!(f, "{} valid frames", self.valid_frames())?;
        write!(f, "{}", self.stats)
    }
}

/// Everything the table lock protects.
struct BufferState<F: PagedFile + ?Sized> {
    frames: Vec<FrameDesc<F>>,
    index: PageIndex,
    clock: ClockReplacer,
    stats: BufferStats,
}

/// Buffer manager.
///
/// Caches pages of any number of paged files in a fixed set of frames:
/// - Page index from `PageKey` to frame
/// - Clock replacement with reference bits
/// - Pin counting, a pinned frame is never evicted
/// - Dirty tracking with write-back on eviction, flush and teardown
///
/// Descriptors, index, clock hand and counters sit behind one mutex that
/// every operation holds until it returns, I/O included. Page bytes live in
/// per-frame `RwLock`s reached through [`PageHandle`].
pub struct BufferManager<F: PagedFile + ?Sized = dyn PagedFile> {
    config: BufferConfig,
    state: Mutex<BufferState<F>>,
    pool: Box<[RwLock<Box<Page>>]>,
}

impl<F: PagedFile + ?Sized> BufferManager<F> {
    /// Creates a buffer manager with `config.num_frames` empty frames.
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        let num_frames = config.num_frames;

        let frames = (0..num_frames)
            .map(|i| FrameDesc::new(FrameId(i as u32)))
            .collect();
        let pool = (0..num_frames)
            .map(|_| RwLock::new(zeroed_page()))
            .collect();
        let index = PageIndex::new(config.index_buckets()?);

        info!(
            num_frames,
            index_buckets = index.num_buckets(),
            pool_bytes = config.pool_size_bytes(),
            "Buffer manager created"
        );

        Ok(Self {
            config,
            state: Mutex::new(BufferState {
                frames,
                index,
                clock: ClockReplacer::new(num_frames),
                stats: BufferStats::default(),
            }),
            pool,
        })
    }

    /// Creates a buffer manager sized from available system memory.
    pub fn auto_sized() -> Result<Self> {
        Self::new(BufferConfig::auto_sized())
    }

    /// Returns the configuration the manager was built with.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of pages currently cached.
    pub fn page_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Checks if a page is cached.
    pub fn contains(&self, file: &F, page_no: PageNo) -> bool {
        let key = PageKey::new(file.file_id(), page_no);
        self.state.lock().index.contains(key)
    }

    /// Returns the pin count of a cached page, None if it is not cached.
    pub fn pin_count(&self, file: &F, page_no: PageNo) -> Option<u32> {
        let key = PageKey::new(file.file_id(), page_no);
        let state = self.state.lock();
        let frame_id = state.index.lookup(key).ok()?;
        Some(state.frames[frame_id.index()].pin_count())
    }

    /// Obtains a frame with the clock scan.
    ///
    /// A dirty victim is written back before anything else changes. If that
    /// write fails the victim stays cached, dirty and valid. The frame
    /// returned is empty.
    fn allocate_frame(&self, state: &mut BufferState<F>) -> Result<FrameId> {
        let BufferState {
            frames,
            index,
            clock,
            stats,
        } = state;

        let scan = clock.choose(frames);
        stats.clock_steps += scan.steps;

        let frame_id = match scan.choice {
            Some(ClockChoice::Free(frame_id)) => {
                trace!(%frame_id, steps = scan.steps, "Clock chose empty frame");
                return Ok(frame_id);
            }
            Some(ClockChoice::Victim(frame_id)) => frame_id,
            None => {
                debug!(steps = scan.steps, "Clock scan found every frame pinned");
                return Err(MinirelError::BufferExceeded);
            }
        };

        let frame = &mut frames[frame_id.index()];
        let key = frame.key().ok_or_else(|| MinirelError::BadBuffer {
            frame: frame_id.0,
            reason: "valid frame has no page".to_string(),
        })?;

        let was_dirty = frame.is_dirty();
        if was_dirty {
            write_frame(&self.pool, frame)?;
            frame.set_dirty(false);
            stats.disk_writes += 1;
        }

        index.remove(key)?;
        frame.clear();
        stats.evictions += 1;

        debug!(%frame_id, page = %key, dirty = was_dirty, steps = scan.steps, "Evicted page");
        Ok(frame_id)
    }

    /// Fetches a page, reading it from `file` on a miss.
    ///
    /// The page is pinned once more on return. Every successful call must be
    /// matched by exactly one [`unpin`](Self::unpin).
    pub fn fetch(&self, file: &Arc<F>, page_no: PageNo) -> Result<PageHandle<'_, F>> {
        let key = PageKey::new(file.file_id(), page_no);
        let mut state = self.state.lock();
        state.stats.accesses += 1;

        match state.index.lookup(key) {
            Ok(frame_id) => {
                let frame = &mut state.frames[frame_id.index()];
                frame.pin();
                trace!(page = %key, %frame_id, pin_count = frame.pin_count(), "Buffer hit");
                return Ok(PageHandle::new(self, frame_id, key));
            }
            Err(MinirelError::HashNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let frame_id = self.allocate_frame(&mut state)?;

        state.stats.disk_reads += 1;
        {
            let mut data = self.pool[frame_id.index()].write();
            file.read_page(page_no, &mut data)?;
        }

        state.index.insert(key, frame_id)?;
        state.frames[frame_id.index()].set(Arc::clone(file), page_no);

        debug!(page = %key, %frame_id, "Buffer miss, page read");
        Ok(PageHandle::new(self, frame_id, key))
    }

    /// Releases one pin on a cached page.
    ///
    /// `dirty` only ever sets the dirty flag, it never clears it.
    pub fn unpin(&self, file: &F, page_no: PageNo, dirty: bool) -> Result<()> {
        let key = PageKey::new(file.file_id(), page_no);
        let mut state = self.state.lock();

        let frame_id = state.index.lookup(key)?;
        let frame = &mut state.frames[frame_id.index()];
        if !frame.unpin() {
            return Err(MinirelError::PageNotPinned { page: key });
        }
        if dirty {
            frame.set_dirty(true);
        }

        trace!(page = %key, pin_count = frame.pin_count(), dirty, "Unpinned page");
        Ok(())
    }

    /// Allocates a new page in `file` and caches it zero-filled and pinned.
    ///
    /// If no frame can be obtained the page stays allocated in the file but
    /// is not cached. Releasing it is up to the caller.
    pub fn allocate_new(&self, file: &Arc<F>) -> Result<(PageNo, PageHandle<'_, F>)> {
        let mut state = self.state.lock();

        let page_no = file.allocate_page()?;
        let key = PageKey::new(file.file_id(), page_no);

        let frame_id = match self.allocate_frame(&mut state) {
            Ok(frame_id) => frame_id,
            Err(e) => {
                debug!(page = %key, error = %e, "No frame for new page, left allocated in file");
                return Err(e);
            }
        };

        state.index.insert(key, frame_id)?;
        self.pool[frame_id.index()].write().fill(0);
        state.frames[frame_id.index()].set(Arc::clone(file), page_no);

        debug!(page = %key, %frame_id, "Allocated new page");
        Ok((page_no, PageHandle::new(self, frame_id, key)))
    }

    /// Drops a page from the cache, without writing it, and releases it in
    /// the file.
    ///
    /// A page that is not cached is simply released. A pinned page is
    /// refused with `PagePinned` and nothing changes.
    pub fn dispose(&self, file: &F, page_no: PageNo) -> Result<()> {
        let key = PageKey::new(file.file_id(), page_no);
        let mut state = self.state.lock();

        match state.index.lookup(key) {
            Ok(frame_id) => {
                if state.frames[frame_id.index()].is_pinned() {
                    return Err(MinirelError::PagePinned { page: key });
                }
                state.index.remove(key)?;
                state.frames[frame_id.index()].clear();
            }
            Err(MinirelError::HashNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        file.dispose_page(page_no)?;
        debug!(page = %key, "Disposed page");
        Ok(())
    }

    /// Writes back and evicts every cached page of `file`.
    ///
    /// If any of those pages is pinned, fails with `PagePinned` before
    /// touching a single frame. Returns the number of pages written.
    pub fn flush_file(&self, file: &F) -> Result<usize> {
        let file_id = file.file_id();
        let mut state = self.state.lock();

        // `FrameDesc::set` and `clear` move file, page and valid together, so
        // the BadBuffer arms below only fire on corrupted descriptors.
        for frame in state.frames.iter().filter(|f| f.belongs_to(file_id)) {
            if !frame.is_valid() {
                return Err(MinirelError::BadBuffer {
                    frame: frame.frame_id().0,
                    reason: format!("invalid frame still refers to file {}", file_id),
                });
            }
            match frame.key() {
                Some(page) if frame.is_pinned() => {
                    return Err(MinirelError::PagePinned { page });
                }
                Some(_) => {}
                None => {
                    return Err(MinirelError::BadBuffer {
                        frame: frame.frame_id().0,
                        reason: "valid frame has no page".to_string(),
                    });
                }
            }
        }

        let BufferState {
            frames,
            index,
            stats,
            ..
        } = &mut *state;

        let mut written = 0;
        for frame in frames.iter_mut().filter(|f| f.belongs_to(file_id)) {
            if frame.is_dirty() {
                write_frame(&self.pool, frame)?;
                frame.set_dirty(false);
                stats.disk_writes += 1;
                written += 1;
            }
            if let Some(key) = frame.key() {
                index.remove(key)?;
            }
            frame.clear();
        }

        debug!(file_id, written, "Flushed file");
        Ok(written)
    }

    /// Writes back every dirty page without evicting anything.
    ///
    /// Pinned pages are written too. Returns the number of pages written.
    pub fn flush_all(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let BufferState { frames, stats, .. } = &mut *state;

        let mut written = 0;
        for frame in frames.iter_mut().filter(|f| f.is_valid() && f.is_dirty()) {
            write_frame(&self.pool, frame)?;
            frame.set_dirty(false);
            stats.disk_writes += 1;
            written += 1;
        }

        debug!(written, "Flushed all dirty pages");
        Ok(written)
    }

    /// Returns the counters.
    pub fn stats(&self) -> BufferStats {
        self.state.lock().stats
    }

    /// Zeroes the counters.
    pub fn reset_stats(&self) {
        self.state.lock().stats = BufferStats::default();
    }

    /// Captures every frame descriptor. Its `Display` is the diagnostic dump.
    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.state.lock();
        BufferSnapshot {
            frames: state.frames.iter().map(FrameDesc::info).collect(),
            stats: state.stats,
            clock_hand: state.clock.hand(),
        }
    }

    /// Writes back every dirty page and empties the pool.
    ///
    /// Every frame is attempted. Returns the number of pages written, or the
    /// first write error.
    pub fn shutdown(mut self) -> Result<usize> {
        let (written, first_error) = self.write_back_all();
        info!(written, "Buffer manager shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn write_back_all(&mut self) -> (usize, Option<MinirelError>) {
        let state = self.state.get_mut();
        let mut written = 0;
        let mut first_error = None;

        for frame in state.frames.iter_mut() {
            if frame.is_valid() && frame.is_dirty() {
                match write_frame(&self.pool, frame) {
                    Ok(()) => {
                        state.stats.disk_writes += 1;
                        written += 1;
                    }
                    Err(e) => {
                        warn!(
                            frame = %frame.frame_id(),
                            page = ?frame.key(),
                            error = %e,
                            "Write-back failed during teardown"
                        );
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            frame.clear();
        }
        state.index.clear();

        (written, first_error)
    }
}

impl<F: PagedFile + ?Sized> Drop for BufferManager<F> {
    fn drop(&mut self) {
        let (written, first_error) = self.write_back_all();
        if written > 0 || first_error.is_some() {
            debug!(written, failed = first_error.is_some(), "Buffer manager dropped");
        }
    }
}

impl<F: PagedFile + ?Sized> std::fmt::Debug for BufferManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferManager")
            .field("num_frames", &self.config.num_frames)
            .field("cached_pages", &state.index.len())
            .field("clock_hand", &state.clock.hand())
            .field("stats", &state.stats)
            .finish()
    }
}

/// Writes a frame's pool slot to its page in its file.
fn write_frame<F: PagedFile + ?Sized>(
    pool: &[RwLock<Box<Page>>],
    frame: &FrameDesc<F>,
) -> Result<()> {
    let (file, page_no) = match (frame.file(), frame.page_no()) {
        (Some(file), Some(page_no)) => (file, page_no),
        _ => {
            return Err(MinirelError::BadBuffer {
                frame: frame.frame_id().0,
                reason: "dirty frame has no page".to_string(),
            })
        }
    };
    let data = pool[frame.frame_id().index()].read();
    file.write_page(page_no, &data)
}

/// Access to a pinned page.
///
/// Dropping the handle does not release the pin. Call
/// [`BufferManager::unpin`] exactly once per successful fetch or allocate,
/// after every guard from [`read`](Self::read) or [`write`](Self::write) is
/// gone. Holding a guard across another call into the manager can deadlock.
pub struct PageHandle<'a, F: PagedFile + ?Sized = dyn PagedFile> {
    manager: &'a BufferManager<F>,
    frame_id: FrameId,
    key: PageKey,
}

impl<'a, F: PagedFile + ?Sized> PageHandle<'a, F> {
    fn new(manager: &'a BufferManager<F>, frame_id: FrameId, key: PageKey) -> Self {
        Self {
            manager,
            frame_id,
            key,
        }
    }

    /// Returns the frame holding the page.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page identity.
    pub fn page_key(&self) -> PageKey {
        self.key
    }

    /// Returns the page number within its file.
    pub fn page_no(&self) -> PageNo {
        self.key.page_no
    }

    /// Returns a read guard for the page bytes.
    pub fn read(&self) -> MappedRwLockReadGuard<'a, Page> {
        let slot = &self.manager.pool[self.frame_id.index()];
        RwLockReadGuard::map(slot.read(), |data| &**data)
    }

    /// Returns a write guard for the page bytes.
    ///
    /// Writing does not mark the page dirty; pass `dirty = true` to unpin.
    pub fn write(&self) -> MappedRwLockWriteGuard<'a, Page> {
        let slot = &self.manager.pool[self.frame_id.index()];
        RwLockWriteGuard::map(slot.write(), |data| &mut **data)
    }

    /// Copies `src` into the start of the page, truncated to the page size.
    pub fn copy_from(&self, src: &[u8]) {
        let len = src.len().min(PAGE_SIZE);
        self.write()[..len].copy_from_slice(&src[..len]);
    }

    /// Copies the start of the page into `dst`, truncated to the page size.
    pub fn copy_to(&self, dst: &mut [u8]) {
        let len = dst.len().min(PAGE_SIZE);
        dst[..len].copy_from_slice(&self.read()[..len]);
    }

    /// Returns the current pin count of the page.
    pub fn pin_count(&self) -> u32 {
        self.manager.state.lock().frames[self.frame_id.index()].pin_count()
    }
}

impl<F: PagedFile + ?Sized> std::fmt::Debug for PageHandle<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("frame_id", &self.frame_id)
            .field("page", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirel_storage::MemFile;

    fn manager(num_frames: usize) -> BufferManager<MemFile> {
        BufferManager::new(BufferConfig::with_frames(num_frames)).unwrap()
    }

    #[test]
    fn test_buffer_manager_new() {
        let bm = manager(10);
        assert_eq!(bm.num_frames(), 10);
        assert_eq!(bm.page_count(), 0);
        assert_eq!(bm.snapshot().clock_hand, 9);
        assert_eq!(bm.stats(), BufferStats::default());
    }

    #[test]
    fn test_zero_frames_rejected() {
        let result = BufferManager::<MemFile>::new(BufferConfig::with_frames(0));
        assert!(matches!(
            result,
            Err(MinirelError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_unbounded_index_oversize_rejected() {
        for index_oversize in [f64::INFINITY, 1e300] {
            let result = BufferManager::<MemFile>::new(BufferConfig {
                num_frames: 4,
                index_oversize,
            });
            assert!(matches!(
                result,
                Err(MinirelError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_fetch_miss_then_hit() {
        let file = Arc::new(MemFile::with_pages(4));
        let bm = manager(4);

        let handle = bm.fetch(&file, 2).unwrap();
        assert_eq!(handle.page_no(), 2);
        assert_eq!(handle.pin_count(), 1);
        assert_eq!(file.reads(2), 1);

        let again = bm.fetch(&file, 2).unwrap();
        assert_eq!(again.frame_id(), handle.frame_id());
        assert_eq!(again.pin_count(), 2);
        assert_eq!(file.reads(2), 1);

        let stats = bm.stats();
        assert_eq!(stats.accesses, 2);
        assert_eq!(stats.disk_reads, 1);
        assert_eq!(stats.hits(), 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fetch_reads_page_contents() {
        let file = Arc::new(MemFile::with_pages(1));
        let mut data = [0u8; PAGE_SIZE];
        data[..5].copy_from_slice(b"hello");
        file.write_page(0, &data).unwrap();

        let bm = manager(2);
        let handle = bm.fetch(&file, 0).unwrap();
        assert_eq!(&handle.read()[..5], b"hello");

        let mut out = [0u8; 5];
        handle.copy_to(&mut out);
        assert_eq!(&out, b"hello");
        bm.unpin(&file, 0, false).unwrap();
    }

    #[test]
    fn test_fetch_unallocated_page_fails() {
        let file = Arc::new(MemFile::with_pages(1));
        let bm = manager(2);

        let err = bm.fetch(&file, 9).unwrap_err();
        assert!(matches!(err, MinirelError::PageNotFound { .. }));
        assert!(!bm.contains(&file, 9));
        assert_eq!(bm.snapshot().valid_frames(), 0);
    }

    #[test]
    fn test_unpin_errors() {
        let file = Arc::new(MemFile::with_pages(2));
        let bm = manager(2);

        let err = bm.unpin(&file, 0, false).unwrap_err();
        assert!(matches!(err, MinirelError::HashNotFound { .. }));

        bm.fetch(&file, 0).unwrap();
        bm.unpin(&file, 0, false).unwrap();
        assert_eq!(bm.pin_count(&file, 0), Some(0));

        let err = bm.unpin(&file, 0, false).unwrap_err();
        assert!(matches!(err, MinirelError::PageNotPinned { .. }));
        assert_eq!(bm.pin_count(&file, 0), Some(0));
    }

    #[test]
    fn test_unpin_dirty_is_sticky() {
        let file = Arc::new(MemFile::with_pages(1));
        let bm = manager(2);

        bm.fetch(&file, 0).unwrap();
        bm.fetch(&file, 0).unwrap();
        bm.unpin(&file, 0, true).unwrap();
        bm.unpin(&file, 0, false).unwrap();

        let snapshot = bm.snapshot();
        let info = snapshot.frames.iter().find(|f| f.valid).unwrap();
        assert!(info.dirty);
        assert_eq!(info.pin_count, 0);
    }

    #[test]
    fn test_dirty_victim_written_once() {
        let file = Arc::new(MemFile::with_pages(3));
        let bm = manager(1);

        let handle = bm.fetch(&file, 0).unwrap();
        handle.write()[0] = 42;
        bm.unpin(&file, 0, true).unwrap();

        bm.fetch(&file, 1).unwrap();
        assert_eq!(file.writes(0), 1);
        assert_eq!(file.stored_page(0).unwrap()[0], 42);
        assert!(!bm.contains(&file, 0));

        let stats = bm.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.disk_writes, 1);
    }

    #[test]
    fn test_clean_victim_not_written() {
        let file = Arc::new(MemFile::with_pages(3));
        let bm = manager(1);

        bm.fetch(&file, 0).unwrap();
        bm.unpin(&file, 0, false).unwrap();
        bm.fetch(&file, 1).unwrap();

        assert_eq!(file.total_writes(), 0);
        assert_eq!(bm.stats().evictions, 1);
    }

    #[test]
    fn test_all_pinned_is_buffer_exceeded() {
        let file = Arc::new(MemFile::with_pages(4));
        let bm = manager(2);

        bm.fetch(&file, 0).unwrap();
        bm.fetch(&file, 1).unwrap();

        let err = bm.fetch(&file, 2).unwrap_err();
        assert!(matches!(err, MinirelError::BufferExceeded));
        assert!(err.is_retryable());
        assert_eq!(bm.pin_count(&file, 0), Some(1));
        assert_eq!(bm.pin_count(&file, 1), Some(1));
        assert_eq!(file.reads(2), 0);
    }

    #[test]
    fn test_allocate_new() {
        let file = Arc::new(MemFile::new());
        let bm = manager(2);

        let (page_no, handle) = bm.allocate_new(&file).unwrap();
        assert_eq!(page_no, 0);
        assert_eq!(handle.pin_count(), 1);
        assert!(handle.read().iter().all(|&b| b == 0));
        assert!(file.is_allocated(0));
        assert_eq!(file.total_reads(), 0);

        handle.copy_from(b"new page");
        bm.unpin(&file, page_no, true).unwrap();
        assert_eq!(bm.flush_all().unwrap(), 1);
        assert_eq!(&file.stored_page(0).unwrap()[..8], b"new page");
    }

    #[test]
    fn test_allocate_new_zeroes_reused_frame() {
        let file = Arc::new(MemFile::with_pages(1));
        let bm = manager(1);

        let handle = bm.fetch(&file, 0).unwrap();
        handle.write().fill(0xFF);
        bm.unpin(&file, 0, false).unwrap();

        let (page_no, handle) = bm.allocate_new(&file).unwrap();
        assert_eq!(page_no, 1);
        assert!(handle.read().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_new_storage_full() {
        let file = Arc::new(MemFile::new().with_max_pages(1));
        let bm = manager(4);

        bm.allocate_new(&file).unwrap();
        let err = bm.allocate_new(&file).unwrap_err();
        assert!(matches!(err, MinirelError::StorageFull { .. }));
        assert_eq!(bm.page_count(), 1);
    }

    #[test]
    fn test_dispose_cached_page() {
        let file = Arc::new(MemFile::with_pages(2));
        let bm = manager(2);

        bm.fetch(&file, 1).unwrap();
        bm.unpin(&file, 1, true).unwrap();
        bm.dispose(&file, 1).unwrap();

        assert!(!bm.contains(&file, 1));
        assert!(!file.is_allocated(1));
        // Disposed pages are dropped, not written.
        assert_eq!(file.writes(1), 0);
    }

    #[test]
    fn test_dispose_pinned_rejected() {
        let file = Arc::new(MemFile::with_pages(2));
        let bm = manager(2);

        bm.fetch(&file, 1).unwrap();
        let err = bm.dispose(&file, 1).unwrap_err();
        assert!(matches!(err, MinirelError::PagePinned { .. }));
        assert!(bm.contains(&file, 1));
        assert!(file.is_allocated(1));
        assert_eq!(bm.pin_count(&file, 1), Some(1));
    }

    #[test]
    fn test_flush_file_evicts_only_that_file() {
        let a = Arc::new(MemFile::with_pages(2));
        let b = Arc::new(MemFile::with_pages(2));
        let bm = manager(4);

        for page_no in 0..2 {
            bm.fetch(&a, page_no).unwrap();
            bm.unpin(&a, page_no, page_no == 0).unwrap();
            bm.fetch(&b, page_no).unwrap();
            bm.unpin(&b, page_no, true).unwrap();
        }

        assert_eq!(bm.flush_file(&a).unwrap(), 1);
        assert_eq!(a.writes(0), 1);
        assert_eq!(a.writes(1), 0);
        assert!(!bm.contains(&a, 0));
        assert!(!bm.contains(&a, 1));

        assert!(bm.contains(&b, 0));
        assert_eq!(b.total_writes(), 0);
        assert_eq!(bm.snapshot().dirty_frames(), 2);
    }

    #[test]
    fn test_flush_all_keeps_pages_cached() {
        let file = Arc::new(MemFile::with_pages(2));
        let bm = manager(2);

        bm.fetch(&file, 0).unwrap();
        bm.unpin(&file, 0, true).unwrap();
        bm.fetch(&file, 1).unwrap();

        assert_eq!(bm.flush_all().unwrap(), 1);
        assert_eq!(bm.flush_all().unwrap(), 0);
        assert!(bm.contains(&file, 0));
        assert!(bm.contains(&file, 1));
        assert_eq!(bm.snapshot().dirty_frames(), 0);
    }

    #[test]
    fn test_reset_stats() {
        let file = Arc::new(MemFile::with_pages(1));
        let bm = manager(1);

        bm.fetch(&file, 0).unwrap();
        assert_ne!(bm.stats(), BufferStats::default());
        bm.reset_stats();
        assert_eq!(bm.stats(), BufferStats::default());
    }

    #[test]
    fn test_snapshot_display() {
        let file = Arc::new(MemFile::with_pages(1));
        let bm = manager(2);
        bm.fetch(&file, 0).unwrap();

        let dump = bm.snapshot().to_string();
        assert!(dump.starts_with("Buffer pool: 2 frames"));
        assert!(dump.contains(&format!("{}:0", file.file_id())));
        assert!(dump.contains("1 valid frames"));
        assert!(dump.contains("accesses: 1"));
    }

    #[test]
    fn test_shutdown_writes_dirty_pages() {
        let file = Arc::new(MemFile::with_pages(3));
        let bm = manager(3);

        for page_no in 0..3 {
            bm.fetch(&file, page_no).unwrap();
            bm.unpin(&file, page_no, page_no != 1).unwrap();
        }

        assert_eq!(bm.shutdown().unwrap(), 2);
        assert_eq!(file.writes(0), 1);
        assert_eq!(file.writes(1), 0);
        assert_eq!(file.writes(2), 1);
    }

    #[test]
    fn test_shutdown_reports_first_error() {
        let file = Arc::new(MemFile::with_pages(1));
        let bm = manager(1);

        bm.fetch(&file, 0).unwrap();
        bm.unpin(&file, 0, true).unwrap();
        file.set_fail_writes(true);

        assert!(matches!(bm.shutdown(), Err(MinirelError::IoError(_))));
    }

    #[test]
    fn test_drop_writes_dirty_pages() {
        let file = Arc::new(MemFile::with_pages(2));
        {
            let bm = manager(2);
            let handle = bm.fetch(&file, 1).unwrap();
            handle.write()[7] = 7;
            bm.unpin(&file, 1, true).unwrap();
        }
        assert_eq!(file.writes(1), 1);
        assert_eq!(file.stored_page(1).unwrap()[7], 7);
    }

    #[test]
    fn test_drop_ignores_write_failures() {
        let file = Arc::new(MemFile::with_pages(2));
        {
            let bm = manager(2);
            bm.fetch(&file, 0).unwrap();
            bm.unpin(&file, 0, true).unwrap();
            file.set_fail_writes(true);
        }
        assert_eq!(file.total_writes(), 0);
    }
}
