//! Frame descriptors.

use minirel_common::{FileId, PageKey, PageNo, PagedFile};
use std::sync::Arc;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Returns the frame ID as an index into the frame table and pool.
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// Bookkeeping for one pool slot.
///
/// An empty descriptor has no file, no page, no pins and is clean. The
/// `set`/`clear` pair is the only way identity changes, which keeps
/// `valid == false` implying an unpinned, clean, fileless frame.
pub(crate) struct FrameDesc<F: PagedFile + ?Sized> {
    frame_id: FrameId,
    file: Option<Arc<F>>,
    page_no: Option<PageNo>,
    pin_count: u32,
    dirty: bool,
    valid: bool,
    ref_bit: bool,
}

impl<F: PagedFile + ?Sized> FrameDesc<F> {
    /// Creates an empty descriptor.
    pub(crate) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            file: None,
            page_no: None,
            pin_count: 0,
            dirty: false,
            valid: false,
            ref_bit: false,
        }
    }

    /// Occupies the frame with a freshly loaded page, pinned once.
    pub(crate) fn set(&mut self, file: Arc<F>, page_no: PageNo) {
        self.file = Some(file);
        self.page_no = Some(page_no);
        self.pin_count = 1;
        self.dirty = false;
        self.ref_bit = true;
        self.valid = true;
    }

    /// Returns the frame to the empty state.
    pub(crate) fn clear(&mut self) {
        self.file = None;
        self.page_no = None;
        self.pin_count = 0;
        self.dirty = false;
        self.ref_bit = false;
        self.valid = false;
    }

    #[inline]
    pub(crate) fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    #[inline]
    pub(crate) fn file(&self) -> Option<&Arc<F>> {
        self.file.as_ref()
    }

    #[inline]
    pub(crate) fn page_no(&self) -> Option<PageNo> {
        self.page_no
    }

    /// Identity of the cached page, if any.
    #[inline]
    pub(crate) fn key(&self) -> Option<PageKey> {
        match (&self.file, self.page_no) {
            (Some(file), Some(page_no)) => Some(PageKey::new(file.file_id(), page_no)),
            _ => None,
        }
    }

    /// Returns true if the frame's identity fields name `file_id`.
    #[inline]
    pub(crate) fn belongs_to(&self, file_id: FileId) -> bool {
        self.file.as_ref().is_some_and(|f| f.file_id() == file_id)
    }

    #[inline]
    pub(crate) fn pin_count(&self) -> u32 {
        self.pin_count
    }

    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    /// Adds a pin and marks the frame recently used.
    #[inline]
    pub(crate) fn pin(&mut self) {
        self.pin_count += 1;
        self.ref_bit = true;
    }

    /// Drops a pin. Returns false, leaving the count at zero, if unpinned.
    #[inline]
    pub(crate) fn unpin(&mut self) -> bool {
        if self.pin_count == 0 {
            return false;
        }
        self.pin_count -= 1;
        true
    }

    #[inline]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    #[inline]
    pub(crate) fn is_valid(&self) -> bool {
        self.valid
    }

    #[inline]
    pub(crate) fn ref_bit(&self) -> bool {
        self.ref_bit
    }

    #[inline]
    pub(crate) fn set_ref_bit(&mut self, value: bool) {
        self.ref_bit = value;
    }

    /// Captures the descriptor for diagnostics.
    pub(crate) fn info(&self) -> FrameInfo {
        FrameInfo {
            frame_id: self.frame_id,
            page: self.key(),
            pin_count: self.pin_count,
            dirty: self.dirty,
            valid: self.valid,
            ref_bit: self.ref_bit,
        }
    }
}

impl<F: PagedFile + ?Sized> std::fmt::Debug for FrameDesc<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDesc")
            .field("frame_id", &self.frame_id)
            .field("page", &self.key())
            .field("pin_count", &self.pin_count)
            .field("dirty", &self.dirty)
            .field("valid", &self.valid)
            .field("ref_bit", &self.ref_bit)
            .finish()
    }
}

/// Point-in-time copy of a frame descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    /// Cached page, None for an empty frame.
    pub page: Option<PageKey>,
    pub pin_count: u32,
    pub dirty: bool,
    pub valid: bool,
    pub ref_bit: bool,
}

impl std::fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t", self.frame_id.0)?;
        match self.page {
            Some(page) => write!(f, "{}", page)?,
            None => write!(f, "-")?,
        }
        write!(f, "\tpin_count: {}", self.pin_count)?;
        if self.valid {
            write!(f, "\tvalid")?;
        }
        if self.dirty {
            write!(f, "\tdirty")?;
        }
        if self.ref_bit {
            write!(f, "\tref")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirel_storage::MemFile;

    #[test]
    fn test_frame_id_index() {
        assert_eq!(FrameId(0).index(), 0);
        assert_eq!(FrameId(9).index(), 9);
    }

    #[test]
    fn test_frame_id_display() {
        let frame_id = FrameId(42);
        assert_eq!(frame_id.to_string(), "frame:42");
    }

    #[test]
    fn test_frame_desc_new_is_empty() {
        let frame: FrameDesc<MemFile> = FrameDesc::new(FrameId(3));

        assert_eq!(frame.frame_id(), FrameId(3));
        assert!(frame.file().is_none());
        assert!(frame.page_no().is_none());
        assert!(frame.key().is_none());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(!frame.is_valid());
        assert!(!frame.ref_bit());
    }

    #[test]
    fn test_frame_desc_set() {
        let file = Arc::new(MemFile::new());
        let mut frame = FrameDesc::new(FrameId(0));

        frame.set(Arc::clone(&file), 7);

        assert_eq!(frame.key(), Some(PageKey::new(file.file_id(), 7)));
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.is_valid());
        assert!(frame.ref_bit());
        assert!(!frame.is_dirty());
        assert!(frame.belongs_to(file.file_id()));
        assert!(!frame.belongs_to(file.file_id() + 1));
    }

    #[test]
    fn test_frame_desc_clear_restores_invariants() {
        let file = Arc::new(MemFile::new());
        let mut frame = FrameDesc::new(FrameId(0));
        frame.set(file, 1);
        frame.pin();
        frame.set_dirty(true);

        frame.clear();

        assert!(!frame.is_valid());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert!(frame.file().is_none());
        assert!(!frame.ref_bit());
        assert_eq!(frame.frame_id(), FrameId(0));
    }

    #[test]
    fn test_frame_desc_pin_unpin() {
        let file = Arc::new(MemFile::new());
        let mut frame = FrameDesc::new(FrameId(0));
        frame.set(file, 0);
        frame.set_ref_bit(false);

        frame.pin();
        assert_eq!(frame.pin_count(), 2);
        assert!(frame.ref_bit());

        assert!(frame.unpin());
        assert!(frame.unpin());
        assert!(!frame.is_pinned());

        // Underflow is refused and the count stays at zero.
        assert!(!frame.unpin());
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_file_reference_implies_valid() {
        let file = Arc::new(MemFile::new());
        let other = Arc::new(MemFile::new());
        let mut frame = FrameDesc::new(FrameId(0));

        let check = |frame: &FrameDesc<MemFile>| {
            for id in [file.file_id(), other.file_id()] {
                if frame.belongs_to(id) {
                    assert!(frame.is_valid());
                    assert!(frame.key().is_some());
                }
            }
            assert_eq!(frame.is_valid(), frame.file().is_some());
            assert_eq!(frame.is_valid(), frame.page_no().is_some());
        };

        check(&frame);
        frame.set(Arc::clone(&file), 3);
        check(&frame);
        frame.pin();
        frame.set_dirty(true);
        check(&frame);
        assert!(frame.unpin());
        assert!(frame.unpin());
        check(&frame);
        frame.clear();
        check(&frame);
        assert!(!frame.belongs_to(file.file_id()));
        frame.set(Arc::clone(&other), 0);
        check(&frame);
        assert!(!frame.belongs_to(file.file_id()));
        frame.clear();
        check(&frame);
    }

    #[test]
    fn test_frame_info_display() {
        let file = Arc::new(MemFile::new());
        let mut frame = FrameDesc::new(FrameId(5));
        frame.set(Arc::clone(&file), 10);
        frame.set_dirty(true);

        let text = frame.info().to_string();
        assert!(text.starts_with("5\t"));
        assert!(text.contains(&format!("{}:10", file.file_id())));
        assert!(text.contains("pin_count: 1"));
        assert!(text.contains("valid"));
        assert!(text.contains("dirty"));

        let empty: FrameDesc<MemFile> = FrameDesc::new(FrameId(6));
        assert_eq!(empty.info().to_string(), "6\t-\tpin_count: 0");
    }

    #[test]
    fn test_frame_desc_debug() {
        let frame: FrameDesc<MemFile> = FrameDesc::new(FrameId(5));
        let debug_str = format!("{:?}", frame);
        assert!(debug_str.contains("FrameDesc"));
        assert!(debug_str.contains("pin_count"));
    }
}
