//! On-disk paged files and the manager that creates and opens them.

use minirel_common::{
    next_file_id, zeroed_page, FileId, MinirelError, Page, PageKey, PageNo, PagedFile, Result,
    StorageConfig, PAGE_SIZE,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Magic number at the start of every paged file ("MREL").
const FILE_MAGIC: u32 = 0x4C45_524D;

/// Sentinel for an empty free list.
const NO_PAGE: u32 = u32::MAX;

/// Header stored in the first page of a paged file.
///
/// Layout (20 bytes, rest of the header page is zero):
/// - magic: 4 bytes
/// - num_pages: 4 bytes (data pages ever allocated)
/// - free_head: 4 bytes (first disposed page, NO_PAGE = none)
/// - free_count: 4 bytes
/// - checksum: 4 bytes (CRC32 of the preceding 16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileHeader {
    num_pages: u32,
    free_head: u32,
    free_count: u32,
}

impl FileHeader {
    const SIZE: usize = 20;

    fn new() -> Self {
        Self {
            num_pages: 0,
            free_head: NO_PAGE,
            free_count: 0,
        }
    }

    fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&FILE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[8..12].copy_from_slice(&self.free_head.to_le_bytes());
        buf[12..16].copy_from_slice(&self.free_count.to_le_bytes());
        let checksum = crc32fast::hash(&buf[0..16]);
        buf[16..20].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8], path: &Path) -> Result<Self> {
        let corrupted = |reason: &str| MinirelError::FileCorrupted {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        if buf.len() < Self::SIZE {
            return Err(corrupted("short header"));
        }

        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        if word(0) != FILE_MAGIC {
            return Err(corrupted("bad magic"));
        }
        if crc32fast::hash(&buf[0..16]) != word(16) {
            return Err(corrupted("header checksum mismatch"));
        }

        Ok(Self {
            num_pages: word(4),
            free_head: word(8),
            free_count: word(12),
        })
    }
}

/// Byte offset of a data page. The header occupies the first page.
#[inline]
fn page_offset(page_no: PageNo) -> u64 {
    (page_no as u64 + 1) * PAGE_SIZE as u64
}

/// A paged file stored in one OS file.
///
/// Disposed pages are chained into a free list through their first four
/// bytes and handed out again by `allocate_page`. Reading or writing a page
/// that is not currently allocated fails with `PageNotFound`.
pub struct DiskFile {
    file_id: FileId,
    path: PathBuf,
    fsync_enabled: bool,
    inner: Mutex<DiskFileInner>,
}

struct DiskFileInner {
    file: File,
    header: FileHeader,
    /// Page numbers currently on the free list.
    free: HashSet<PageNo>,
}

impl DiskFile {
    /// Creates a new, empty paged file. Fails if the path already exists.
    pub fn create(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let header = FileHeader::new();
        let mut inner = DiskFileInner {
            file,
            header,
            free: HashSet::new(),
        };
        inner.write_header(&header, fsync_enabled)?;

        Ok(Self {
            file_id: next_file_id(),
            path,
            fsync_enabled,
            inner: Mutex::new(inner),
        })
    }

    /// Opens an existing paged file and rebuilds its free list.
    pub fn open(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut raw = [0u8; FileHeader::SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut raw).map_err(|_| MinirelError::FileCorrupted {
            path: path.display().to_string(),
            reason: "short header".to_string(),
        })?;
        let header = FileHeader::from_bytes(&raw, &path)?;

        let mut inner = DiskFileInner {
            file,
            header,
            free: HashSet::new(),
        };
        inner.load_free_list(&path)?;

        Ok(Self {
            file_id: next_file_id(),
            path,
            fsync_enabled,
            inner: Mutex::new(inner),
        })
    }

    /// Returns the path of the underlying OS file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data pages ever allocated, including disposed ones.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().header.num_pages
    }

    /// Number of disposed pages waiting for reuse.
    pub fn free_pages(&self) -> u32 {
        self.inner.lock().header.free_count
    }

    /// Flushes OS buffers for this file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn check_allocated(&self, inner: &DiskFileInner, page_no: PageNo) -> Result<()> {
        if page_no >= inner.header.num_pages || inner.free.contains(&page_no) {
            return Err(MinirelError::PageNotFound {
                page: PageKey::new(self.file_id, page_no),
            });
        }
        Ok(())
    }
}

impl DiskFileInner {
    /// Writes `header` to disk. `self.header` is left for the caller to
    /// update once every write of the operation succeeded.
    fn write_header(&mut self, header: &FileHeader, fsync: bool) -> Result<()> {
        let mut raw = zeroed_page();
        raw[..FileHeader::SIZE].copy_from_slice(&header.to_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&raw[..])?;
        if fsync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn read_raw(&mut self, page_no: PageNo, page: &mut Page) -> Result<()> {
        self.file.seek(SeekFrom::Start(page_offset(page_no)))?;
        self.file.read_exact(page)?;
        Ok(())
    }

    fn write_raw(&mut self, page_no: PageNo, page: &Page, fsync: bool) -> Result<()> {
        self.file.seek(SeekFrom::Start(page_offset(page_no)))?;
        self.file.write_all(page)?;
        if fsync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Follows the on-disk free chain, rejecting loops and dangling links.
    fn load_free_list(&mut self, path: &Path) -> Result<()> {
        let mut page = zeroed_page();
        let mut next = self.header.free_head;
        for _ in 0..self.header.free_count {
            if next >= self.header.num_pages || !self.free.insert(next) {
                return Err(MinirelError::FileCorrupted {
                    path: path.display().to_string(),
                    reason: format!("bad free list link to page {}", next),
                });
            }
            self.read_raw(next, &mut page)?;
            next = u32::from_le_bytes([page[0], page[1], page[2], page[3]]);
        }
        if next != NO_PAGE {
            return Err(MinirelError::FileCorrupted {
                path: path.display().to_string(),
                reason: "free list longer than recorded".to_string(),
            });
        }
        Ok(())
    }
}

impl PagedFile for DiskFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_no: PageNo, page: &mut Page) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_no)?;
        inner.read_raw(page_no, page)
    }

    fn write_page(&self, page_no: PageNo, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_no)?;
        inner.write_raw(page_no, page, self.fsync_enabled)
    }

    fn allocate_page(&self) -> Result<PageNo> {
        let mut inner = self.inner.lock();
        let current = inner.header;
        let mut next = current;

        let page_no = if current.free_head != NO_PAGE {
            let page_no = current.free_head;
            let mut page = zeroed_page();
            inner.read_raw(page_no, &mut page)?;
            next.free_head = u32::from_le_bytes([page[0], page[1], page[2], page[3]]);
            next.free_count -= 1;
            page_no
        } else {
            let page_no = current.num_pages;
            if page_no == NO_PAGE {
                return Err(MinirelError::StorageFull {
                    file_id: self.file_id,
                });
            }
            next.num_pages += 1;
            page_no
        };

        // Header first: a reused page's link is only overwritten once the
        // free list on disk no longer reaches it.
        inner.write_header(&next, self.fsync_enabled)?;
        if let Err(e) = inner.write_raw(page_no, &zeroed_page(), false) {
            if let Err(restore) = inner.write_header(&current, self.fsync_enabled) {
                warn!(file = %self.path.display(), error = %restore, "failed to restore header");
            }
            return Err(e);
        }

        inner.header = next;
        inner.free.remove(&page_no);
        debug!(file = %self.path.display(), page_no, "allocated page");
        Ok(page_no)
    }

    fn dispose_page(&self, page_no: PageNo) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_allocated(&inner, page_no)?;

        let mut next = inner.header;
        let mut page = zeroed_page();
        page[0..4].copy_from_slice(&next.free_head.to_le_bytes());
        inner.write_raw(page_no, &page, false)?;

        next.free_head = page_no;
        next.free_count += 1;
        inner.write_header(&next, self.fsync_enabled)?;

        inner.header = next;
        inner.free.insert(page_no);
        debug!(file = %self.path.display(), page_no, "disposed page");
        Ok(())
    }
}

impl std::fmt::Debug for DiskFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

/// Creates, opens and destroys paged files inside a data directory.
///
/// A file has one `DiskFile` for as long as any handle to it is alive:
/// opening an open name, or reopening a closed name whose handle is still
/// held elsewhere (for example by frames in a buffer manager), returns that
/// same `DiskFile`. Its pages therefore keep a single identity in the
/// buffer manager.
pub struct DiskManager {
    config: StorageConfig,
    files: Mutex<HashMap<String, FileSlot>>,
}

enum FileSlot {
    Open(Arc<DiskFile>),
    /// Closed by name, possibly still referenced by outstanding handles.
    Closed(Weak<DiskFile>),
}

impl FileSlot {
    /// Returns the live handle, if any.
    fn live(&self) -> Option<Arc<DiskFile>> {
        match self {
            FileSlot::Open(file) => Some(Arc::clone(file)),
            FileSlot::Closed(handle) => handle.upgrade(),
        }
    }
}

impl DiskManager {
    /// Creates a new disk manager, creating the data directory if needed.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        info!(data_dir = %config.data_dir.display(), "disk manager started");

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(MinirelError::InvalidParameter {
                name: "file name".to_string(),
                value: name.to_string(),
            });
        }
        Ok(self.config.data_dir.join(format!("{}.db", name)))
    }

    /// Creates a new paged file. Fails if it already exists.
    pub fn create_file(&self, name: &str) -> Result<Arc<DiskFile>> {
        let path = self.file_path(name)?;
        let mut files = self.files.lock();
        let live = files.get(name).and_then(FileSlot::live).is_some();
        if live || path.exists() {
            return Err(MinirelError::FileExists(name.to_string()));
        }

        let file = Arc::new(DiskFile::create(&path, self.config.fsync_enabled)?);
        files.insert(name.to_string(), FileSlot::Open(Arc::clone(&file)));
        info!(name, file_id = file.file_id(), "created paged file");
        Ok(file)
    }

    /// Opens an existing paged file.
    ///
    /// Returns the already open handle, or the handle of a closed file that
    /// is still referenced, before touching the OS file.
    pub fn open_file(&self, name: &str) -> Result<Arc<DiskFile>> {
        let path = self.file_path(name)?;
        let mut files = self.files.lock();
        if let Some(file) = files.get(name).and_then(FileSlot::live) {
            files.insert(name.to_string(), FileSlot::Open(Arc::clone(&file)));
            return Ok(file);
        }
        if !path.exists() {
            return Err(MinirelError::FileNotFound(name.to_string()));
        }

        let file = Arc::new(DiskFile::open(&path, self.config.fsync_enabled)?);
        files.insert(name.to_string(), FileSlot::Open(Arc::clone(&file)));
        debug!(name, file_id = file.file_id(), "opened paged file");
        Ok(file)
    }

    /// Returns true if the named file is currently open.
    pub fn is_open(&self, name: &str) -> bool {
        matches!(self.files.lock().get(name), Some(FileSlot::Open(_)))
    }

    /// Syncs and closes a file. Outstanding handles stay usable until
    /// dropped, and reopening the name while they live returns them.
    pub fn close_file(&self, name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let file = match files.get(name) {
            Some(FileSlot::Open(file)) => Arc::clone(file),
            _ => return Err(MinirelError::FileNotFound(name.to_string())),
        };
        file.sync()?;
        files.insert(name.to_string(), FileSlot::Closed(Arc::downgrade(&file)));
        Ok(())
    }

    /// Deletes a paged file.
    ///
    /// Fails with `FileInUse` while any handle other than the manager's own
    /// is alive, including handles held by cached frames. Flush the file
    /// from the buffer manager and drop its handles first.
    pub fn destroy_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        let mut files = self.files.lock();
        if let Some(slot) = files.get(name) {
            let held_by_manager = usize::from(matches!(slot, FileSlot::Open(_)));
            if let Some(file) = slot.live() {
                // One count is the local `file` itself.
                if Arc::strong_count(&file) > 1 + held_by_manager {
                    return Err(MinirelError::FileInUse(name.to_string()));
                }
            }
        }
        files.remove(name);
        if !path.exists() {
            return Err(MinirelError::FileNotFound(name.to_string()));
        }
        std::fs::remove_file(&path)?;
        info!(name, "destroyed paged file");
        Ok(())
    }

    /// Syncs and closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for slot in files.values_mut() {
            let handle = match slot {
                FileSlot::Open(file) => {
                    file.sync()?;
                    Arc::downgrade(file)
                }
                FileSlot::Closed(_) => continue,
            };
            *slot = FileSlot::Closed(handle);
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
