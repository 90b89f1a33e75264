//! In-memory representation of the volatile file system.
//!
//! Files are stored page by page rather than as flat byte buffers: after
//! the initial header write the engine only ever issues aligned,
//! page-sized transfers, so keeping whole pages makes truncation cheap
//! and lets a WAL frame share one allocation with its frame header.

use std::os::raw::c_int;

use crate::error::{Error, Result};

/// Maximum pathname length supported by the VFS.
pub const MAX_PATHNAME: usize = 512;

/// Maximum number of files a single VFS instance can hold.
pub const MAX_FILES: usize = 64;

/// Minimum database page size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Maximum database page size.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Size of the header of the main database file.
pub const MAIN_DB_HEADER_SIZE: usize = 100;

/// Size of the write-ahead log file header.
pub const WAL_HEADER_SIZE: usize = 32;

/// Size of the header preceding each frame in the WAL.
pub const WAL_FRAME_HEADER_SIZE: usize = 24;

/// The only journal mode the VFS accepts.
pub const JOURNAL_MODE: &str = "wal";

/// True if `n` is a legal page size: a power of two between 512 and 65536.
pub(crate) fn page_size_is_valid(n: usize) -> bool {
    (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&n) && n.is_power_of_two()
}

/// Decode a page size as stored in a file header, where the value 1
/// denotes 65536.
fn decode_page_size(raw: u32) -> Result<usize> {
    if raw == 1 {
        return Ok(MAX_PAGE_SIZE);
    }
    let n = raw as usize;
    if n <= MAX_PAGE_SIZE / 2 && page_size_is_valid(n) {
        Ok(n)
    } else {
        Err(Error::InvalidPageSize(raw))
    }
}

/// Extract the page size from the first page of a main database file.
///
/// The size is stored big-endian in bytes 16-17 of the 100-byte header.
pub(crate) fn parse_main_db_page_size(header: &[u8]) -> Result<usize> {
    decode_page_size(u16::from_be_bytes([header[16], header[17]]) as u32)
}

/// Extract the page size from a 32-byte WAL file header (bytes 8-11,
/// big-endian).
pub(crate) fn parse_wal_page_size(header: &[u8]) -> Result<usize> {
    decode_page_size(u32::from_be_bytes([
        header[8], header[9], header[10], header[11],
    ]))
}

/// What a volatile file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    /// The main database file, page-addressed after the 100-byte header.
    MainDb,
    /// The write-ahead log: a 32-byte header followed by frames.
    Wal,
    /// Anything else (journals, master journals). Writes are swallowed.
    Other,
}

/// Which piece of a WAL frame an offset/length pair addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePart {
    Header,
    Body,
    Full,
}

/// One page of a volatile file. WAL pages carry their 24-byte frame
/// header alongside the page body.
#[derive(Debug)]
pub(crate) struct Page {
    buf: Vec<u8>,
    frame_header: Option<Box<[u8; WAL_FRAME_HEADER_SIZE]>>,
}

impl Page {
    fn new(page_size: usize, wal: bool) -> Self {
        Page {
            buf: vec![0; page_size],
            frame_header: wal.then(|| Box::new([0; WAL_FRAME_HEADER_SIZE])),
        }
    }
}

/// The logical contents of one named file.
#[derive(Debug)]
pub(crate) struct FileContent {
    name: String,
    kind: FileKind,
    /// 0 until learned from the first header write, a `page_size` pragma,
    /// or (for WAL files) the associated database.
    page_size: usize,
    /// Dense, 1-indexed through `page()`/`page_mut_or_create()`.
    pages: Vec<Page>,
    wal_header: [u8; WAL_HEADER_SIZE],
    shm_regions: Vec<Vec<u8>>,
    ref_count: usize,
    shm_ref_count: usize,
}

impl FileContent {
    fn new(name: &str, kind: FileKind) -> Self {
        FileContent {
            name: name.to_owned(),
            kind,
            page_size: 0,
            pages: Vec::new(),
            wal_header: [0; WAL_HEADER_SIZE],
            shm_regions: Vec::new(),
            ref_count: 0,
            shm_ref_count: 0,
        }
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size;
    }

    /// A file with no pages has never been written.
    pub(crate) fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index - 1)
    }

    /// Look up page `index`, appending a fresh page when `index` is one
    /// past the end. Returns `None` for any larger gap.
    fn page_mut_or_create(&mut self, index: usize) -> Option<&mut Page> {
        if index == self.pages.len() + 1 {
            self.pages
                .push(Page::new(self.page_size, self.kind == FileKind::Wal));
        } else if index > self.pages.len() {
            return None;
        }
        self.pages.get_mut(index - 1)
    }

    pub(crate) fn file_size(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        match self.kind {
            FileKind::MainDb => (self.pages.len() * self.page_size) as u64,
            FileKind::Wal => {
                (WAL_HEADER_SIZE
                    + self.pages.len() * (WAL_FRAME_HEADER_SIZE + self.page_size))
                    as u64
            }
            FileKind::Other => 0,
        }
    }

    /// Resolve a WAL read or write to a frame index and the part of the
    /// frame being addressed. Frames start at offset 32 and are
    /// contiguous `(24 + page_size)`-byte records.
    fn wal_frame_shape(&self, offset: u64, len: usize) -> Option<(usize, FramePart)> {
        let frame = (WAL_FRAME_HEADER_SIZE + self.page_size) as u64;
        let rel = offset.checked_sub(WAL_HEADER_SIZE as u64)?;
        let (base, part) = if len == WAL_FRAME_HEADER_SIZE {
            (rel, FramePart::Header)
        } else if len == self.page_size {
            (rel.checked_sub(WAL_FRAME_HEADER_SIZE as u64)?, FramePart::Body)
        } else if len == WAL_FRAME_HEADER_SIZE + self.page_size {
            (rel, FramePart::Full)
        } else {
            return None;
        };
        if base % frame != 0 {
            return None;
        }
        Some(((base / frame) as usize + 1, part))
    }

    fn read_main_db(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let index = if offset < self.page_size as u64 {
            if offset as usize + buf.len() > self.page_size {
                return Err(Error::InvalidRead {
                    offset,
                    len: buf.len(),
                });
            }
            1
        } else {
            if buf.len() != self.page_size || offset % self.page_size as u64 != 0 {
                return Err(Error::InvalidRead {
                    offset,
                    len: buf.len(),
                });
            }
            (offset / self.page_size as u64) as usize + 1
        };
        let page = match self.page(index) {
            Some(page) => page,
            None => return short_read(buf),
        };
        if index == 1 {
            let start = offset as usize;
            buf.copy_from_slice(&page.buf[start..start + buf.len()]);
        } else {
            buf.copy_from_slice(&page.buf);
        }
        Ok(())
    }

    fn read_wal(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        if offset == 0 {
            if buf.len() != WAL_HEADER_SIZE {
                return Err(Error::InvalidRead {
                    offset,
                    len: buf.len(),
                });
            }
            buf.copy_from_slice(&self.wal_header);
            return Ok(());
        }
        let (index, part) = self
            .wal_frame_shape(offset, buf.len())
            .ok_or(Error::InvalidRead {
                offset,
                len: buf.len(),
            })?;
        let page = match self.page(index) {
            Some(page) => page,
            None => return short_read(buf),
        };
        // WAL pages always carry a frame header.
        let header = page
            .frame_header
            .as_deref()
            .ok_or(Error::InvalidRead {
                offset,
                len: buf.len(),
            })?;
        match part {
            FramePart::Header => buf.copy_from_slice(header),
            FramePart::Body => buf.copy_from_slice(&page.buf),
            FramePart::Full => {
                buf[..WAL_FRAME_HEADER_SIZE].copy_from_slice(header);
                buf[WAL_FRAME_HEADER_SIZE..].copy_from_slice(&page.buf);
            }
        }
        Ok(())
    }

    fn write_main_db(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let len = data.len();
        let invalid = || Error::InvalidWrite { offset, len };
        let index = if offset == 0 {
            // The first write carries at least the database header, from
            // which the page size is learned.
            if data.len() < MAIN_DB_HEADER_SIZE {
                return Err(invalid());
            }
            let page_size = parse_main_db_page_size(data)?;
            if self.page_size != 0 && page_size != self.page_size {
                return Err(Error::PageSizeChanged);
            }
            self.page_size = page_size;
            if data.len() > self.page_size {
                return Err(invalid());
            }
            1
        } else {
            if self.page_size == 0
                || offset % self.page_size as u64 != 0
                || data.len() != self.page_size
            {
                return Err(invalid());
            }
            (offset / self.page_size as u64) as usize + 1
        };
        let page = self.page_mut_or_create(index).ok_or_else(invalid)?;
        page.buf[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn write_wal(&mut self, data: &[u8], offset: u64) -> Result<()> {
        let len = data.len();
        let invalid = || Error::InvalidWrite { offset, len };
        if offset == 0 {
            if data.len() != WAL_HEADER_SIZE {
                return Err(invalid());
            }
            // The page size in the WAL header must agree with the one
            // derived from the database file.
            if parse_wal_page_size(data)? != self.page_size {
                return Err(invalid());
            }
            self.wal_header.copy_from_slice(data);
            return Ok(());
        }
        let (index, part) = self.wal_frame_shape(offset, data.len()).ok_or_else(invalid)?;
        match part {
            FramePart::Header => {
                let page = self.page_mut_or_create(index).ok_or_else(invalid)?;
                match page.frame_header.as_deref_mut() {
                    Some(header) => header.copy_from_slice(data),
                    None => return Err(invalid()),
                }
            }
            FramePart::Body => {
                // The frame header must have been written first, so the
                // page already exists.
                let page = self.pages.get_mut(index - 1).ok_or_else(invalid)?;
                page.buf.copy_from_slice(data);
            }
            FramePart::Full => return Err(invalid()),
        }
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if self.is_empty() {
            // The engine never grows a file through truncation.
            return if size == 0 {
                Ok(())
            } else {
                Err(Error::InvalidTruncate { size })
            };
        }
        let pages = match self.kind {
            FileKind::MainDb => {
                let page_size = self.page_size as u64;
                if size % page_size != 0 || size > self.file_size() {
                    return Err(Error::InvalidTruncate { size });
                }
                (size / page_size) as usize
            }
            FileKind::Wal => {
                // A WAL is only ever truncated to zero, after a full
                // checkpoint. This also resets the file header.
                if size != 0 {
                    return Err(Error::InvalidTruncate { size });
                }
                self.wal_header = [0; WAL_HEADER_SIZE];
                0
            }
            FileKind::Other => return Err(Error::InvalidTruncate { size }),
        };
        self.pages.truncate(pages);
        Ok(())
    }

    /// Hand out a shared memory region, lazily allocating it when
    /// `extend` is set. Regions are dense and grow one at a time.
    pub(crate) fn shm_map(
        &mut self,
        region: usize,
        region_size: usize,
        extend: bool,
    ) -> Result<Option<*mut u8>> {
        if region >= self.shm_regions.len() {
            if !extend {
                return Ok(None);
            }
            if region != self.shm_regions.len() {
                return Err(Error::InvalidShmRegion(region));
            }
            self.shm_regions.push(vec![0; region_size]);
        }
        self.shm_ref_count += 1;
        Ok(Some(self.shm_regions[region].as_mut_ptr()))
    }

    /// Drop one shared memory reference; the whole map is released when
    /// the last reference goes away.
    pub(crate) fn shm_unmap(&mut self) {
        if self.shm_ref_count > 0 {
            self.shm_ref_count -= 1;
        }
        if self.shm_ref_count == 0 {
            self.shm_regions.clear();
        }
    }

    /// Assemble the full logical contents of the file.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut data = Vec::with_capacity(self.file_size() as usize);
        match self.kind {
            FileKind::MainDb | FileKind::Other => {
                for page in &self.pages {
                    data.extend_from_slice(&page.buf);
                }
            }
            FileKind::Wal => {
                data.extend_from_slice(&self.wal_header);
                for page in &self.pages {
                    if let Some(header) = page.frame_header.as_deref() {
                        data.extend_from_slice(header);
                    }
                    data.extend_from_slice(&page.buf);
                }
            }
        }
        data
    }
}

fn short_read(buf: &mut [u8]) -> Result<()> {
    // Short reads must zero-fill the unread portion or the engine will
    // eventually corrupt the database.
    buf.fill(0);
    Err(Error::ShortRead)
}

/// The root of one VFS instance: a fixed-capacity slot table plus the
/// last errno. The whole root is accessed under a single mutex owned by
/// the registration.
#[derive(Debug)]
pub(crate) struct Root {
    vfs_id: i32,
    slots: Vec<Option<FileContent>>,
    errno: c_int,
}

impl Root {
    pub(crate) fn new(vfs_id: i32) -> Self {
        Root {
            vfs_id,
            slots: (0..MAX_FILES).map(|_| None).collect(),
            errno: 0,
        }
    }

    /// Identifier assigned to this file system at registration.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn vfs_id(&self) -> i32 {
        self.vfs_id
    }

    pub(crate) fn errno(&self) -> c_int {
        self.errno
    }

    pub(crate) fn set_errno(&mut self, errno: c_int) {
        self.errno = errno;
    }

    /// Find the slot holding `name`. Lookups are linear; the table holds
    /// at most 64 entries.
    pub(crate) fn lookup(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|c| c.name == name))
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    pub(crate) fn content(&self, slot: usize) -> &FileContent {
        self.slots[slot]
            .as_ref()
            .expect("file handle refers to an occupied slot")
    }

    pub(crate) fn content_mut(&mut self, slot: usize) -> &mut FileContent {
        self.slots[slot]
            .as_mut()
            .expect("file handle refers to an occupied slot")
    }

    /// Names of all files currently held, in slot order.
    pub(crate) fn file_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|c| c.name.clone()))
            .collect()
    }

    /// Open `name`, creating it when requested. Returns the slot index,
    /// which stays valid for the lifetime of the content.
    pub(crate) fn open(
        &mut self,
        name: &str,
        create: bool,
        exclusive: bool,
        kind: FileKind,
    ) -> Result<usize> {
        let slot = match self.lookup(name) {
            Some(slot) => {
                if exclusive && create {
                    self.errno = libc::EEXIST;
                    return Err(Error::CantOpen {
                        name: name.to_owned(),
                        errno: libc::EEXIST,
                    });
                }
                slot
            }
            None => {
                if !create {
                    self.errno = libc::ENOENT;
                    return Err(Error::CantOpen {
                        name: name.to_owned(),
                        errno: libc::ENOENT,
                    });
                }
                let slot = match self.free_slot() {
                    Some(slot) => slot,
                    None => {
                        self.errno = libc::ENFILE;
                        return Err(Error::CantOpen {
                            name: name.to_owned(),
                            errno: libc::ENFILE,
                        });
                    }
                };
                self.slots[slot] = Some(FileContent::new(name, kind));
                slot
            }
        };
        self.content_mut(slot).ref_count += 1;
        Ok(slot)
    }

    /// Release one open reference. The content stays in its slot until
    /// deleted.
    pub(crate) fn close(&mut self, slot: usize) {
        let content = self.content_mut(slot);
        content.ref_count = content.ref_count.saturating_sub(1);
    }

    pub(crate) fn delete(&mut self, name: &str) -> Result<()> {
        let slot = match self.lookup(name) {
            Some(slot) => slot,
            None => {
                self.errno = libc::ENOENT;
                return Err(Error::DeleteNotFound(name.to_owned()));
            }
        };
        if self.content(slot).ref_count > 0 {
            self.errno = libc::EBUSY;
            return Err(Error::DeleteBusy(name.to_owned()));
        }
        self.slots[slot] = None;
        Ok(())
    }

    pub(crate) fn access(&mut self, name: &str) -> bool {
        let exists = self.lookup(name).is_some();
        if !exists {
            self.errno = libc::ENOENT;
        }
        exists
    }

    /// Page size of the main database associated with a WAL file, found
    /// by stripping the `-wal` suffix from the WAL name.
    fn main_db_page_size(&self, wal_name: &str) -> Result<usize> {
        let db_name = wal_name
            .strip_suffix("-wal")
            .ok_or_else(|| Error::UnknownWalPageSize(wal_name.to_owned()))?;
        let slot = self
            .lookup(db_name)
            .ok_or_else(|| Error::UnknownWalPageSize(wal_name.to_owned()))?;
        match self.content(slot).page_size {
            0 => Err(Error::UnknownWalPageSize(wal_name.to_owned())),
            page_size => Ok(page_size),
        }
    }

    /// Make sure a WAL content knows its page size, deriving it from the
    /// associated database on first access.
    fn ensure_wal_page_size(&mut self, slot: usize) -> Result<()> {
        if self.content(slot).page_size != 0 {
            return Ok(());
        }
        let name = self.content(slot).name.clone();
        let page_size = self.main_db_page_size(&name)?;
        self.content_mut(slot).page_size = page_size;
        Ok(())
    }

    pub(crate) fn read(&mut self, slot: usize, buf: &mut [u8], offset: u64) -> Result<()> {
        if self.content(slot).is_empty() {
            return short_read(buf);
        }
        match self.content(slot).kind {
            FileKind::MainDb => self.content(slot).read_main_db(buf, offset),
            FileKind::Wal => {
                self.ensure_wal_page_size(slot)?;
                self.content(slot).read_wal(buf, offset)
            }
            // Writes to other files are swallowed, so their content can
            // never be non-empty.
            FileKind::Other => Err(Error::InvalidRead {
                offset,
                len: buf.len(),
            }),
        }
    }

    pub(crate) fn write(&mut self, slot: usize, data: &[u8], offset: u64) -> Result<()> {
        match self.content(slot).kind {
            FileKind::MainDb => self.content_mut(slot).write_main_db(data, offset),
            FileKind::Wal => {
                self.ensure_wal_page_size(slot)?;
                self.content_mut(slot).write_wal(data, offset)
            }
            FileKind::Other => Ok(()),
        }
    }

    pub(crate) fn truncate(&mut self, slot: usize, size: u64) -> Result<()> {
        self.content_mut(slot).truncate(size)
    }

    pub(crate) fn file_size(&self, slot: usize) -> u64 {
        self.content(slot).file_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_header(page_size: u16) -> Vec<u8> {
        let mut header = vec![0; MAIN_DB_HEADER_SIZE];
        header[16..18].copy_from_slice(&page_size.to_be_bytes());
        header
    }

    fn wal_header(page_size: u32) -> Vec<u8> {
        let mut header = vec![0; WAL_HEADER_SIZE];
        header[8..12].copy_from_slice(&page_size.to_be_bytes());
        header
    }

    fn open_db(root: &mut Root, name: &str) -> usize {
        root.open(name, true, false, FileKind::MainDb).unwrap()
    }

    #[test]
    fn page_size_decoding() {
        assert_eq!(parse_main_db_page_size(&db_header(512)).unwrap(), 512);
        assert_eq!(parse_main_db_page_size(&db_header(4096)).unwrap(), 4096);
        assert_eq!(parse_main_db_page_size(&db_header(1)).unwrap(), 65536);
        assert!(parse_main_db_page_size(&db_header(300)).is_err());
        assert!(parse_main_db_page_size(&db_header(768)).is_err());
        assert_eq!(parse_wal_page_size(&wal_header(512)).unwrap(), 512);
        assert_eq!(parse_wal_page_size(&wal_header(1)).unwrap(), 65536);
        assert!(parse_wal_page_size(&wal_header(0)).is_err());
    }

    #[test]
    fn page_size_validity() {
        assert!(page_size_is_valid(512));
        assert!(page_size_is_valid(32768));
        assert!(page_size_is_valid(65536));
        assert!(!page_size_is_valid(256));
        assert!(!page_size_is_valid(131072));
        assert!(!page_size_is_valid(1000));
    }

    #[test]
    fn root_keeps_its_vfs_identifier() {
        assert_eq!(Root::new(7).vfs_id(), 7);
    }

    #[test]
    fn open_missing_without_create() {
        let mut root = Root::new(0);
        let err = root
            .open("test.db", false, false, FileKind::MainDb)
            .unwrap_err();
        assert!(matches!(err, Error::CantOpen { errno, .. } if errno == libc::ENOENT));
        assert_eq!(root.errno(), libc::ENOENT);
    }

    #[test]
    fn open_existing_with_exclusive() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");
        root.close(slot);
        let err = root
            .open("test.db", true, true, FileKind::MainDb)
            .unwrap_err();
        assert!(matches!(err, Error::CantOpen { errno, .. } if errno == libc::EEXIST));
    }

    #[test]
    fn slot_table_exhaustion() {
        let mut root = Root::new(0);
        for i in 0..MAX_FILES {
            open_db(&mut root, &format!("file-{i}"));
        }
        let err = root
            .open("one-too-many", true, false, FileKind::MainDb)
            .unwrap_err();
        assert!(matches!(err, Error::CantOpen { errno, .. } if errno == libc::ENFILE));
        // Deleting one frees its slot again.
        root.close(root.lookup("file-0").unwrap());
        root.delete("file-0").unwrap();
        open_db(&mut root, "one-too-many");
    }

    #[test]
    fn at_most_one_content_per_name() {
        let mut root = Root::new(0);
        let a = open_db(&mut root, "test.db");
        let b = open_db(&mut root, "test.db");
        assert_eq!(a, b);
        assert_eq!(root.file_names(), vec!["test.db".to_owned()]);
    }

    #[test]
    fn delete_busy_and_not_found() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");
        let err = root.delete("test.db").unwrap_err();
        assert!(matches!(err, Error::DeleteBusy(_)));
        assert_eq!(root.errno(), libc::EBUSY);

        root.close(slot);
        root.delete("test.db").unwrap();
        let err = root.delete("test.db").unwrap_err();
        assert!(matches!(err, Error::DeleteNotFound(_)));
        assert_eq!(root.errno(), libc::ENOENT);
    }

    #[test]
    fn read_empty_file_is_short() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");
        let mut buf = [0xffu8; 16];
        let err = root.read(slot, &mut buf, 0).unwrap_err();
        assert!(matches!(err, Error::ShortRead));
        assert_eq!(buf, [0; 16]);
    }

    #[test]
    fn main_db_round_trip() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");

        // Header write records the page size.
        root.write(slot, &db_header(512), 0).unwrap();
        assert_eq!(root.content(slot).page_size(), 512);
        assert_eq!(root.file_size(slot), 512);

        // Full page 1, then page 2.
        let mut page1 = db_header(512);
        page1.resize(512, 0);
        page1[101] = 1;
        page1[511] = 3;
        root.write(slot, &page1, 0).unwrap();
        let mut page2 = vec![0u8; 512];
        page2[0] = 4;
        page2[511] = 6;
        root.write(slot, &page2, 512).unwrap();
        assert_eq!(root.file_size(slot), 1024);

        let mut buf = vec![0u8; 100];
        root.read(slot, &mut buf, 0).unwrap();
        assert_eq!(&buf[16..18], &[2, 0]);

        let mut buf = vec![0u8; 512];
        root.read(slot, &mut buf, 0).unwrap();
        assert_eq!(buf, page1);
        root.read(slot, &mut buf, 512).unwrap();
        assert_eq!(buf, page2);
    }

    #[test]
    fn main_db_read_never_written_page() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");
        let mut page1 = db_header(512);
        page1.resize(512, 0);
        root.write(slot, &page1, 0).unwrap();

        let mut buf = vec![0xffu8; 512];
        let err = root.read(slot, &mut buf, 512).unwrap_err();
        assert!(matches!(err, Error::ShortRead));
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn main_db_write_shapes() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");
        root.write(slot, &db_header(512), 0).unwrap();

        // Unaligned offset.
        assert!(matches!(
            root.write(slot, &[0u8; 512], 100).unwrap_err(),
            Error::InvalidWrite { .. }
        ));
        // Partial page beyond the first.
        assert!(matches!(
            root.write(slot, &[0u8; 100], 512).unwrap_err(),
            Error::InvalidWrite { .. }
        ));
        // Writing more than one page past the end.
        assert!(matches!(
            root.write(slot, &[0u8; 512], 2048).unwrap_err(),
            Error::InvalidWrite { .. }
        ));
        // Changing the recorded page size.
        assert!(matches!(
            root.write(slot, &db_header(1024), 0).unwrap_err(),
            Error::PageSizeChanged
        ));
    }

    #[test]
    fn wal_round_trip_and_size_law() {
        let mut root = Root::new(0);
        let db = open_db(&mut root, "test.db");
        root.write(db, &db_header(512), 0).unwrap();

        let wal = root.open("test.db-wal", true, false, FileKind::Wal).unwrap();
        root.write(wal, &wal_header(512), 0).unwrap();
        assert_eq!(root.content(wal).page_size(), 512);

        let mut frame1_header = [0u8; WAL_FRAME_HEADER_SIZE];
        frame1_header[3] = 1;
        let mut frame1_body = vec![0u8; 512];
        frame1_body[0] = 0xaa;
        root.write(wal, &frame1_header, 32).unwrap();
        root.write(wal, &frame1_body, 56).unwrap();
        let mut frame2_header = [0u8; WAL_FRAME_HEADER_SIZE];
        frame2_header[3] = 2;
        let mut frame2_body = vec![0u8; 512];
        frame2_body[511] = 0xbb;
        root.write(wal, &frame2_header, 568).unwrap();
        root.write(wal, &frame2_body, 592).unwrap();

        assert_eq!(root.file_size(wal), 32 + 2 * (24 + 512));

        let mut buf = vec![0u8; WAL_HEADER_SIZE];
        root.read(wal, &mut buf, 0).unwrap();
        assert_eq!(buf, wal_header(512));

        let mut buf = vec![0u8; WAL_FRAME_HEADER_SIZE];
        root.read(wal, &mut buf, 32).unwrap();
        assert_eq!(buf, frame1_header);
        let mut buf = vec![0u8; 512];
        root.read(wal, &mut buf, 56).unwrap();
        assert_eq!(buf, frame1_body);

        // Full-frame read of the second frame.
        let mut buf = vec![0u8; 24 + 512];
        root.read(wal, &mut buf, 568).unwrap();
        assert_eq!(&buf[..24], &frame2_header);
        assert_eq!(&buf[24..], &frame2_body[..]);
    }

    #[test]
    fn wal_body_requires_header_first() {
        let mut root = Root::new(0);
        let db = open_db(&mut root, "test.db");
        root.write(db, &db_header(512), 0).unwrap();
        let wal = root.open("test.db-wal", true, false, FileKind::Wal).unwrap();
        root.write(wal, &wal_header(512), 0).unwrap();

        let err = root.write(wal, &vec![0u8; 512], 56).unwrap_err();
        assert!(matches!(err, Error::InvalidWrite { .. }));
    }

    #[test]
    fn wal_page_size_derived_from_database() {
        let mut root = Root::new(0);
        let db = open_db(&mut root, "test.db");
        root.write(db, &db_header(1024), 0).unwrap();

        let wal = root.open("test.db-wal", true, false, FileKind::Wal).unwrap();
        root.write(wal, &wal_header(1024), 0).unwrap();
        assert_eq!(root.content(wal).page_size(), 1024);

        // A WAL with no matching database cannot learn its page size.
        let orphan = root
            .open("orphan.db-wal", true, false, FileKind::Wal)
            .unwrap();
        let err = root.write(orphan, &wal_header(1024), 0).unwrap_err();
        assert!(matches!(err, Error::UnknownWalPageSize(_)));
    }

    #[test]
    fn wal_header_must_match_database_page_size() {
        let mut root = Root::new(0);
        let db = open_db(&mut root, "test.db");
        root.write(db, &db_header(512), 0).unwrap();
        let wal = root.open("test.db-wal", true, false, FileKind::Wal).unwrap();
        let err = root.write(wal, &wal_header(1024), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidWrite { .. }));
    }

    #[test]
    fn truncate_main_db() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");

        // Truncating an empty file to zero is a no-op.
        root.truncate(slot, 0).unwrap();
        assert_eq!(root.file_size(slot), 0);

        let mut page1 = db_header(512);
        page1.resize(512, 0);
        root.write(slot, &page1, 0).unwrap();
        root.write(slot, &vec![0u8; 512], 512).unwrap();
        assert_eq!(root.file_size(slot), 1024);

        // Growing or unaligned truncation is rejected.
        assert!(root.truncate(slot, 2048).is_err());
        assert!(root.truncate(slot, 100).is_err());

        root.truncate(slot, 512).unwrap();
        assert_eq!(root.file_size(slot), 512);
        root.truncate(slot, 0).unwrap();
        assert_eq!(root.file_size(slot), 0);

        // Reads after truncation to zero are zero-filled short reads.
        let mut buf = [0xffu8; 8];
        assert!(matches!(
            root.read(slot, &mut buf, 0).unwrap_err(),
            Error::ShortRead
        ));
        assert_eq!(buf, [0; 8]);
    }

    #[test]
    fn truncate_wal_clears_header() {
        let mut root = Root::new(0);
        let db = open_db(&mut root, "test.db");
        root.write(db, &db_header(512), 0).unwrap();
        let wal = root.open("test.db-wal", true, false, FileKind::Wal).unwrap();
        root.write(wal, &wal_header(512), 0).unwrap();
        root.write(wal, &[1u8; WAL_FRAME_HEADER_SIZE], 32).unwrap();
        root.write(wal, &vec![2u8; 512], 56).unwrap();
        assert_eq!(root.file_size(wal), 568);

        // Only truncation to zero is supported.
        assert!(root.truncate(wal, 568).is_err());

        root.truncate(wal, 0).unwrap();
        assert_eq!(root.file_size(wal), 0);
        let mut buf = [0xffu8; WAL_HEADER_SIZE];
        assert!(matches!(
            root.read(wal, &mut buf, 0).unwrap_err(),
            Error::ShortRead
        ));
        assert_eq!(buf, [0; WAL_HEADER_SIZE]);
    }

    #[test]
    fn other_files_swallow_writes() {
        let mut root = Root::new(0);
        let slot = root
            .open("test.db-journal", true, false, FileKind::Other)
            .unwrap();
        root.write(slot, &[1, 2, 3], 0).unwrap();
        assert_eq!(root.file_size(slot), 0);
        let mut buf = [0xffu8; 3];
        assert!(matches!(
            root.read(slot, &mut buf, 0).unwrap_err(),
            Error::ShortRead
        ));
        assert_eq!(buf, [0; 3]);
    }

    #[test]
    fn shm_regions_are_dense() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");
        let content = root.content_mut(slot);

        // Mapping without extend before allocation yields no region.
        assert!(content.shm_map(0, 32768, false).unwrap().is_none());

        let first = content.shm_map(0, 32768, true).unwrap().unwrap();
        assert!(!first.is_null());
        // Skipping a region is rejected.
        assert!(matches!(
            content.shm_map(2, 32768, true).unwrap_err(),
            Error::InvalidShmRegion(2)
        ));
        let second = content.shm_map(1, 32768, true).unwrap().unwrap();
        assert_ne!(first, second);

        // Releasing both references frees the whole map.
        content.shm_unmap();
        content.shm_unmap();
        assert!(content.shm_map(0, 32768, false).unwrap().is_none());
    }

    #[test]
    fn largest_page_size_round_trip() {
        let mut root = Root::new(0);
        let slot = open_db(&mut root, "test.db");
        let mut page1 = db_header(1); // 1 denotes 65536
        page1.resize(65536, 0);
        page1[65535] = 9;
        root.write(slot, &page1, 0).unwrap();
        assert_eq!(root.content(slot).page_size(), 65536);
        assert_eq!(root.file_size(slot), 65536);

        let mut buf = vec![0u8; 65536];
        root.read(slot, &mut buf, 0).unwrap();
        assert_eq!(buf[65535], 9);
    }
}
