//! Volatile virtual file system.
//!
//! Database files live entirely in process memory, organised by logical
//! page. The engine talks to the store through a registered
//! `sqlite3_vfs`; applications use [`VolatileFileSystem`] to open, read,
//! create, delete and dump the same files by name.
//!
//! Contents vanish with the process: there is no durability and no
//! cross-process sharing. Only WAL journaling is supported.

pub(crate) mod content;
mod file;
mod vfs;

use std::path::Path;

use tracing::{debug, info};

pub use content::{
    JOURNAL_MODE, MAIN_DB_HEADER_SIZE, MAX_FILES, MAX_PATHNAME, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
    WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE,
};

use crate::error::{Error, Result};
use content::{parse_main_db_page_size, FileKind};
use vfs::{Registration, VfsState};

/// A registered volatile file system.
///
/// Created with [`VolatileFileSystem::register`]; engine connections
/// reach it by passing the registration name as the `vfs` parameter when
/// opening a database. The registration stays alive until
/// [`VolatileFileSystem::unregister`] is called.
///
/// # Examples
///
/// ```no_run
/// use sqlite_volatile::VolatileFileSystem;
///
/// # fn main() -> sqlite_volatile::Result<()> {
/// let fs = VolatileFileSystem::register("volatile")?;
/// let mut file = fs.create("test.db")?;
/// # Ok(())
/// # }
/// ```
pub struct VolatileFileSystem {
    registration: Registration,
}

// The registration pointers are stable for the lifetime of the value and
// every access to the root goes through its mutex.
unsafe impl Send for VolatileFileSystem {}
unsafe impl Sync for VolatileFileSystem {}

impl VolatileFileSystem {
    /// Register a new volatile file system with the engine under the
    /// given name.
    pub fn register(name: &str) -> Result<Self> {
        info!(name, "registering volatile file system");
        let registration = vfs::register(name)?;
        Ok(VolatileFileSystem { registration })
    }

    /// Unregister from the engine and drop all file contents. Handles
    /// still open on engine connections become dangling, so close every
    /// connection first.
    pub fn unregister(self) -> Result<()> {
        info!(name = self.name(), "unregistering volatile file system");
        vfs::unregister(self.registration)
    }

    fn state(&self) -> &VfsState {
        unsafe { &*self.registration.state }
    }

    /// The name this file system was registered with.
    pub fn name(&self) -> &str {
        // Built from a &str at registration, so always valid UTF-8.
        self.state().name().to_str().unwrap_or_default()
    }

    fn open_with(
        &self,
        name: &str,
        create: bool,
        exclusive: bool,
    ) -> Result<VolatileFile<'_>> {
        // Mirror the engine's naming rule: `X-wal` is the write-ahead
        // log of database `X`.
        let kind = if name.ends_with("-wal") {
            FileKind::Wal
        } else {
            FileKind::MainDb
        };
        let slot = self
            .state()
            .root()
            .lock()
            .open(name, create, exclusive, kind)?;
        Ok(VolatileFile {
            state: self.state(),
            slot,
        })
    }

    /// Open an existing volatile file.
    pub fn open(&self, name: &str) -> Result<VolatileFile<'_>> {
        self.open_with(name, false, false)
    }

    /// Open a volatile file, creating it if it does not exist.
    pub fn create(&self, name: &str) -> Result<VolatileFile<'_>> {
        self.open_with(name, true, false)
    }

    /// Whether a file with the given name exists.
    pub fn access(&self, name: &str) -> bool {
        self.state().root().lock().access(name)
    }

    /// Delete a volatile file. Fails while any handle is still open on
    /// it.
    pub fn delete(&self, name: &str) -> Result<()> {
        debug!(name, "deleting volatile file");
        self.state().root().lock().delete(name)
    }

    /// The last host errno recorded by the file system.
    pub fn last_error(&self) -> i32 {
        self.state().root().lock().errno()
    }

    /// Return a copy of the full logical contents of the named file:
    /// the concatenated pages of a database, or the WAL header followed
    /// by each frame header and page.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        debug!(name, "reading volatile file");
        let mut root = self.state().root().lock();
        let slot = match root.lookup(name) {
            Some(slot) => slot,
            None => {
                root.set_errno(libc::ENOENT);
                return Err(Error::CantOpen {
                    name: name.to_owned(),
                    errno: libc::ENOENT,
                });
            }
        };
        Ok(root.content(slot).to_bytes())
    }

    /// Create a new file holding the given logical contents. Fails if
    /// the file already exists. For a WAL file the matching database
    /// must already exist; its header supplies the page size used to
    /// split `data` into frames.
    pub fn create_file(&self, name: &str, data: &[u8]) -> Result<()> {
        info!(name, len = data.len(), "creating volatile file");
        let mut file = self.open_with(name, true, true)?;
        if data.is_empty() {
            return Ok(());
        }

        if let Some(db_name) = name.strip_suffix("-wal") {
            if data.len() < WAL_HEADER_SIZE {
                return Err(Error::InvalidWrite {
                    offset: 0,
                    len: data.len(),
                });
            }
            let db = self.open(db_name)?;
            let mut header = [0u8; MAIN_DB_HEADER_SIZE];
            db.read_at(&mut header, 0)?;
            let page_size = parse_main_db_page_size(&header)?;

            file.write_at(&data[..WAL_HEADER_SIZE], 0)?;
            let frame_size = WAL_FRAME_HEADER_SIZE + page_size;
            let mut offset = WAL_HEADER_SIZE;
            while offset + frame_size <= data.len() {
                file.write_at(
                    &data[offset..offset + WAL_FRAME_HEADER_SIZE],
                    offset as u64,
                )?;
                file.write_at(
                    &data[offset + WAL_FRAME_HEADER_SIZE..offset + frame_size],
                    (offset + WAL_FRAME_HEADER_SIZE) as u64,
                )?;
                offset += frame_size;
            }
        } else {
            if data.len() < MAIN_DB_HEADER_SIZE {
                return Err(Error::InvalidWrite {
                    offset: 0,
                    len: data.len(),
                });
            }
            let page_size = parse_main_db_page_size(data)?;
            let mut offset = 0;
            while offset + page_size <= data.len() {
                file.write_at(&data[offset..offset + page_size], offset as u64)?;
                offset += page_size;
            }
        }
        Ok(())
    }

    /// Write the contents of every file to `dir/<name>` on the host file
    /// system. Absolute file names are rejected.
    pub fn dump(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        info!(dir = %dir.display(), "dumping volatile file system");
        let names = self.state().root().lock().file_names();
        for name in names {
            let data = self.read_file(&name)?;
            dump_file(&data, dir, &name)?;
        }
        Ok(())
    }
}

fn dump_file(data: &[u8], dir: &Path, name: &str) -> Result<()> {
    if Path::new(name).is_absolute() {
        return Err(Error::AbsolutePath(name.to_owned()));
    }
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, data)?;
    debug!(file = %path.display(), "dumped volatile file");
    Ok(())
}

/// An open handle on a volatile file. The open reference is released on
/// drop; the contents stay in the file system until deleted.
pub struct VolatileFile<'fs> {
    state: &'fs VfsState,
    slot: usize,
}

impl std::fmt::Debug for VolatileFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileFile").field("slot", &self.slot).finish()
    }
}

impl VolatileFile<'_> {
    /// Read from the file at the given offset. Reads must follow the
    /// page layout: the database header or a whole page for databases,
    /// the file header, a frame header, a frame page or a whole frame
    /// for WALs. Reading a region that was never written zero-fills the
    /// buffer and returns [`Error::ShortRead`].
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.state.root().lock().read(self.slot, buf, offset)
    }

    /// Write to the file at the given offset, following the same layout
    /// rules as [`VolatileFile::read_at`].
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.state.root().lock().write(self.slot, data, offset)
    }

    /// Truncate the file. Databases truncate to a whole number of pages,
    /// WALs only to zero.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.state.root().lock().truncate(self.slot, size)
    }

    /// Current logical size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.state.root().lock().file_size(self.slot)
    }
}

impl Drop for VolatileFile<'_> {
    fn drop(&mut self) {
        self.state.root().lock().close(self.slot);
    }
}
