//! WAL replication adapter.
//!
//! An application registers a [`WalReplication`] hook set under a name
//! and switches a connection into leader mode for it. From then on the
//! engine reports every WAL transaction on that connection through the
//! hooks: `begin`, zero or more `frames` batches, an optional `undo`,
//! and exactly one `end` after a successful `begin` (or `abort` on
//! engine-initiated abort paths). The hooks typically forward the frames
//! to follower connections driven through [`apply_frames`] and [`undo`].
//!
//! The adapter carries no policy of its own: whatever error code a hook
//! returns is handed to the engine untouched.
//!
//! The functions that call into the engine are only available with the
//! `wal-replication` feature, which requires an engine built with the
//! WAL replication extension.

// The registering and connection-tracking half of these modules is only
// exercised by the engine-facing driver and by tests.
#[cfg_attr(not(any(test, feature = "wal-replication")), allow(dead_code))]
pub(crate) mod ffi;
#[cfg_attr(not(any(test, feature = "wal-replication")), allow(dead_code))]
pub(crate) mod registry;

#[cfg(feature = "wal-replication")]
mod driver;

#[cfg(feature = "wal-replication")]
pub use driver::{apply_frames, register, set_follower, set_leader, set_none, undo, unregister};

use std::os::raw::{c_int, c_uint};

use libsqlite3_sys as sqlite;

use crate::error::{Error, Result};

/// Non-zero engine error code returned by a replication hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub i32);

/// What a replication hook returns: `Ok(())` lets the transaction
/// proceed, an error code aborts it and is surfaced by the engine as
/// the statement error.
pub type HookResult = std::result::Result<(), ErrorCode>;

/// The leader connection a hook invocation belongs to.
#[derive(Debug, Clone, Copy)]
pub struct Leader {
    db: *mut sqlite::sqlite3,
}

impl Leader {
    pub(crate) fn new(db: *mut sqlite::sqlite3) -> Self {
        Leader { db }
    }

    /// Raw handle of the leader connection.
    pub fn as_ptr(&self) -> *mut sqlite::sqlite3 {
        self.db
    }
}

/// Application hooks driving WAL replication for leader connections.
///
/// The engine serializes invocations per connection in the order
/// `begin`, `frames`*, optional `undo`, then `end`. `undo` only fires
/// after at least one successful `frames`; nothing fires after a failed
/// `begin`.
pub trait WalReplication: Send + Sync {
    /// A write transaction is about to start. A typical implementation
    /// checks that this node is still entitled to lead.
    fn begin(&self, leader: Leader) -> HookResult;

    /// The engine abandoned the transaction before it reached the WAL.
    /// Clear any state set up by `begin`.
    fn abort(&self, leader: Leader) -> HookResult;

    /// A batch of frames is being appended to the WAL. Forward it to
    /// the followers; the final batch of a transaction has
    /// [`FrameBatch::is_commit`] set.
    fn frames(&self, leader: Leader, batch: &FrameBatch<'_>) -> HookResult;

    /// The transaction is rolling back after frames were already
    /// dispatched.
    fn undo(&self, leader: Leader) -> HookResult;

    /// The transaction is over, successful or not.
    fn end(&self, leader: Leader) -> HookResult;
}

/// A hook set whose operations all succeed.
pub struct NoopWalReplication;

impl WalReplication for NoopWalReplication {
    fn begin(&self, _leader: Leader) -> HookResult {
        Ok(())
    }

    fn abort(&self, _leader: Leader) -> HookResult {
        Ok(())
    }

    fn frames(&self, _leader: Leader, _batch: &FrameBatch<'_>) -> HookResult {
        Ok(())
    }

    fn undo(&self, _leader: Leader) -> HookResult {
        Ok(())
    }

    fn end(&self, _leader: Leader) -> HookResult {
        Ok(())
    }
}

/// One frame of a leader-side batch.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Page content, [`FrameBatch::page_size`] bytes.
    pub data: &'a [u8],
    /// Page the frame updates.
    pub page_number: u32,
    /// Frame number of the previous frame for the same page, 0 if the
    /// page was not in the WAL yet.
    pub previous_frame: u32,
}

/// Index-addressable view over the batch of WAL frames the engine hands
/// to [`WalReplication::frames`].
pub struct FrameBatch<'a> {
    page_size: usize,
    frames: &'a [ffi::sqlite3_wal_replication_frame],
    truncate: u32,
    is_commit: bool,
}

impl<'a> FrameBatch<'a> {
    /// View over the engine's contiguous frame array.
    pub(crate) unsafe fn from_raw(
        sz_page: c_int,
        n_frame: c_int,
        a_frame: *const ffi::sqlite3_wal_replication_frame,
        n_truncate: c_uint,
        is_commit: c_int,
    ) -> FrameBatch<'a> {
        let frames: &[ffi::sqlite3_wal_replication_frame] =
            if a_frame.is_null() || n_frame <= 0 {
                &[]
            } else {
                std::slice::from_raw_parts(a_frame, n_frame as usize)
            };
        FrameBatch {
            page_size: sz_page.max(0) as usize,
            frames,
            truncate: n_truncate,
            is_commit: is_commit != 0,
        }
    }

    /// Number of frames in the batch.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Page size of every frame in the batch.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Size of the database in pages once the batch is applied.
    pub fn truncate(&self) -> u32 {
        self.truncate
    }

    /// Whether this batch concludes the transaction.
    pub fn is_commit(&self) -> bool {
        self.is_commit
    }

    /// The `index`-th frame of the batch.
    pub fn frame(&self, index: usize) -> Option<Frame<'a>> {
        let raw = self.frames.get(index)?;
        let data =
            unsafe { std::slice::from_raw_parts(raw.pBuf as *const u8, self.page_size) };
        Some(Frame {
            data,
            page_number: raw.pgno,
            previous_frame: raw.iPrev,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Frame<'a>> + '_ {
        (0..self.len()).filter_map(move |index| self.frame(index))
    }
}

/// A batch of WAL frames to apply on a follower connection: the page
/// numbers and the packed page contents, plus the transaction metadata
/// mirrored from the leader-side batch.
#[derive(Debug)]
pub struct FollowerFrames<'a> {
    is_begin: bool,
    page_size: usize,
    numbers: &'a [u32],
    pages: &'a [u8],
    truncate: u32,
    is_commit: bool,
}

impl<'a> FollowerFrames<'a> {
    /// Build a batch. `pages` holds the page contents back to back, one
    /// `page_size` chunk per entry of `numbers`; `is_begin` marks the
    /// first batch of a transaction and `truncate` the database size in
    /// pages after it commits.
    pub fn new(
        is_begin: bool,
        page_size: usize,
        numbers: &'a [u32],
        pages: &'a [u8],
        truncate: u32,
        is_commit: bool,
    ) -> Result<Self> {
        if pages.len() != numbers.len() * page_size {
            return Err(Error::FrameBatchMismatch {
                len: pages.len(),
                frames: numbers.len(),
                page_size,
            });
        }
        Ok(FollowerFrames {
            is_begin,
            page_size,
            numbers,
            pages,
            truncate,
            is_commit,
        })
    }

    /// Whether this is the first batch of a transaction.
    pub fn is_begin(&self) -> bool {
        self.is_begin
    }

    /// Page size of every frame in the batch.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Page number of each frame.
    pub fn numbers(&self) -> &'a [u32] {
        self.numbers
    }

    /// The packed page contents, `page_size` bytes per frame.
    pub fn pages(&self) -> &'a [u8] {
        self.pages
    }

    /// Size of the database in pages once the batch is applied.
    pub fn truncate(&self) -> u32 {
        self.truncate
    }

    /// Whether this batch concludes the transaction.
    pub fn is_commit(&self) -> bool {
        self.is_commit
    }

    /// Number of frames in the batch.
    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}
