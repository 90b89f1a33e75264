//! C ABI surface of the engine's WAL replication extension.
//!
//! The hook table layout and the entry points mirror the engine headers.
//! The trampolines installed in the table read the replication id from
//! the table's app-data block and the connection id from the
//! per-connection argument block, then resolve both through the
//! registry; no Rust reference ever crosses the ABI.

#![allow(non_camel_case_types, non_snake_case)]

use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::ptr;

use libsqlite3_sys as sqlite;

use super::registry;
use super::FrameBatch;

/// One WAL frame as the engine hands it to the frames hook.
#[repr(C)]
pub struct sqlite3_wal_replication_frame {
    /// Page content, `szPage` bytes.
    pub pBuf: *mut c_void,
    /// Page number the frame updates.
    pub pgno: c_uint,
    /// Frame number of the previous frame for the same page, 0 for none.
    pub iPrev: c_uint,
}

/// The engine's WAL replication hook table.
#[repr(C)]
pub struct sqlite3_wal_replication {
    pub iVersion: c_int,
    pub pNext: *mut sqlite3_wal_replication,
    pub zName: *const c_char,
    pub pAppData: *mut c_void,
    pub xBegin:
        Option<unsafe extern "C" fn(*mut sqlite3_wal_replication, *mut c_void) -> c_int>,
    pub xAbort:
        Option<unsafe extern "C" fn(*mut sqlite3_wal_replication, *mut c_void) -> c_int>,
    pub xFrames: Option<
        unsafe extern "C" fn(
            *mut sqlite3_wal_replication,
            *mut c_void,
            c_int,
            c_int,
            *mut sqlite3_wal_replication_frame,
            c_uint,
            c_int,
        ) -> c_int,
    >,
    pub xUndo:
        Option<unsafe extern "C" fn(*mut sqlite3_wal_replication, *mut c_void) -> c_int>,
    pub xEnd:
        Option<unsafe extern "C" fn(*mut sqlite3_wal_replication, *mut c_void) -> c_int>,
}

#[cfg(feature = "wal-replication")]
extern "C" {
    pub(crate) fn sqlite3_wal_replication_register(
        replication: *mut sqlite3_wal_replication,
        make_default: c_int,
    ) -> c_int;
    pub(crate) fn sqlite3_wal_replication_unregister(
        replication: *mut sqlite3_wal_replication,
    ) -> c_int;
    pub(crate) fn sqlite3_wal_replication_leader(
        db: *mut sqlite::sqlite3,
        schema: *const c_char,
        name: *const c_char,
        arg: *mut c_void,
    ) -> c_int;
    pub(crate) fn sqlite3_wal_replication_follower(
        db: *mut sqlite::sqlite3,
        schema: *const c_char,
    ) -> c_int;
    pub(crate) fn sqlite3_wal_replication_none(
        db: *mut sqlite::sqlite3,
        schema: *const c_char,
    ) -> c_int;
    pub(crate) fn sqlite3_wal_replication_frames(
        db: *mut sqlite::sqlite3,
        schema: *const c_char,
        is_begin: c_int,
        sz_page: c_int,
        n_frame: c_int,
        a_pgno: *mut c_uint,
        a_page: *mut c_void,
        n_truncate: c_uint,
        is_commit: c_int,
    ) -> c_int;
    pub(crate) fn sqlite3_wal_replication_undo(
        db: *mut sqlite::sqlite3,
        schema: *const c_char,
    ) -> c_int;
}

/// Build a hook table dispatching to the registry. `z_name` and
/// `app_data` must stay alive for as long as the table is registered.
pub(crate) fn replication_methods(
    z_name: *const c_char,
    app_data: *mut c_void,
) -> sqlite3_wal_replication {
    sqlite3_wal_replication {
        iVersion: 1,
        pNext: ptr::null_mut(),
        zName: z_name,
        pAppData: app_data,
        xBegin: Some(replication_begin),
        xAbort: Some(replication_abort),
        xFrames: Some(replication_frames),
        xUndo: Some(replication_undo),
        xEnd: Some(replication_end),
    }
}

/// Read the replication and connection identifiers from their stable
/// locations.
unsafe fn hook_ids(
    replication: *mut sqlite3_wal_replication,
    arg: *mut c_void,
) -> Option<(c_int, c_int)> {
    if replication.is_null() || arg.is_null() {
        return None;
    }
    let app_data = (*replication).pAppData as *const c_int;
    if app_data.is_null() {
        return None;
    }
    Some((*app_data, *(arg as *const c_int)))
}

pub(crate) unsafe extern "C" fn replication_begin(
    replication: *mut sqlite3_wal_replication,
    arg: *mut c_void,
) -> c_int {
    match hook_ids(replication, arg) {
        Some((id, conn)) => registry::dispatch(id, conn, |hooks, leader| hooks.begin(leader)),
        None => sqlite::SQLITE_ERROR,
    }
}

pub(crate) unsafe extern "C" fn replication_abort(
    replication: *mut sqlite3_wal_replication,
    arg: *mut c_void,
) -> c_int {
    match hook_ids(replication, arg) {
        Some((id, conn)) => registry::dispatch(id, conn, |hooks, leader| hooks.abort(leader)),
        None => sqlite::SQLITE_ERROR,
    }
}

pub(crate) unsafe extern "C" fn replication_frames(
    replication: *mut sqlite3_wal_replication,
    arg: *mut c_void,
    sz_page: c_int,
    n_frame: c_int,
    a_frame: *mut sqlite3_wal_replication_frame,
    n_truncate: c_uint,
    is_commit: c_int,
) -> c_int {
    match hook_ids(replication, arg) {
        Some((id, conn)) => {
            let batch = FrameBatch::from_raw(sz_page, n_frame, a_frame, n_truncate, is_commit);
            registry::dispatch(id, conn, |hooks, leader| hooks.frames(leader, &batch))
        }
        None => sqlite::SQLITE_ERROR,
    }
}

pub(crate) unsafe extern "C" fn replication_undo(
    replication: *mut sqlite3_wal_replication,
    arg: *mut c_void,
) -> c_int {
    match hook_ids(replication, arg) {
        Some((id, conn)) => registry::dispatch(id, conn, |hooks, leader| hooks.undo(leader)),
        None => sqlite::SQLITE_ERROR,
    }
}

pub(crate) unsafe extern "C" fn replication_end(
    replication: *mut sqlite3_wal_replication,
    arg: *mut c_void,
) -> c_int {
    match hook_ids(replication, arg) {
        Some((id, conn)) => registry::dispatch(id, conn, |hooks, leader| hooks.end(leader)),
        None => sqlite::SQLITE_ERROR,
    }
}
