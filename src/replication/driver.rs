//! Engine-facing entry points of the replication adapter. Everything
//! here calls into the WAL replication extension of the engine and is
//! compiled only with the `wal-replication` feature.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::sync::Arc;

use libsqlite3_sys as sqlite;
use tracing::info;

use super::ffi;
use super::registry::{EngineHandle, REGISTRY};
use super::{FollowerFrames, WalReplication};
use crate::error::{Error, Result};

// Replication applies to the main schema; attached databases are not
// replicated.
const SCHEMA: &[u8] = b"main\0";

fn schema() -> *const c_char {
    SCHEMA.as_ptr() as *const c_char
}

/// Register a hook set with the engine under `name`. Fails if the name
/// is already taken.
pub fn register(name: &str, hooks: Arc<dyn WalReplication>) -> Result<()> {
    info!(name, "registering WAL replication");
    let mut registry = REGISTRY.write();
    if registry.contains_name(name) {
        return Err(Error::AlreadyRegistered(name.to_owned()));
    }
    let id = registry.reserve_id();
    let engine = EngineHandle::new(name, id)?;
    let rc = unsafe { ffi::sqlite3_wal_replication_register(engine.methods(), 0) };
    if rc != sqlite::SQLITE_OK {
        return Err(Error::Engine(rc));
    }
    registry.insert(id, name, hooks, Some(engine));
    Ok(())
}

/// Remove a previously registered hook set, dropping every leader
/// connection record and argument block associated with it.
pub fn unregister(hooks: &Arc<dyn WalReplication>) -> Result<()> {
    let mut registry = REGISTRY.write();
    let id = registry
        .id_by_hooks(hooks)
        .ok_or_else(|| Error::NotRegistered("hook set".to_owned()))?;
    if let Some(methods) = registry.entry(id).and_then(|entry| entry.engine_methods()) {
        let rc = unsafe { ffi::sqlite3_wal_replication_unregister(methods) };
        if rc != sqlite::SQLITE_OK {
            return Err(Error::Engine(rc));
        }
    }
    registry.remove(id);
    Ok(())
}

/// Switch a connection to leader mode under the named replication. WAL
/// transactions on the connection will drive the registered hooks.
///
/// # Safety
///
/// `db` must be a valid open connection handle in WAL journal mode.
pub unsafe fn set_leader(db: *mut sqlite::sqlite3, name: &str) -> Result<()> {
    let z_name = CString::new(name).map_err(|_| Error::InvalidName(name.to_owned()))?;
    let mut registry = REGISTRY.write();
    let (conn_id, arg) = registry.add_leader(name, db)?;
    let rc =
        ffi::sqlite3_wal_replication_leader(db, schema(), z_name.as_ptr(), arg as *mut c_void);
    if rc != sqlite::SQLITE_OK {
        registry.remove_conn(name, conn_id);
        return Err(Error::Engine(rc));
    }
    Ok(())
}

/// Switch a connection to follower mode. No ordinary SQL executes on a
/// follower; drive it with [`apply_frames`] and [`undo`].
///
/// # Safety
///
/// `db` must be a valid open connection handle in WAL journal mode.
pub unsafe fn set_follower(db: *mut sqlite::sqlite3) -> Result<()> {
    let rc = ffi::sqlite3_wal_replication_follower(db, schema());
    if rc != sqlite::SQLITE_OK {
        return Err(Error::Engine(rc));
    }
    Ok(())
}

/// Switch replication off for a connection. If it was a leader, its
/// registry record and argument block are released.
///
/// # Safety
///
/// `db` must be a valid open connection handle.
pub unsafe fn set_none(db: *mut sqlite::sqlite3) -> Result<()> {
    let mut registry = REGISTRY.write();
    let rc = ffi::sqlite3_wal_replication_none(db, schema());
    if rc != sqlite::SQLITE_OK {
        return Err(Error::Engine(rc));
    }
    registry.remove_db(db);
    Ok(())
}

/// Apply a batch of WAL frames to a follower connection.
///
/// # Safety
///
/// `db` must be a valid open follower connection handle.
pub unsafe fn apply_frames(db: *mut sqlite::sqlite3, frames: &FollowerFrames<'_>) -> Result<()> {
    let rc = ffi::sqlite3_wal_replication_frames(
        db,
        schema(),
        frames.is_begin() as c_int,
        frames.page_size() as c_int,
        frames.len() as c_int,
        frames.numbers().as_ptr() as *mut c_uint,
        frames.pages().as_ptr() as *mut c_void,
        frames.truncate(),
        frames.is_commit() as c_int,
    );
    if rc != sqlite::SQLITE_OK {
        return Err(Error::Engine(rc));
    }
    Ok(())
}

/// Roll back the write transaction in progress on a follower
/// connection.
///
/// # Safety
///
/// `db` must be a valid open follower connection handle.
pub unsafe fn undo(db: *mut sqlite::sqlite3) -> Result<()> {
    let rc = ffi::sqlite3_wal_replication_undo(db, schema());
    if rc != sqlite::SQLITE_OK {
        return Err(Error::Engine(rc));
    }
    Ok(())
}
