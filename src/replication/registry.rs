//! Process-wide registry resolving the opaque integer identifiers that
//! cross the engine's callback ABI back into strong references.
//!
//! The engine only ever sees two integers: the replication id stored in
//! the hook table's app-data block and the connection id stored in the
//! per-connection argument block. Everything those integers refer to is
//! owned here, so tearing down a registration or a leader connection
//! frees the associated memory exactly once, under the lock.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::sync::{Arc, LazyLock};

use libsqlite3_sys as sqlite;
use parking_lot::RwLock;
use tracing::debug;

use super::ffi;
use super::{HookResult, Leader, WalReplication};
use crate::error::{Error, Result};

pub(crate) static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::new()));

/// Leader connection handle as stored in the registry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct DbPtr(pub(crate) *mut sqlite::sqlite3);

// The pointer is only stored and handed back to hooks; the registry
// never dereferences it.
unsafe impl Send for DbPtr {}
unsafe impl Sync for DbPtr {}

/// The heap-allocated integer the engine passes back to every hook for
/// one leader connection. Owned by the registry entry and freed exactly
/// once, when the connection leaves the replication.
pub(crate) struct ArgBlock(*mut c_int);

unsafe impl Send for ArgBlock {}
unsafe impl Sync for ArgBlock {}

impl ArgBlock {
    fn new(conn_id: c_int) -> Self {
        ArgBlock(Box::into_raw(Box::new(conn_id)))
    }

    pub(crate) fn as_ptr(&self) -> *mut c_int {
        self.0
    }
}

impl Drop for ArgBlock {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.0));
        }
    }
}

/// Engine-visible allocations backing one registration: the hook table,
/// the name it points at and the app-data block holding the replication
/// id. Dropping the handle frees all three; the engine must already have
/// been told to forget the hook table.
pub(crate) struct EngineHandle {
    methods: *mut ffi::sqlite3_wal_replication,
    // Referenced by methods.zName; kept alive with the handle.
    _name: CString,
    app_data: *mut c_int,
}

unsafe impl Send for EngineHandle {}
unsafe impl Sync for EngineHandle {}

impl EngineHandle {
    pub(crate) fn new(name: &str, id: c_int) -> Result<Self> {
        let name = CString::new(name).map_err(|_| Error::InvalidName(name.to_owned()))?;
        let app_data = Box::into_raw(Box::new(id));
        let methods = Box::into_raw(Box::new(ffi::replication_methods(
            name.as_ptr(),
            app_data as *mut c_void,
        )));
        Ok(EngineHandle {
            methods,
            _name: name,
            app_data,
        })
    }

    pub(crate) fn methods(&self) -> *mut ffi::sqlite3_wal_replication {
        self.methods
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.methods));
            drop(Box::from_raw(self.app_data));
        }
    }
}

struct ConnSlot {
    db: DbPtr,
    arg: ArgBlock,
}

pub(crate) struct Entry {
    name: String,
    hooks: Arc<dyn WalReplication>,
    conns: HashMap<c_int, ConnSlot>,
    engine: Option<EngineHandle>,
}

impl Entry {
    pub(crate) fn engine_methods(&self) -> Option<*mut ffi::sqlite3_wal_replication> {
        self.engine.as_ref().map(|engine| engine.methods())
    }
}

pub(crate) struct Registry {
    entries: HashMap<c_int, Entry>,
    names: HashMap<String, c_int>,
    next_replication_id: c_int,
    next_conn_id: c_int,
}

impl Registry {
    fn new() -> Self {
        Registry {
            entries: HashMap::new(),
            names: HashMap::new(),
            next_replication_id: 0,
            next_conn_id: 0,
        }
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Hand out the next replication id. Ids are stable for the life of
    /// the registration and never reused.
    pub(crate) fn reserve_id(&mut self) -> c_int {
        let id = self.next_replication_id;
        self.next_replication_id += 1;
        id
    }

    pub(crate) fn insert(
        &mut self,
        id: c_int,
        name: &str,
        hooks: Arc<dyn WalReplication>,
        engine: Option<EngineHandle>,
    ) {
        debug!(name, id, "registering replication hooks");
        self.names.insert(name.to_owned(), id);
        self.entries.insert(
            id,
            Entry {
                name: name.to_owned(),
                hooks,
                conns: HashMap::new(),
                engine,
            },
        );
    }

    /// Find a registration by hook-set identity.
    pub(crate) fn id_by_hooks(&self, hooks: &Arc<dyn WalReplication>) -> Option<c_int> {
        self.entries
            .iter()
            .find(|(_, entry)| Arc::ptr_eq(&entry.hooks, hooks))
            .map(|(id, _)| *id)
    }

    pub(crate) fn entry(&self, id: c_int) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Drop a registration. The returned entry owns the per-connection
    /// argument blocks and the engine-side allocations, which are all
    /// freed when it goes out of scope.
    pub(crate) fn remove(&mut self, id: c_int) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.names.remove(&entry.name);
        debug!(name = %entry.name, id, "unregistered replication hooks");
        Some(entry)
    }

    /// Record `db` as a leader connection of the named replication,
    /// allocating its connection id and argument block. Returns the
    /// connection id and the raw argument pointer to hand to the engine.
    pub(crate) fn add_leader(
        &mut self,
        name: &str,
        db: *mut sqlite::sqlite3,
    ) -> Result<(c_int, *mut c_int)> {
        let id = *self
            .names
            .get(name)
            .ok_or_else(|| Error::NotRegistered(name.to_owned()))?;
        // A connection may lead at most one replication.
        if self
            .entries
            .values()
            .any(|entry| entry.conns.values().any(|conn| conn.db.0 == db))
        {
            return Err(Error::AlreadyLeader);
        }
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        let arg = ArgBlock::new(conn_id);
        let arg_ptr = arg.as_ptr();
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| Error::NotRegistered(name.to_owned()))?;
        entry.conns.insert(conn_id, ConnSlot { db: DbPtr(db), arg });
        debug!(name, conn_id, "connection switched to leader replication");
        Ok((conn_id, arg_ptr))
    }

    /// Remove one leader connection of the named replication, freeing
    /// its argument block.
    pub(crate) fn remove_conn(&mut self, name: &str, conn_id: c_int) {
        if let Some(id) = self.names.get(name) {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.conns.remove(&conn_id);
            }
        }
    }

    /// Remove `db` from whichever replication it leads, if any.
    pub(crate) fn remove_db(&mut self, db: *mut sqlite::sqlite3) {
        for entry in self.entries.values_mut() {
            let found = entry
                .conns
                .iter()
                .find(|(_, conn)| conn.db.0 == db)
                .map(|(conn_id, _)| *conn_id);
            if let Some(conn_id) = found {
                entry.conns.remove(&conn_id);
                debug!(name = %entry.name, conn_id, "connection left replication");
                return;
            }
        }
    }

    /// Resolve the two identifiers carried across the callback ABI into
    /// the hook set and the leader connection.
    pub(crate) fn resolve(
        &self,
        replication: c_int,
        conn: c_int,
    ) -> Option<(Arc<dyn WalReplication>, Leader)> {
        let entry = self.entries.get(&replication)?;
        let slot = entry.conns.get(&conn)?;
        Some((Arc::clone(&entry.hooks), Leader::new(slot.db.0)))
    }
}

/// Run one hook through the registry. The read lock is held only for
/// the lookup: hooks run user code that may block or take the write
/// lock itself.
pub(crate) fn dispatch<F>(replication: c_int, conn: c_int, hook: F) -> c_int
where
    F: FnOnce(&dyn WalReplication, Leader) -> HookResult,
{
    let resolved = REGISTRY.read().resolve(replication, conn);
    match resolved {
        None => sqlite::SQLITE_ERROR,
        Some((hooks, leader)) => match hook(&*hooks, leader) {
            Ok(()) => sqlite::SQLITE_OK,
            Err(code) => code.0,
        },
    }
}
