//! # sqlite-volatile — in-memory SQLite storage with replication hooks
//!
//! `sqlite-volatile` extends SQLite with the two building blocks of a
//! replicated, in-memory database service:
//!
//! - A **volatile VFS** that keeps database files entirely in process
//!   memory, organised by logical page, with a dump/restore interface.
//! - A **WAL replication adapter** that reports every leader-side WAL
//!   transaction to application hooks and lets followers be driven
//!   through the same frames.
//!
//! Contents vanish with the process, files are not shared across
//! processes, and only WAL journal mode is supported.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sqlite_volatile::VolatileFileSystem;
//!
//! # fn main() -> sqlite_volatile::Result<()> {
//! let fs = VolatileFileSystem::register("volatile")?;
//!
//! // Engine connections opened with `vfs=volatile` now live in memory.
//! // The same files are reachable by name through the facade:
//! let exists = fs.access("test.db");
//!
//! // Snapshot everything to disk.
//! fs.dump("/tmp/backup")?;
//!
//! fs.unregister()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Replication
//!
//! With the `wal-replication` feature enabled (and an engine built with
//! the WAL replication extension), register a [`WalReplication`] hook
//! set and switch connections into leader or follower mode:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sqlite_volatile::replication;
//!
//! replication::register("my-cluster", Arc::new(MyHooks::new()))?;
//! unsafe { replication::set_leader(leader_db, "my-cluster")? };
//! unsafe { replication::set_follower(follower_db)? };
//! ```

pub mod error;
pub mod replication;
pub mod vfs;

pub use error::{Error, Result};
pub use replication::{
    ErrorCode, FollowerFrames, Frame, FrameBatch, HookResult, Leader, NoopWalReplication,
    WalReplication,
};
pub use vfs::{VolatileFile, VolatileFileSystem};
