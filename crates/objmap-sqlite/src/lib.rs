//! SQLite object persistence runtime.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate maps application objects to SQLite rows. Each persistent type
//! describes itself through [`ObjectTraits`]; the runtime keeps, per type
//! and connection, an [`ObjectStatements`] cache of image buffers, bindings
//! and prepared statements, and drives it from the [`Database`] operations.
//!
//! # Features
//!
//! - Prepared statements built once per type and reused
//! - Recursive object graphs loaded without clobbering in-flight buffers
//! - Optimistic concurrency through a managed version column
//! - Container statement caches for collection-valued members
//! - In-memory and file-based databases with configurable open flags
//!
//! # Example
//!
//! ```rust,ignore
//! use objmap_sqlite::{Database, SqliteConfig};
//!
//! let mut db = Database::open(&SqliteConfig::memory())?;
//! db.execute_raw("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT, mentor INTEGER)")?;
//!
//! let alice = db.persist(Person::new(1, "Alice", None))?;
//! let bob = db.persist(Person::new(2, "Bob", Some(1)))?;
//!
//! let loaded = db.load::<Person>(&2)?;
//! assert_eq!(db.get(loaded).unwrap().name, "Bob");
//! ```
//!
//! # Threading
//!
//! A connection and everything built on it belongs to one thread. The
//! reentrancy lock on object statements guards against recursive use of
//! one type's buffers within that thread, not against other threads.

pub mod binding;
pub mod connection;
pub mod database;
pub mod ffi;
pub mod session;
pub mod statement;
pub mod statement_cache;
pub mod statements;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

pub use binding::{Binding, SharedBinding, StatementKind};
pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};
pub use database::Database;
pub use session::{ObjectRef, Position, Session};
pub use statement::{DeleteStatement, InsertStatement, SelectStatement, UpdateStatement};
pub use statement_cache::{ObjectStatementsRef, StatementCache};
pub use statements::{
    AutoLock, AutoUnlock, ContainerFactory, ContainerStatementCachePtr, DelayedLoad, Loader,
    Lockable, ObjectStatements, OptimisticData, ReentrancyLock, discard_delayed, load_delayed,
};
pub use traits::{ColumnCounts, Image, ObjectTraits};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
