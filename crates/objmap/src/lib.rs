//! objmap - persist Rust objects in SQLite.
//!
//! A persistent type implements [`ObjectTraits`], which names its table,
//! its column counts, the SQL of its five object statements and the
//! functions moving data between object, image and binding slots. The
//! [`Database`] then persists, loads, updates and erases objects of that
//! type, keeping one [`ObjectStatements`] cache per type so every statement
//! is prepared once and reused.
//!
//! # Quick Start
//!
//! ```ignore
//! use objmap::prelude::*;
//!
//! let mut db = Database::open(&SqliteConfig::memory())?;
//! db.execute_raw("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL, mentor INTEGER)")?;
//!
//! db.persist(Person::new(1, "Ada", None))?;
//! db.persist(Person::new(2, "Brian", Some(1)))?;
//! db.session_mut().clear();
//!
//! // Loads Brian, then Ada through the delayed-load queue
//! let brian = db.load::<Person>(&2)?;
//! let ada = db.get(brian).and_then(|p| p.mentor).unwrap();
//! assert_eq!(db.get(ada).unwrap().name, "Ada");
//! ```
//!
//! # Recursive loads
//!
//! Each type's statements own a single set of image buffers. While a load
//! of a type is using them, a nested load of the same type is queued and
//! handed back as a pending [`ObjectRef`]; the queue is drained, in order,
//! before the outermost load returns.
//!
//! # Optimistic concurrency
//!
//! Types with a managed version column (`MANAGED_OPTIMISTIC_COLUMN_COUNT =
//! 1`) get version-checked updates and erases. A stale write fails with an
//! error for which [`Error::is_concurrency_conflict`] is true.

pub use objmap_core::error::{
    ConfigError, ConnectionError, ConnectionErrorKind, ContractError, ContractErrorKind,
    ObjectError, ObjectErrorKind, QueryError, QueryErrorKind, TypeError,
};
pub use objmap_core::{Error, Result, Value};

pub use objmap_sqlite::{
    AutoLock, AutoUnlock, Binding, ColumnCounts, ContainerFactory, ContainerStatementCachePtr,
    Database, DeleteStatement, DelayedLoad, Image, InsertStatement, Loader, Lockable,
    ObjectRef, ObjectStatements, ObjectStatementsRef, ObjectTraits, OpenFlags, OptimisticData,
    Position, ReentrancyLock, SelectStatement, Session, SharedBinding, SqliteConfig,
    SqliteConnection, StatementCache, StatementKind, UpdateStatement, discard_delayed,
    load_delayed, sqlite_version,
};

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        // Errors and values
        Error,
        Result,
        Value,
        // Database
        Database,
        OpenFlags,
        SqliteConfig,
        // Mapping
        Image,
        ObjectRef,
        ObjectTraits,
        StatementKind,
    };
}
