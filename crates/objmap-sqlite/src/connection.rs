//! SQLite connection implementation.
//!
//! A connection owns the raw `sqlite3` handle. It is deliberately neither
//! `Send` nor `Sync`: a connection and every statement cache built on it
//! belong to one thread at a time.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi;
use crate::types;
use objmap_core::{
    Error, Value,
    error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind},
};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::ffi::{CStr, CString, c_int};
use std::ptr::{self, NonNull};

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode (connections not shared between threads).
    pub no_mutex: bool,
    /// Open in serialized mode (connections can be shared).
    pub full_mutex: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
    /// Disable shared cache mode.
    pub private_cache: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }
        if self.private_cache {
            flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Parse a config from JSON, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    db: NonNull<ffi::sqlite3>,
    path: String,
    in_transaction: Cell<bool>,
    prepared: Cell<u64>,
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is a valid (failed) handle that must still be closed
                unsafe {
                    let msg = ffi::errmsg(db);
                    ffi::sqlite3_close_v2(db);
                    msg
                }
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        let db = NonNull::new(db).ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "sqlite3_open_v2 returned a null handle".to_string(),
                source: None,
            })
        })?;

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db.as_ptr(), config.busy_timeout_ms as c_int);
            }
        }

        tracing::debug!(path = %config.path, "Opened SQLite connection");

        Ok(Self {
            db,
            path: config.path.clone(),
            in_transaction: Cell::new(false),
            prepared: Cell::new(0),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self, Error> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn handle(&self) -> *mut ffi::sqlite3 {
        self.db.as_ptr()
    }

    /// Number of statements prepared on this connection so far.
    pub fn prepared_statements(&self) -> u64 {
        self.prepared.get()
    }

    /// Whether a transaction started through this connection is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    /// Execute SQL directly without preparing (for DDL, etc.)
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.handle(),
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                &mut errmsg,
            )
        };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg was allocated by sqlite3_exec
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            };

            return Err(Error::Query(QueryError {
                kind: error_code_to_kind(rc),
                sql: Some(sql.to_string()),
                message: msg,
                source: None,
            }));
        }

        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(self.handle()) }
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> u64 {
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_changes(self.handle()) };
        n.max(0) as u64
    }

    /// Prepare, run and finalize a one-off query, returning every row.
    ///
    /// Object statements never go through here; this is for ad-hoc
    /// inspection and setup code.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, Error> {
        let stmt = self.prepare_raw(sql)?;
        let result = self.run_query(stmt.as_ptr(), sql, params);
        // SAFETY: stmt is valid and finalized exactly once
        unsafe { ffi::sqlite3_finalize(stmt.as_ptr()) };
        result
    }

    /// Prepare, run and finalize a one-off statement, returning rows affected.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let stmt = self.prepare_raw(sql)?;
        let result = self.run_query(stmt.as_ptr(), sql, params);
        // SAFETY: stmt is valid and finalized exactly once
        unsafe { ffi::sqlite3_finalize(stmt.as_ptr()) };
        result.map(|_| self.changes())
    }

    fn run_query(
        &self,
        stmt: *mut ffi::sqlite3_stmt,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, Error> {
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(stmt, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                return Err(self.bind_error(sql, i + 1));
            }
        }

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt) };
        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt) } {
                ffi::SQLITE_ROW => {
                    let row = (0..col_count)
                        // SAFETY: we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt, i) })
                        .collect();
                    rows.push(row);
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(self.step_error(sql)),
            }
        }
        Ok(rows)
    }

    /// Begin a transaction.
    pub fn begin(&self) -> Result<(), Error> {
        if self.in_transaction.get() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                message: "Already in a transaction".to_string(),
                source: None,
            }));
        }
        self.execute_raw("BEGIN IMMEDIATE")?;
        self.in_transaction.set(true);
        tracing::trace!("BEGIN");
        Ok(())
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> Result<(), Error> {
        self.finish_transaction("COMMIT")
    }

    /// Rollback the current transaction.
    pub fn rollback(&self) -> Result<(), Error> {
        self.finish_transaction("ROLLBACK")
    }

    fn finish_transaction(&self, sql: &'static str) -> Result<(), Error> {
        if !self.in_transaction.get() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                message: "Not in a transaction".to_string(),
                source: None,
            }));
        }
        self.execute_raw(sql)?;
        self.in_transaction.set(false);
        tracing::trace!("{}", sql);
        Ok(())
    }

    /// Compile `sql` into a statement handle owned by the caller.
    pub(crate) fn prepare_raw(&self, sql: &str) -> Result<NonNull<ffi::sqlite3_stmt>, Error> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                self.handle(),
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut stmt,
                ptr::null_mut(),
            )
        };

        if rc != ffi::SQLITE_OK {
            return Err(self.prepare_error(sql));
        }

        // An empty or comment-only string compiles to no statement
        let stmt = NonNull::new(stmt).ok_or_else(|| {
            Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: "SQL contains no statement".to_string(),
                source: None,
            })
        })?;

        self.prepared.set(self.prepared.get() + 1);
        Ok(stmt)
    }

    pub(crate) fn prepare_error(&self, sql: &str) -> Error {
        // SAFETY: db is valid
        let (msg, code) = unsafe { (ffi::errmsg(self.handle()), ffi::sqlite3_errcode(self.handle())) };

        Error::Query(QueryError {
            kind: error_code_to_kind(code),
            sql: Some(sql.to_string()),
            message: msg,
            source: None,
        })
    }

    pub(crate) fn bind_error(&self, sql: &str, param_index: usize) -> Error {
        // SAFETY: db is valid
        let msg = unsafe { ffi::errmsg(self.handle()) };

        Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: Some(sql.to_string()),
            message: format!("Failed to bind parameter {}: {}", param_index, msg),
            source: None,
        })
    }

    pub(crate) fn step_error(&self, sql: &str) -> Error {
        // SAFETY: db is valid
        let (msg, code) = unsafe { (ffi::errmsg(self.handle()), ffi::sqlite3_errcode(self.handle())) };

        Error::Query(QueryError {
            kind: error_code_to_kind(code),
            sql: Some(sql.to_string()),
            message: msg,
            source: None,
        })
    }

    /// Extended result code of the most recent failure on this connection.
    pub(crate) fn extended_errcode(&self) -> c_int {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_extended_errcode(self.handle()) }
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        // close_v2 defers the close until outstanding statements are finalized
        // SAFETY: db is valid and closed exactly once
        unsafe {
            ffi::sqlite3_close_v2(self.handle());
        }
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("in_transaction", &self.in_transaction.get())
            .field("prepared", &self.prepared.get())
            .finish_non_exhaustive()
    }
}

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

pub(crate) fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // Extended codes carry the primary code in the low byte
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT | ffi::SQLITE_ABORT => QueryErrorKind::Cancelled,
        _ => QueryErrorKind::Database,
    }
}
