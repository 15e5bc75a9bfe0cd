//! Persistent prepared statements bound to shared bindings.
//!
//! Each statement is compiled once and reused until dropped. It is bound
//! for its whole life to one parameter binding (and, for selects, one
//! result binding). Before every execute the binding's version is compared
//! with the version the statement last established its slots against.

#![allow(clippy::cast_possible_truncation)]

use crate::binding::{Binding, SharedBinding};
use crate::connection::SqliteConnection;
use crate::ffi;
use crate::types;
use objmap_core::{Error, Result, error::ContractErrorKind};
use std::ffi::c_int;
use std::ptr::NonNull;
use std::rc::Rc;

/// A compiled statement handle, finalized on drop.
struct Statement {
    conn: Rc<SqliteConnection>,
    handle: NonNull<ffi::sqlite3_stmt>,
    sql: String,
    param_count: usize,
    column_count: usize,
}

impl Statement {
    fn prepare(conn: &Rc<SqliteConnection>, sql: &str) -> Result<Self> {
        let handle = conn.prepare_raw(sql)?;
        // SAFETY: handle was just prepared and is valid
        let (param_count, column_count) = unsafe {
            (
                ffi::sqlite3_bind_parameter_count(handle.as_ptr()),
                ffi::sqlite3_column_count(handle.as_ptr()),
            )
        };

        tracing::trace!(sql = %sql, params = param_count, columns = column_count, "Prepared statement");

        Ok(Self {
            conn: Rc::clone(conn),
            handle,
            sql: sql.to_string(),
            param_count: param_count.max(0) as usize,
            column_count: column_count.max(0) as usize,
        })
    }

    fn raw(&self) -> *mut ffi::sqlite3_stmt {
        self.handle.as_ptr()
    }

    /// Re-establish parameter slots if the layout changed, then transfer
    /// the current slot values.
    fn bind_params(&self, binding: &Binding, seen: &mut Option<usize>) -> Result<()> {
        if *seen != Some(binding.version()) {
            // SAFETY: handle is valid
            unsafe { ffi::sqlite3_clear_bindings(self.raw()) };
            if binding.len() != self.param_count {
                return Err(Error::contract(
                    ContractErrorKind::BindingLayout,
                    format!(
                        "binding has {} slots but `{}` takes {} parameters",
                        binding.len(),
                        self.sql,
                        self.param_count
                    ),
                ));
            }
            *seen = Some(binding.version());
        }

        for (i, value) in binding.slots().iter().enumerate() {
            // SAFETY: handle is valid and i + 1 <= param_count
            let rc = unsafe { types::bind_value(self.raw(), (i + 1) as c_int, value) };
            if rc != ffi::SQLITE_OK {
                return Err(self.conn.bind_error(&self.sql, i + 1));
            }
        }
        Ok(())
    }

    /// Step once. `Ok(true)` means a row is available.
    fn step(&self) -> Result<bool> {
        // SAFETY: handle is valid
        match unsafe { ffi::sqlite3_step(self.raw()) } {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => Ok(false),
            _ => {
                let err = self.conn.step_error(&self.sql);
                self.reset();
                Err(err)
            }
        }
    }

    fn reset(&self) {
        // SAFETY: handle is valid; the return code repeats the last step error
        unsafe { ffi::sqlite3_reset(self.raw()) };
    }

    /// Run a statement that produces no rows and report rows affected.
    fn execute_modify(&self, binding: &SharedBinding, seen: &mut Option<usize>) -> Result<u64> {
        self.bind_params(&binding.borrow(), seen)?;
        self.step()?;
        let changes = self.conn.changes();
        self.reset();
        Ok(changes)
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: handle is valid and finalized exactly once
        unsafe {
            ffi::sqlite3_finalize(self.raw());
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("param_count", &self.param_count)
            .field("column_count", &self.column_count)
            .finish_non_exhaustive()
    }
}

/// Persist statement.
#[derive(Debug)]
pub struct InsertStatement {
    stmt: Statement,
    param: SharedBinding,
    param_version: Option<usize>,
}

impl InsertStatement {
    pub fn new(conn: &Rc<SqliteConnection>, sql: &str, param: &SharedBinding) -> Result<Self> {
        Ok(Self {
            stmt: Statement::prepare(conn, sql)?,
            param: Rc::clone(param),
            param_version: None,
        })
    }

    /// Insert a row. Returns `false` if a row with the same primary key
    /// already exists.
    pub fn execute(&mut self) -> Result<bool> {
        self.stmt
            .bind_params(&self.param.borrow(), &mut self.param_version)?;

        // SAFETY: handle is valid
        let rc = unsafe { ffi::sqlite3_step(self.stmt.raw()) };
        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                self.stmt.reset();
                Ok(true)
            }
            _ if self.stmt.conn.extended_errcode() == ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                self.stmt.reset();
                Ok(false)
            }
            _ => {
                let err = self.stmt.conn.step_error(&self.stmt.sql);
                self.stmt.reset();
                Err(err)
            }
        }
    }

    /// Rowid assigned by the most recent successful insert on the connection.
    pub fn last_insert_id(&self) -> i64 {
        self.stmt.conn.last_insert_rowid()
    }

    pub fn sql(&self) -> &str {
        &self.stmt.sql
    }
}

/// Find statement: parameters from one binding, row into another.
#[derive(Debug)]
pub struct SelectStatement {
    stmt: Statement,
    param: SharedBinding,
    result: SharedBinding,
    param_version: Option<usize>,
    result_version: Option<usize>,
    active: bool,
}

impl SelectStatement {
    pub fn new(
        conn: &Rc<SqliteConnection>,
        sql: &str,
        param: &SharedBinding,
        result: &SharedBinding,
    ) -> Result<Self> {
        Ok(Self {
            stmt: Statement::prepare(conn, sql)?,
            param: Rc::clone(param),
            result: Rc::clone(result),
            param_version: None,
            result_version: None,
            active: false,
        })
    }

    /// Bind parameters and start a new result set.
    pub fn execute(&mut self) -> Result<()> {
        if self.active {
            self.free_result();
        }
        self.stmt
            .bind_params(&self.param.borrow(), &mut self.param_version)?;
        self.active = true;
        Ok(())
    }

    /// Advance to the next row, copying it into the result binding.
    /// Returns `false` once the result set is exhausted.
    pub fn fetch(&mut self) -> Result<bool> {
        if !self.stmt.step()? {
            return Ok(false);
        }

        let mut result = self.result.borrow_mut();
        if self.result_version != Some(result.version()) {
            if result.len() != self.stmt.column_count {
                return Err(Error::contract(
                    ContractErrorKind::BindingLayout,
                    format!(
                        "result binding has {} slots but `{}` returns {} columns",
                        result.len(),
                        self.stmt.sql,
                        self.stmt.column_count
                    ),
                ));
            }
            self.result_version = Some(result.version());
        }

        for (i, slot) in result.slots_mut().iter_mut().enumerate() {
            // SAFETY: step just returned SQLITE_ROW and i < column_count
            *slot = unsafe { types::read_column(self.stmt.raw(), i as c_int) };
        }
        Ok(true)
    }

    /// Discard the rest of the current result set.
    pub fn free_result(&mut self) {
        self.stmt.reset();
        self.active = false;
    }

    pub fn sql(&self) -> &str {
        &self.stmt.sql
    }
}

/// Update statement; reports rows affected.
#[derive(Debug)]
pub struct UpdateStatement {
    stmt: Statement,
    param: SharedBinding,
    param_version: Option<usize>,
}

impl UpdateStatement {
    pub fn new(conn: &Rc<SqliteConnection>, sql: &str, param: &SharedBinding) -> Result<Self> {
        Ok(Self {
            stmt: Statement::prepare(conn, sql)?,
            param: Rc::clone(param),
            param_version: None,
        })
    }

    pub fn execute(&mut self) -> Result<u64> {
        self.stmt
            .execute_modify(&self.param, &mut self.param_version)
    }

    pub fn sql(&self) -> &str {
        &self.stmt.sql
    }
}

/// Erase statement; reports rows affected.
#[derive(Debug)]
pub struct DeleteStatement {
    stmt: Statement,
    param: SharedBinding,
    param_version: Option<usize>,
}

impl DeleteStatement {
    pub fn new(conn: &Rc<SqliteConnection>, sql: &str, param: &SharedBinding) -> Result<Self> {
        Ok(Self {
            stmt: Statement::prepare(conn, sql)?,
            param: Rc::clone(param),
            param_version: None,
        })
    }

    pub fn execute(&mut self) -> Result<u64> {
        self.stmt
            .execute_modify(&self.param, &mut self.param_version)
    }

    pub fn sql(&self) -> &str {
        &self.stmt.sql
    }
}
