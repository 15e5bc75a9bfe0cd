//! Database: persist, load, update and erase objects.
//!
//! Loading drives the object statements: it takes the type's auto-lock,
//! fetches the row into the image and builds the object. A reference to
//! another object of the same type found while the lock is held is queued
//! as a delayed load and resolved before the outermost load returns.

use crate::connection::{SqliteConfig, SqliteConnection};
use crate::session::{ObjectRef, Position, Session};
use crate::statement_cache::{ObjectStatementsRef, StatementCache};
use crate::statements::{AutoLock, ObjectStatements, discard_delayed, load_delayed};
use crate::traits::ObjectTraits;
use objmap_core::{
    Error, Result,
    error::{ObjectError, ObjectErrorKind},
};
use std::rc::Rc;

/// An open database with its statement cache and object session.
pub struct Database {
    conn: Rc<SqliteConnection>,
    statements: StatementCache,
    session: Session,
}

fn object_error<T: ObjectTraits>(kind: ObjectErrorKind, id: &T::Id) -> Error {
    Error::Object(ObjectError::new(kind, T::TABLE_NAME, Some(format!("{:?}", id))))
}

impl Database {
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let conn = Rc::new(SqliteConnection::open(config)?);
        Ok(Self {
            statements: StatementCache::new(&conn),
            conn,
            session: Session::new(),
        })
    }

    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    pub fn connection(&self) -> &Rc<SqliteConnection> {
        &self.conn
    }

    /// Execute SQL directly, e.g. schema creation.
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_raw(sql)
    }

    pub fn begin(&self) -> Result<()> {
        self.conn.begin()
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.rollback()
    }

    /// The statement cache for `T` on this connection.
    pub fn statements<T: ObjectTraits>(&mut self) -> ObjectStatementsRef<T> {
        self.statements.find_object::<T>()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn get<T: ObjectTraits>(&self, handle: ObjectRef<T>) -> Option<&T> {
        self.session.get(handle)
    }

    pub fn get_mut<T: ObjectTraits>(&mut self, handle: ObjectRef<T>) -> Option<&mut T> {
        self.session.get_mut(handle)
    }

    /// Insert a new object and cache it.
    #[tracing::instrument(level = "debug", skip(self, obj), fields(table = T::TABLE_NAME))]
    pub fn persist<T: ObjectTraits>(&mut self, mut obj: T) -> Result<ObjectRef<T>> {
        let sts = self.statements.find_object::<T>();
        {
            let mut sts = sts.borrow_mut();
            sts.bind_insert_image(&obj);
            let stmt = sts.persist_statement()?;
            if !stmt.execute()? {
                return Err(object_error::<T>(
                    ObjectErrorKind::AlreadyPersistent,
                    &obj.id(),
                ));
            }
            obj.assign_rowid(stmt.last_insert_id());
            if T::MANAGED_OPTIMISTIC_COLUMN_COUNT > 0 {
                obj.set_version(1);
            }

            sts.bind_id_image(&obj.id());
            T::persist_containers(&mut sts, &obj)?;
        }

        tracing::trace!(id = ?obj.id(), "Persisted");
        Ok(self.session.insert(obj))
    }

    /// Load the object with `id`, or `None` if there is no such row.
    ///
    /// An object already in the session is returned without a query. When
    /// called while `T`'s statements are locked by an enclosing load, the
    /// load is queued and a handle to the pending object returned at once;
    /// a missing row then surfaces as an error from the enclosing load.
    #[tracing::instrument(level = "debug", skip(self), fields(table = T::TABLE_NAME))]
    pub fn find<T: ObjectTraits>(&mut self, id: &T::Id) -> Result<Option<ObjectRef<T>>> {
        if let Some(handle) = self.session.lookup::<T>(id) {
            return Ok(Some(handle));
        }

        self.find_uncached::<T>(id)
    }

    /// Like [`find`](Self::find), but a missing row is an error.
    pub fn load<T: ObjectTraits>(&mut self, id: &T::Id) -> Result<ObjectRef<T>> {
        self.find::<T>(id)?
            .ok_or_else(|| object_error::<T>(ObjectErrorKind::NotPersistent, id))
    }

    fn find_uncached<T: ObjectTraits>(&mut self, id: &T::Id) -> Result<Option<ObjectRef<T>>> {
        let sts = self.statements.find_object::<T>();
        let mut lock = AutoLock::new(&*sts)?;

        if !lock.locked() {
            let position = self.session.reserve::<T>(id.clone());
            let target = position.target();
            let queued = sts
                .borrow_mut()
                .delay_load(id.clone(), target, position.clone(), None);
            if let Err(e) = queued {
                self.session.erase_position(&position);
                return Err(e);
            }
            return Ok(Some(target));
        }

        if !sts.borrow_mut().find_image(id)? {
            return Ok(None);
        }

        let position = self.session.reserve::<T>(id.clone());
        match self.load_placed(&sts, &mut lock, &position) {
            Ok(()) => {
                self.session.mark_loaded(&position);
                Ok(Some(position.target()))
            }
            Err(e) => {
                // Nothing placed by this load may outlive it
                let discarded = discard_delayed(&sts, self);
                self.session.erase_position(&position);
                tracing::debug!(id = ?id, discarded, "Load failed, placements erased");
                Err(e)
            }
        }
    }

    /// Build the object for a placement whose row is in the select image.
    fn load_placed<T: ObjectTraits>(
        &mut self,
        sts: &ObjectStatementsRef<T>,
        lock: &mut AutoLock<'_, ObjectStatements<T>>,
        position: &Position<T>,
    ) -> Result<()> {
        let target = position.target();

        let image = sts.borrow_mut().take_image();
        let obj = T::init_object(&image, self);
        sts.borrow_mut().restore_image(image);
        let mut obj = obj?;

        {
            let mut sts = sts.borrow_mut();
            sts.bind_id_image(position.id());
            T::load_containers(&mut sts, &mut obj)?;
        }
        self.session.store(target, obj);

        load_delayed(sts, self)?;
        lock.unlock()?;

        T::post_load(self, target)
    }

    /// Write a cached object back to its row.
    ///
    /// For types with a version column the update is conditional on the
    /// version the object was loaded with, and bumps it on success.
    #[tracing::instrument(level = "debug", skip(self), fields(table = T::TABLE_NAME))]
    pub fn update<T: ObjectTraits>(&mut self, handle: ObjectRef<T>) -> Result<()> {
        let sts = self.statements.find_object::<T>();
        let optimistic = T::MANAGED_OPTIMISTIC_COLUMN_COUNT > 0;

        let Some(obj) = self.session.get(handle) else {
            return Err(Error::Object(ObjectError::new(
                ObjectErrorKind::NotPersistent,
                T::TABLE_NAME,
                None,
            )));
        };
        let id = obj.id();
        let version = obj.version();

        let rows = {
            let mut sts = sts.borrow_mut();
            sts.bind_update_image(obj);
            sts.update_statement()?.execute()?
        };

        if rows == 0 {
            if optimistic {
                tracing::warn!(id = ?id, version, "Optimistic update found the row changed");
                return Err(object_error::<T>(ObjectErrorKind::Changed, &id));
            }
            return Err(object_error::<T>(ObjectErrorKind::NotPersistent, &id));
        }

        if optimistic {
            if let Some(obj) = self.session.get_mut(handle) {
                obj.set_version(version + 1);
            }
        }
        Ok(())
    }

    /// Delete the row with `id` and drop it from the session.
    #[tracing::instrument(level = "debug", skip(self), fields(table = T::TABLE_NAME))]
    pub fn erase<T: ObjectTraits>(&mut self, id: &T::Id) -> Result<()> {
        let sts = self.statements.find_object::<T>();
        let rows = {
            let mut sts = sts.borrow_mut();
            sts.bind_id_image(id);
            T::erase_containers(&mut sts)?;
            sts.erase_statement()?.execute()?
        };

        if rows == 0 {
            return Err(object_error::<T>(ObjectErrorKind::NotPersistent, id));
        }
        self.session.remove::<T>(id);
        Ok(())
    }

    /// Delete a cached object's row. For types with a version column the
    /// delete only succeeds if the row still has the object's version.
    #[tracing::instrument(level = "debug", skip(self), fields(table = T::TABLE_NAME))]
    pub fn erase_object<T: ObjectTraits>(&mut self, handle: ObjectRef<T>) -> Result<()> {
        let Some(obj) = self.session.get(handle) else {
            return Err(Error::Object(ObjectError::new(
                ObjectErrorKind::NotPersistent,
                T::TABLE_NAME,
                None,
            )));
        };
        let id = obj.id();
        if T::MANAGED_OPTIMISTIC_COLUMN_COUNT == 0 {
            return self.erase::<T>(&id);
        }
        let version = obj.version();

        let sts = self.statements.find_object::<T>();
        let rows = {
            let mut sts = sts.borrow_mut();
            sts.bind_id_image(&id);
            T::erase_containers(&mut sts)?;
            sts.bind_optimistic_id_image(&id, version)?;
            sts.optimistic_erase_statement()?.execute()?
        };

        if rows == 0 {
            tracing::warn!(id = ?id, version, "Optimistic erase found the row changed");
            return Err(object_error::<T>(ObjectErrorKind::Changed, &id));
        }
        self.session.remove::<T>(&id);
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection", &self.conn)
            .field("statements", &self.statements)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
