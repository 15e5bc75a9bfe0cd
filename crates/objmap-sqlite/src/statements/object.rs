//! Per-type statement and image cache.

use super::container::ContainerStatementCachePtr;
use super::delayed::{DelayedLoad, Loader};
use super::lock::{Lockable, ReentrancyLock};
use super::optimistic::OptimisticData;
use crate::binding::{Binding, SharedBinding, StatementKind};
use crate::connection::SqliteConnection;
use crate::session::{ObjectRef, Position};
use crate::statement::{DeleteStatement, InsertStatement, SelectStatement, UpdateStatement};
use crate::traits::{ColumnCounts, Image, ObjectTraits};
use objmap_core::{Error, Result, Value, error::ContractErrorKind};
use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;

/// Images, bindings and lazily prepared statements for one persistent type
/// on one connection.
///
/// The buffers are shared by every operation on the type, which is why the
/// cache carries a reentrancy lock: while a load holds it, a nested load of
/// the same type must go through [`delay_load`](Self::delay_load).
pub struct ObjectStatements<T: ObjectTraits> {
    conn: Rc<SqliteConnection>,
    lock: ReentrancyLock,

    image: T::Image,
    id_image: T::IdImage,

    select_image_version: usize,
    select_image_binding: SharedBinding,

    insert_image_version: usize,
    insert_image_binding: SharedBinding,

    // Update columns, then id columns, then the version column.
    update_image_version: usize,
    update_id_image_version: usize,
    update_image_binding: SharedBinding,

    id_image_version: usize,
    id_image_binding: SharedBinding,

    optimistic: OptimisticData,

    persist: Option<InsertStatement>,
    find: Option<SelectStatement>,
    update: Option<UpdateStatement>,
    erase: Option<DeleteStatement>,

    pub(super) delayed: VecDeque<DelayedLoad<T>>,
    containers: ContainerStatementCachePtr,
}

impl<T: ObjectTraits> ObjectStatements<T> {
    const COUNTS: ColumnCounts = ColumnCounts::derive(
        T::COLUMN_COUNT,
        T::INVERSE_COLUMN_COUNT,
        T::MANAGED_OPTIMISTIC_COLUMN_COUNT,
        T::ID_COLUMN_COUNT,
        T::READONLY_COLUMN_COUNT,
    );

    pub const SELECT_COLUMN_COUNT: usize = Self::COUNTS.select;
    pub const INSERT_COLUMN_COUNT: usize = Self::COUNTS.insert;
    pub const UPDATE_COLUMN_COUNT: usize = Self::COUNTS.update;
    pub const ID_COLUMN_COUNT: usize = T::ID_COLUMN_COUNT;
    pub const MANAGED_OPTIMISTIC_COLUMN_COUNT: usize = T::MANAGED_OPTIMISTIC_COLUMN_COUNT;

    pub fn new(conn: &Rc<SqliteConnection>) -> Self {
        Self {
            conn: Rc::clone(conn),
            lock: ReentrancyLock::default(),
            image: T::Image::default(),
            id_image: T::IdImage::default(),
            select_image_version: 0,
            select_image_binding: Binding::shared(Self::SELECT_COLUMN_COUNT),
            insert_image_version: 0,
            insert_image_binding: Binding::shared(Self::INSERT_COLUMN_COUNT),
            update_image_version: 0,
            update_id_image_version: 0,
            update_image_binding: Binding::shared(
                Self::UPDATE_COLUMN_COUNT + T::ID_COLUMN_COUNT + T::MANAGED_OPTIMISTIC_COLUMN_COUNT,
            ),
            id_image_version: 0,
            id_image_binding: Binding::shared(T::ID_COLUMN_COUNT),
            optimistic: OptimisticData::for_type::<T>(),
            persist: None,
            find: None,
            update: None,
            erase: None,
            delayed: VecDeque::new(),
            containers: ContainerStatementCachePtr::new(T::container_cache_factory()),
        }
    }

    pub fn connection(&self) -> &Rc<SqliteConnection> {
        &self.conn
    }

    // Lock.

    pub fn lock(&mut self) -> Result<()> {
        self.lock.lock(T::TABLE_NAME)
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.lock.unlock(T::TABLE_NAME)
    }

    pub fn locked(&self) -> bool {
        self.lock.locked()
    }

    // Images.

    pub fn image(&mut self) -> &mut T::Image {
        &mut self.image
    }

    pub fn id_image(&mut self) -> &mut T::IdImage {
        &mut self.id_image
    }

    // Select binding.

    pub fn select_image_version(&self) -> usize {
        self.select_image_version
    }

    pub fn set_select_image_version(&mut self, v: usize) {
        self.select_image_version = v;
    }

    pub fn select_image_binding(&self) -> &SharedBinding {
        &self.select_image_binding
    }

    // Insert binding.

    pub fn insert_image_version(&self) -> usize {
        self.insert_image_version
    }

    pub fn set_insert_image_version(&mut self, v: usize) {
        self.insert_image_version = v;
    }

    pub fn insert_image_binding(&self) -> &SharedBinding {
        &self.insert_image_binding
    }

    // Update binding.

    pub fn update_image_version(&self) -> usize {
        self.update_image_version
    }

    pub fn set_update_image_version(&mut self, v: usize) {
        self.update_image_version = v;
    }

    pub fn update_id_image_version(&self) -> usize {
        self.update_id_image_version
    }

    pub fn set_update_id_image_version(&mut self, v: usize) {
        self.update_id_image_version = v;
    }

    pub fn update_image_binding(&self) -> &SharedBinding {
        &self.update_image_binding
    }

    // Id binding.

    pub fn id_image_version(&self) -> usize {
        self.id_image_version
    }

    pub fn set_id_image_version(&mut self, v: usize) {
        self.id_image_version = v;
    }

    pub fn id_image_binding(&self) -> &SharedBinding {
        &self.id_image_binding
    }

    // Optimistic id binding. `None` for types without a version column.

    pub fn optimistic_id_image_version(&self) -> Option<usize> {
        match &self.optimistic {
            OptimisticData::Present {
                id_image_version, ..
            } => Some(*id_image_version),
            OptimisticData::Absent => None,
        }
    }

    pub fn set_optimistic_id_image_version(&mut self, v: usize) {
        if let OptimisticData::Present {
            id_image_version, ..
        } = &mut self.optimistic
        {
            *id_image_version = v;
        }
    }

    pub fn optimistic_id_image_binding(&self) -> Option<&SharedBinding> {
        match &self.optimistic {
            OptimisticData::Present {
                id_image_binding, ..
            } => Some(id_image_binding),
            OptimisticData::Absent => None,
        }
    }

    pub fn has_optimistic(&self) -> bool {
        self.optimistic.is_present()
    }

    // Statements. Each is prepared on first use and then reused.

    pub fn persist_statement(&mut self) -> Result<&mut InsertStatement> {
        let stmt = match self.persist.take() {
            Some(stmt) => stmt,
            None => {
                tracing::debug!(table = T::TABLE_NAME, kind = "persist", "Preparing object statement");
                InsertStatement::new(&self.conn, T::PERSIST_STATEMENT, &self.insert_image_binding)?
            }
        };
        Ok(self.persist.insert(stmt))
    }

    pub fn find_statement(&mut self) -> Result<&mut SelectStatement> {
        let stmt = match self.find.take() {
            Some(stmt) => stmt,
            None => {
                tracing::debug!(table = T::TABLE_NAME, kind = "find", "Preparing object statement");
                SelectStatement::new(
                    &self.conn,
                    T::FIND_STATEMENT,
                    &self.id_image_binding,
                    &self.select_image_binding,
                )?
            }
        };
        Ok(self.find.insert(stmt))
    }

    pub fn update_statement(&mut self) -> Result<&mut UpdateStatement> {
        let stmt = match self.update.take() {
            Some(stmt) => stmt,
            None => {
                tracing::debug!(table = T::TABLE_NAME, kind = "update", "Preparing object statement");
                UpdateStatement::new(&self.conn, T::UPDATE_STATEMENT, &self.update_image_binding)?
            }
        };
        Ok(self.update.insert(stmt))
    }

    pub fn erase_statement(&mut self) -> Result<&mut DeleteStatement> {
        let stmt = match self.erase.take() {
            Some(stmt) => stmt,
            None => {
                tracing::debug!(table = T::TABLE_NAME, kind = "erase", "Preparing object statement");
                DeleteStatement::new(&self.conn, T::ERASE_STATEMENT, &self.id_image_binding)?
            }
        };
        Ok(self.erase.insert(stmt))
    }

    /// Version-checked erase. Only available for types with a version column.
    pub fn optimistic_erase_statement(&mut self) -> Result<&mut DeleteStatement> {
        let unsupported = || {
            Error::contract(
                ContractErrorKind::OptimisticUnsupported,
                format!("{} has no optimistic erase statement", T::TABLE_NAME),
            )
        };

        let OptimisticData::Present {
            id_image_binding,
            erase,
            ..
        } = &mut self.optimistic
        else {
            return Err(unsupported());
        };

        let stmt = match erase.take() {
            Some(stmt) => stmt,
            None => {
                let sql = T::OPTIMISTIC_ERASE_STATEMENT.ok_or_else(unsupported)?;
                tracing::debug!(table = T::TABLE_NAME, kind = "optimistic_erase", "Preparing object statement");
                DeleteStatement::new(&self.conn, sql, id_image_binding)?
            }
        };
        Ok(erase.insert(stmt))
    }

    /// Container statement cache, allocated on first use with this
    /// connection and the id binding.
    pub fn container_statement_cache<C: Any>(&mut self) -> Result<&mut C> {
        self.containers.get(&self.conn, &self.id_image_binding)
    }

    pub fn container_statement_cache_allocated(&self) -> bool {
        self.containers.is_allocated()
    }

    // Delayed loads.

    /// Queue a load that cannot run now because this cache is locked.
    pub fn delay_load(
        &mut self,
        id: T::Id,
        target: ObjectRef<T>,
        position: Position<T>,
        loader: Option<Loader<T>>,
    ) -> Result<()> {
        if cfg!(debug_assertions) && !self.locked() {
            return Err(Error::contract(
                ContractErrorKind::DelayWhileUnlocked,
                format!("{} delayed load queued without the lock", T::TABLE_NAME),
            ));
        }
        tracing::trace!(table = T::TABLE_NAME, id = ?id, "Delaying load");
        self.delayed.push_back(DelayedLoad {
            id,
            target,
            position,
            loader,
        });
        Ok(())
    }

    /// Drop every queued load without running it. Returns the number dropped.
    pub fn clear_delayed(&mut self) -> usize {
        let n = self.delayed.len();
        self.delayed.clear();
        n
    }

    pub fn delayed_count(&self) -> usize {
        self.delayed.len()
    }

    /// Take the queued loads out of the statements, leaving the queue empty.
    pub fn take_delayed(&mut self) -> VecDeque<DelayedLoad<T>> {
        std::mem::take(&mut self.delayed)
    }

    // Image transfer helpers used by the database operations.

    /// Set the id image to `id` and copy it into the id binding.
    pub fn bind_id_image(&mut self, id: &T::Id) {
        T::init_id_image(&mut self.id_image, id);
        let mut binding = self.id_image_binding.borrow_mut();
        if self.id_image.version() != self.id_image_version {
            binding.bump_version();
            self.id_image_version = self.id_image.version();
        }
        T::bind_id(binding.slots_mut(), &self.id_image);
    }

    /// Copy `obj` into the image and the insert binding.
    pub fn bind_insert_image(&mut self, obj: &T) {
        T::init_image(&mut self.image, obj);
        let mut binding = self.insert_image_binding.borrow_mut();
        if self.image.version() != self.insert_image_version {
            binding.bump_version();
            self.insert_image_version = self.image.version();
        }
        T::bind_image(binding.slots_mut(), &self.image, StatementKind::Insert);
    }

    /// Copy `obj` into the image and the update binding: update columns,
    /// then the id, then the version the row is expected to have.
    pub fn bind_update_image(&mut self, obj: &T) {
        T::init_image(&mut self.image, obj);
        T::init_id_image(&mut self.id_image, &obj.id());

        let mut binding = self.update_image_binding.borrow_mut();
        if self.image.version() != self.update_image_version
            || self.id_image.version() != self.update_id_image_version
        {
            binding.bump_version();
            self.update_image_version = self.image.version();
            self.update_id_image_version = self.id_image.version();
        }

        let slots = binding.slots_mut();
        let (data, rest) = slots.split_at_mut(Self::UPDATE_COLUMN_COUNT);
        let (id, managed) = rest.split_at_mut(T::ID_COLUMN_COUNT);
        T::bind_image(data, &self.image, StatementKind::Update);
        T::bind_id(id, &self.id_image);
        if let Some(slot) = managed.first_mut() {
            *slot = Value::BigInt(obj.version());
        }
    }

    /// Copy the id and expected version into the optimistic id binding.
    pub fn bind_optimistic_id_image(&mut self, id: &T::Id, version: i64) -> Result<()> {
        T::init_id_image(&mut self.id_image, id);
        let OptimisticData::Present {
            id_image_version,
            id_image_binding,
            ..
        } = &mut self.optimistic
        else {
            return Err(Error::contract(
                ContractErrorKind::OptimisticUnsupported,
                format!("{} has no version column", T::TABLE_NAME),
            ));
        };

        let mut binding = id_image_binding.borrow_mut();
        if self.id_image.version() != *id_image_version {
            binding.bump_version();
            *id_image_version = self.id_image.version();
        }
        let (id_slots, managed) = binding.slots_mut().split_at_mut(T::ID_COLUMN_COUNT);
        T::bind_id(id_slots, &self.id_image);
        if let Some(slot) = managed.first_mut() {
            *slot = Value::BigInt(version);
        }
        Ok(())
    }

    /// Run the find statement for `id`, leaving the row in the image.
    /// Returns `false` if there is no such row.
    pub fn find_image(&mut self, id: &T::Id) -> Result<bool> {
        self.bind_id_image(id);

        if self.image.version() != self.select_image_version {
            self.select_image_binding.borrow_mut().bump_version();
            self.select_image_version = self.image.version();
        }

        let stmt = self.find_statement()?;
        stmt.execute()?;
        let fetched = stmt.fetch();
        stmt.free_result();
        if !fetched? {
            return Ok(false);
        }

        let row = self.select_image_binding.borrow();
        T::init_image_from_row(&mut self.image, row.slots())?;
        Ok(true)
    }

    /// Move the image out, leaving a default one in its place.
    pub(crate) fn take_image(&mut self) -> T::Image {
        std::mem::take(&mut self.image)
    }

    pub(crate) fn restore_image(&mut self, image: T::Image) {
        self.image = image;
    }
}

impl<T: ObjectTraits> Lockable for ObjectStatements<T> {
    fn lock(&mut self) -> Result<()> {
        ObjectStatements::lock(self)
    }

    fn unlock(&mut self) -> Result<()> {
        ObjectStatements::unlock(self)
    }

    fn locked(&self) -> bool {
        ObjectStatements::locked(self)
    }

    fn discard_pending(&mut self) -> usize {
        self.clear_delayed()
    }
}

impl<T: ObjectTraits> std::fmt::Debug for ObjectStatements<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStatements")
            .field("table", &T::TABLE_NAME)
            .field("locked", &self.locked())
            .field("delayed", &self.delayed.len())
            .field("optimistic", &self.optimistic.is_present())
            .finish_non_exhaustive()
    }
}
