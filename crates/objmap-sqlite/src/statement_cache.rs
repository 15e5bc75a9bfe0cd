//! Per-connection cache of object statements.

use crate::connection::SqliteConnection;
use crate::statements::ObjectStatements;
use crate::traits::ObjectTraits;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Shared handle to one type's statements.
pub type ObjectStatementsRef<T> = Rc<RefCell<ObjectStatements<T>>>;

/// Holds one [`ObjectStatements`] per persistent type, created on first
/// request and kept for the life of the connection.
pub struct StatementCache {
    conn: Rc<SqliteConnection>,
    /// Each value is an `ObjectStatementsRef<T>` for the `T` of its key.
    map: HashMap<TypeId, Box<dyn Any>>,
}

impl StatementCache {
    pub fn new(conn: &Rc<SqliteConnection>) -> Self {
        Self {
            conn: Rc::clone(conn),
            map: HashMap::new(),
        }
    }

    /// Statements for `T`, creating them on first use.
    pub fn find_object<T: ObjectTraits>(&mut self) -> ObjectStatementsRef<T> {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self
            .map
            .get(&type_id)
            .and_then(|entry| entry.downcast_ref::<ObjectStatementsRef<T>>())
        {
            return Rc::clone(existing);
        }

        tracing::trace!(table = T::TABLE_NAME, "Creating object statements");
        let sts: ObjectStatementsRef<T> = Rc::new(RefCell::new(ObjectStatements::new(&self.conn)));
        self.map.insert(type_id, Box::new(Rc::clone(&sts)));
        sts
    }

    pub fn contains<T: ObjectTraits>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn connection(&self) -> &Rc<SqliteConnection> {
        &self.conn
    }
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("types", &self.map.len())
            .finish_non_exhaustive()
    }
}
