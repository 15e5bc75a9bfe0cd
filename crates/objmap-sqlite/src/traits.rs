//! Per-type persistence descriptor.
//!
//! `ObjectTraits` is what a mapping generator would emit for each persistent
//! class: the column counts, the SQL text of the five object statements and
//! the functions that move data between an object, its image and the
//! binding slots. Hand-written implementations work just as well.

use crate::binding::StatementKind;
use crate::database::Database;
use crate::session::ObjectRef;
use crate::statements::{ContainerFactory, ObjectStatements};
use objmap_core::{Result, Value};
use std::fmt::Debug;
use std::hash::Hash;

/// An in-memory buffer for one row.
///
/// The version must change whenever the bindable layout of the image
/// changes, so that bindings built from it are re-established.
pub trait Image: Default + 'static {
    fn version(&self) -> usize {
        0
    }
}

/// Column counts derived from a type's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnCounts {
    pub select: usize,
    pub insert: usize,
    pub update: usize,
}

impl ColumnCounts {
    /// `select = total`, `insert = total - inverse - managed`,
    /// `update = insert - id - readonly`.
    pub const fn derive(
        total: usize,
        inverse: usize,
        managed_optimistic: usize,
        id: usize,
        readonly: usize,
    ) -> Self {
        let insert = total - inverse - managed_optimistic;
        Self {
            select: total,
            insert,
            update: insert - id - readonly,
        }
    }
}

/// Static description of a persistent type.
pub trait ObjectTraits: Sized + 'static {
    /// Object id type.
    type Id: Clone + Eq + Hash + Debug + 'static;
    /// Full-row image.
    type Image: Image;
    /// Id image, used by find and erase.
    type IdImage: Image;

    const TABLE_NAME: &'static str;

    const COLUMN_COUNT: usize;
    const ID_COLUMN_COUNT: usize;
    const INVERSE_COLUMN_COUNT: usize = 0;
    const READONLY_COLUMN_COUNT: usize = 0;
    /// Concurrency version column maintained by this layer. At most one.
    const MANAGED_OPTIMISTIC_COLUMN_COUNT: usize = 0;

    const PERSIST_STATEMENT: &'static str;
    const FIND_STATEMENT: &'static str;
    const UPDATE_STATEMENT: &'static str;
    const ERASE_STATEMENT: &'static str;
    /// Erase that also checks the version column.
    const OPTIMISTIC_ERASE_STATEMENT: Option<&'static str> = None;

    fn id(&self) -> Self::Id;

    /// Object to image.
    fn init_image(image: &mut Self::Image, obj: &Self);

    /// Image to parameter slots for the given statement kind.
    fn bind_image(slots: &mut [Value], image: &Self::Image, kind: StatementKind);

    fn init_id_image(image: &mut Self::IdImage, id: &Self::Id);

    fn bind_id(slots: &mut [Value], image: &Self::IdImage);

    /// Select result slots to image.
    fn init_image_from_row(image: &mut Self::Image, row: &[Value]) -> Result<()>;

    /// Image to object. Referenced objects are loaded through `db`; a
    /// reference to an object of the same type may come back as a pending
    /// handle that is filled in before the outermost load returns.
    fn init_object(image: &Self::Image, db: &mut Database) -> Result<Self>;

    /// Current value of the version column.
    fn version(&self) -> i64 {
        0
    }

    fn set_version(&mut self, _version: i64) {}

    /// Called after a successful insert with the assigned rowid.
    fn assign_rowid(&mut self, _rowid: i64) {}

    /// Factory for this type's container statement cache, if it has
    /// collection-valued members.
    fn container_cache_factory() -> Option<ContainerFactory> {
        None
    }

    /// Store collection members. The id binding holds this object's id.
    fn persist_containers(_sts: &mut ObjectStatements<Self>, _obj: &Self) -> Result<()> {
        Ok(())
    }

    /// Load collection members. The id binding holds this object's id.
    fn load_containers(_sts: &mut ObjectStatements<Self>, _obj: &mut Self) -> Result<()> {
        Ok(())
    }

    /// Remove collection members. The id binding holds the erased id.
    fn erase_containers(_sts: &mut ObjectStatements<Self>) -> Result<()> {
        Ok(())
    }

    /// Runs once the object and everything it references is loaded. The
    /// type's statements are unlocked for the duration of the call.
    fn post_load(_db: &mut Database, _target: ObjectRef<Self>) -> Result<()> {
        Ok(())
    }
}
