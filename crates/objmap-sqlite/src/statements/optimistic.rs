//! Optimistic concurrency extension of the object statements.

use crate::binding::{Binding, SharedBinding};
use crate::statement::DeleteStatement;
use crate::traits::ObjectTraits;

/// Extra state for types with a managed version column.
///
/// `Present` holds an id-plus-version binding and the erase statement that
/// checks the version. `Absent` carries nothing.
#[derive(Debug)]
pub enum OptimisticData {
    Absent,
    Present {
        id_image_version: usize,
        id_image_binding: SharedBinding,
        erase: Option<DeleteStatement>,
    },
}

impl OptimisticData {
    /// Select the variant for `T` from its descriptor.
    pub fn for_type<T: ObjectTraits>() -> Self {
        if T::MANAGED_OPTIMISTIC_COLUMN_COUNT == 0 {
            return Self::Absent;
        }
        Self::Present {
            id_image_version: 0,
            id_image_binding: Binding::shared(
                T::ID_COLUMN_COUNT + T::MANAGED_OPTIMISTIC_COLUMN_COUNT,
            ),
            erase: None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }
}
