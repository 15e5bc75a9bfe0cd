//! Lazily allocated container statement cache.
//!
//! Types with collection-valued members need a second set of statements
//! for the member tables. Their concrete type belongs to the mapped type's
//! descriptor, so the object statements only keep an opaque box plus the
//! factory the descriptor registered.

use crate::binding::SharedBinding;
use crate::connection::SqliteConnection;
use objmap_core::{Error, Result, error::ContractErrorKind};
use std::any::Any;
use std::rc::Rc;

/// Builds a container statement cache from the connection and the owning
/// object's id binding.
pub type ContainerFactory = fn(&Rc<SqliteConnection>, &SharedBinding) -> Result<Box<dyn Any>>;

/// Owned, lazily constructed container cache.
pub struct ContainerStatementCachePtr {
    cache: Option<Box<dyn Any>>,
    factory: Option<ContainerFactory>,
}

impl ContainerStatementCachePtr {
    pub fn new(factory: Option<ContainerFactory>) -> Self {
        Self {
            cache: None,
            factory,
        }
    }

    /// Return the cache, allocating it on first use.
    pub fn get<C: Any>(
        &mut self,
        conn: &Rc<SqliteConnection>,
        id_binding: &SharedBinding,
    ) -> Result<&mut C> {
        let cache = match self.cache.take() {
            Some(cache) => cache,
            None => {
                let factory = self.factory.ok_or_else(|| {
                    Error::contract(
                        ContractErrorKind::MissingContainerFactory,
                        "no container statement factory registered",
                    )
                })?;
                tracing::trace!("Allocating container statement cache");
                factory(conn, id_binding)?
            }
        };

        self.cache.insert(cache).downcast_mut::<C>().ok_or_else(|| {
            Error::contract(
                ContractErrorKind::ContainerCacheMismatch,
                format!(
                    "container statement cache is not a {}",
                    std::any::type_name::<C>()
                ),
            )
        })
    }

    /// Whether the cache has been allocated.
    pub fn is_allocated(&self) -> bool {
        self.cache.is_some()
    }
}

impl std::fmt::Debug for ContainerStatementCachePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerStatementCachePtr")
            .field("allocated", &self.is_allocated())
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}
