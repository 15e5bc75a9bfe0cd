//! Object statements: the per-type statement and image cache.
//!
//! For every persistent type used on a connection there is one
//! [`ObjectStatements`] instance. It owns the image buffers and bindings the
//! type's statements read from and write to, prepares each statement on
//! first use, and coordinates recursive loads through a reentrancy lock and
//! a delayed-load queue.

mod container;
mod delayed;
mod lock;
mod object;
mod optimistic;

pub use container::{ContainerFactory, ContainerStatementCachePtr};
pub use delayed::{DelayedLoad, Loader, discard_delayed, load_delayed};
pub use lock::{AutoLock, AutoUnlock, Lockable, ReentrancyLock};
pub use object::ObjectStatements;
pub use optimistic::OptimisticData;
