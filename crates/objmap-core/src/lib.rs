//! Core types for objmap.
//!
//! This crate provides the backend-independent foundations of the object
//! persistence runtime:
//!
//! - `Error` / `Result` covering database faults, contract violations and
//!   object-level faults such as optimistic concurrency conflicts
//! - `Value`, the dynamically-typed content of a binding slot

pub mod error;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, ContractError, ContractErrorKind, Error,
    ObjectError, ObjectErrorKind, QueryError, QueryErrorKind, Result, TypeError,
};
pub use value::Value;
