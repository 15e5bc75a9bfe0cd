//! Error types for objmap operations.

use std::fmt;

/// The primary error type for all objmap operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, close)
    Connection(ConnectionError),
    /// Statement preparation and execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Misuse of the statement cache (lock pairing, missing collaborators)
    Contract(ContractError),
    /// Object-level faults: not persistent, already persistent, changed
    Object(ObjectError),
    /// Configuration errors
    Config(ConfigError),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// Connection is no longer usable
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Database busy or locked by another connection
    Busy,
    /// Interrupted
    Cancelled,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// A programming error in the use of a statement cache.
///
/// These are assertion-class failures: the current operation cannot
/// continue, and the caller is not expected to recover.
#[derive(Debug, Clone)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    /// `lock()` on a cache that is already locked
    AlreadyLocked,
    /// `unlock()` on a cache that is not locked
    NotLocked,
    /// Delayed load queued or drained while the cache is unlocked
    DelayWhileUnlocked,
    /// Optimistic statement requested for a type without a managed column
    OptimisticUnsupported,
    /// No container statement factory was registered for the type
    MissingContainerFactory,
    /// Container statement cache requested with a different concrete type
    ContainerCacheMismatch,
    /// Binding slot count does not match the statement
    BindingLayout,
}

#[derive(Debug)]
pub struct ObjectError {
    pub kind: ObjectErrorKind,
    pub table: &'static str,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectErrorKind {
    /// No row with the requested id
    NotPersistent,
    /// A row with the same id already exists
    AlreadyPersistent,
    /// The row was modified or removed since it was loaded
    Changed,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ContractError {
    pub fn new(kind: ContractErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl ObjectError {
    pub fn new(kind: ObjectErrorKind, table: &'static str, id: Option<String>) -> Self {
        Self { kind, table, id }
    }
}

impl Error {
    /// Shorthand for building a contract violation.
    pub fn contract(kind: ContractErrorKind, message: impl Into<String>) -> Self {
        Error::Contract(ContractError::new(kind, message))
    }

    /// Is this a misuse of the statement cache rather than a database fault?
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Contract(_))
    }

    /// Did an optimistic update or erase find the row changed?
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            Error::Object(ObjectError {
                kind: ObjectErrorKind::Changed,
                ..
            })
        )
    }

    /// Is this an "object not persistent" fault?
    pub fn is_not_persistent(&self) -> bool {
        matches!(
            self,
            Error::Object(ObjectError {
                kind: ObjectErrorKind::NotPersistent,
                ..
            })
        )
    }

    /// Is this a retryable error (busy database)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Busy),
            _ => false,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Contract(e) => write!(f, "Contract violation: {}", e),
            Error::Object(e) => write!(f, "Object error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} (in `{}`)", self.message, sql),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ObjectErrorKind::NotPersistent => "object not persistent",
            ObjectErrorKind::AlreadyPersistent => "object already persistent",
            ObjectErrorKind::Changed => "object changed concurrently",
        };
        match &self.id {
            Some(id) => write!(f, "{} ({} id {})", what, self.table, id),
            None => write!(f, "{} ({})", what, self.table),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ContractError {}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ContractError> for Error {
    fn from(err: ContractError) -> Self {
        Error::Contract(err)
    }
}

impl From<ObjectError> for Error {
    fn from(err: ObjectError) -> Self {
        Error::Object(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for objmap operations.
pub type Result<T> = std::result::Result<T, Error>;
