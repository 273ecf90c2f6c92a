//! Error types for Hypernova operations.

use std::fmt;

/// The primary error type for all Hypernova operations.
#[derive(Debug)]
pub enum Error {
    /// Registration/graph-construction errors (name collisions, missing
    /// inverse links, dependency cycles). Fatal, never retried.
    Config(ConfigError),
    /// Request-shape errors raised during body normalization.
    Request(RequestError),
    /// Errors surfaced by the underlying document store.
    Store(StoreError),
    /// An error raised inside a reducer compute function.
    Reducer(ReducerError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A link/reducer/expander name collides with an existing registration
    /// or a declared stored field.
    NameCollision,
    /// A registered name is not a plain identifier.
    InvalidName,
    /// Collection is not registered with the catalog.
    UnknownCollection,
    /// No link with the requested name on the collection.
    UnknownLink,
    /// A virtual link's direct counterpart is unregistered.
    MissingInverse,
    /// A direct link has no resolvable storage field.
    MissingStorageField,
    /// Same-level reducer dependencies form a cycle.
    DependencyCycle,
}

#[derive(Debug)]
pub struct RequestError {
    pub kind: RequestErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
    /// Body nesting exceeds the configured maximum depth.
    DepthExceeded,
    /// Static filters combined with a functional root `$`.
    ConflictingFilters,
    /// The body document is not a valid selection shape.
    MalformedBody,
}

#[derive(Debug)]
pub struct StoreError {
    pub collection: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ReducerError {
    pub reducer: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Build a request-shape error.
    pub fn request(kind: RequestErrorKind, message: impl Into<String>) -> Self {
        Error::Request(RequestError {
            kind,
            message: message.into(),
        })
    }

    /// Build a store error without an underlying source.
    pub fn store(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Store(StoreError {
            collection: collection.into(),
            message: message.into(),
            source: None,
        })
    }

    /// Build a reducer evaluation error.
    pub fn reducer(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Reducer(ReducerError {
            reducer: name.into(),
            message: message.into(),
            source: None,
        })
    }

    /// Is this a registration/graph-construction error?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Is this a request-shape error raised during normalization?
    pub fn is_request(&self) -> bool {
        matches!(self, Error::Request(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Request(e) => write!(f, "Request error: {}", e.message),
            Error::Store(e) => {
                write!(f, "Store error on '{}': {}", e.collection, e.message)
            }
            Error::Reducer(e) => {
                write!(f, "Reducer '{}' failed: {}", e.reducer, e.message)
            }
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Reducer(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ReducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::Request(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<ReducerError> for Error {
    fn from(err: ReducerError) -> Self {
        Error::Reducer(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Hypernova operations.
pub type Result<T> = std::result::Result<T, Error>;
