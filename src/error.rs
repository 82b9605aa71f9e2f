//! Error types for datatask.

use std::fmt;
use std::io;

/// Result type alias for datatask operations.
pub type Result<T> = std::result::Result<T, Error>;

/// How a backend failure was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The statement referenced a table or view that does not exist.
    UndefinedRelation,
    Other,
}

/// A statement failure reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub backend: String,
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: &str, kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            backend: backend.to_string(),
            kind,
            message: message.into(),
        }
    }

    /// True when the missing relation named in the message is `relation`.
    pub fn is_missing(&self, relation: &str) -> bool {
        self.kind == BackendErrorKind::UndefinedRelation
            && self.message.to_lowercase().contains(&relation.to_lowercase())
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.message)
    }
}

/// Main error enum for datatask.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single-value query returned more than one row or column.
    #[error("Query must result in a single {0}")]
    Shape(&'static str),

    /// A scalar could not be converted to the requested type.
    #[error("Cannot convert {value:?} to {target}")]
    Conversion { value: String, target: &'static str },

    /// A qualified relation name contained more than one separator.
    #[error("Invalid relation reference {0} (only one '.' is allowed)")]
    InvalidReference(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tracking is absent from the scope an operation needed.
    #[error("Tracking is not set up in {scope}. Run `datatask setup` for this scope first.")]
    TrackingNotSetUp { scope: String },

    #[error("Backend error ({0})")]
    Backend(BackendError),

    /// An existing resource has no recorded modification time.
    #[error("{0} exists but its modified time is unavailable")]
    MissingTimestamp(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Task dependency cycle: {}", .0.join(" → "))]
    CycleDetected(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Shape(_) => "Shape",
            Error::Conversion { .. } => "Conversion",
            Error::InvalidReference(_) => "InvalidReference",
            Error::Configuration(_) => "Configuration",
            Error::TrackingNotSetUp { .. } => "TrackingNotSetUp",
            Error::Backend(_) => "BackendExecution",
            Error::MissingTimestamp(_) => "MissingTimestamp",
            Error::Unsupported(_) => "Unsupported",
            Error::TaskNotFound(_) => "TaskNotFound",
            Error::CycleDetected(_) => "CycleDetected",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
            Error::Yaml(_) => "Yaml",
            Error::Sqlite(_) => "Sqlite",
            Error::Postgres(_) => "Postgres",
        }
    }

    pub(crate) fn conversion(value: impl fmt::Display, target: &'static str) -> Self {
        Error::Conversion {
            value: value.to_string(),
            target,
        }
    }
}
