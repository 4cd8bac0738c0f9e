//! Error types for cutflow

use thiserror::Error;

/// cutflow error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, detected before a run starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named object (cut, sink) already exists
    #[error("Duplicate name: '{0}'")]
    DuplicateName(String),

    /// A named object (cut, sink) does not exist
    #[error("Not found: '{0}'")]
    NotFound(String),

    /// An expression failed to compile
    #[error("Compile error in \"{expr}\": {reason}")]
    Compile {
        /// Source text of the expression
        expr: String,
        /// Why compilation failed
        reason: String,
    },

    /// Input data is missing something the configuration requires; aborts a run
    #[error("Data error: {0}")]
    Data(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a compile error for `expr`.
    pub fn compile(expr: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Compile { expr: expr.into(), reason: reason.into() }
    }

    /// True for errors raised by configuration calls (never by record processing).
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::DuplicateName(_) | Error::NotFound(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
