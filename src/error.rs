use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::validation::ValidationReport;

/// Errors raised while defining or looking up a schema.
///
/// All of these abort the requested mutation before anything is changed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Field '{0}' already exists in this schema")]
    DuplicateFieldName(String),

    #[error("Register '{0}' already exists")]
    DuplicateRegisterName(String),

    #[error("Register not found: {0}")]
    RegisterNotFound(String),

    #[error("Field index {index} is out of range for a schema of {len} fields")]
    FieldIndexOutOfRange { index: usize, len: usize },

    /// A selection field was defined without any choices.
    #[error("Field '{0}' needs at least one choice")]
    MissingChoices(String),

    #[error("Invalid constraint on field '{field}': {reason}")]
    InvalidConstraint { field: String, reason: String },

    #[error("Invalid formula on field '{field}': {reason}")]
    InvalidFormula { field: String, reason: String },

    #[error("Field names must not be empty")]
    EmptyFieldName,

    #[error("Register names must not be empty")]
    EmptyRegisterName,
}

/// Failures of the host document store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode document: {0}")]
    Decode(#[source] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Top-level error returned by [`crate::Engine`] operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// One or more fields failed validation. Nothing was persisted.
    #[error("Validation failed for fields: {}", .0.field_names().join(", "))]
    ValidationFailed(ValidationReport),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<ValidationReport> for EngineError {
    fn from(report: ValidationReport) -> Self {
        EngineError::ValidationFailed(report)
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
