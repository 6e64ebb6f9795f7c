//! Error types shared by the dump and restore engines.

use std::fmt;
use thiserror::Error;

/// Error reported by a database backend.
///
/// `code` carries the SQLSTATE when the backend provides one. `transient`
/// marks connection-level failures that the backend itself may retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    pub message: String,
    pub code: Option<String>,
    /// Violated constraint, when the backend reports one
    pub constraint: Option<String>,
    pub transient: bool,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            constraint: None,
            transient: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// SQLSTATE class 23 (integrity constraint violation)
    pub fn is_constraint_violation(&self) -> bool {
        self.code.as_deref().is_some_and(|c| c.starts_with("23"))
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbError {}

/// Errors raised while slicing or restoring.
#[derive(Debug, Error)]
pub enum SliceError {
    /// The source cannot provide an exported snapshot; nothing was written.
    #[error("snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// A traversal or materialization query failed on one worker.
    #[error("traversal query failed on table {table}{}: {source}", via.as_ref().map(|v| format!(" via {v}")).unwrap_or_default())]
    TraversalQuery {
        table: String,
        via: Option<String>,
        #[source]
        source: DbError,
    },

    /// A value does not have the shape its transform kind expects.
    #[error("cannot transform {table}.{column} (row {row}): {message}")]
    Transformation {
        table: String,
        column: String,
        row: u64,
        message: String,
    },

    /// A dependency cycle contains an edge that cannot be deferred.
    #[error("unbreakable foreign key cycle between tables {}: non-deferrable {}", tables.join(", "), edges.join(", "))]
    UnbreakableCycle {
        tables: Vec<String>,
        edges: Vec<String>,
    },

    /// The target rejected restored data; the transaction was rolled back.
    #[error("constraint violation restoring {table}{}: {detail}", constraint.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    ConstraintViolation {
        table: String,
        constraint: Option<String>,
        detail: String,
    },

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("invalid schema: {0}")]
    Schema(String),

    #[error("invalid slice manifest: {0}")]
    Manifest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SliceError>;
