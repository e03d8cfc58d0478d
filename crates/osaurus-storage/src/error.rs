//! Sandbox database error types.

use thiserror::Error;

/// Errors from sandbox database operations.
#[derive(Debug, Clone, Error)]
pub enum DbError {
    /// The database has been closed (or its worker has exited).
    #[error("database is not open")]
    NotOpen,

    /// Opening the database file failed.
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// Preparing a statement failed.
    #[error("prepare failed: {0}")]
    PrepareFailed(String),

    /// Binding parameters or stepping the statement failed.
    #[error("execution failed: {0}")]
    ExecFailed(String),

    /// The statement is forbidden inside the sandbox.
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl DbError {
    /// Render as the wire-format error object: `{"error": "..."}`.
    #[must_use]
    pub fn to_wire(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

/// Result type for sandbox database operations.
pub type DbResult<T> = Result<T, DbError>;
