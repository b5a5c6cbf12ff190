//! Error taxonomy shared by the session core and the connection layer.
//!
//! Every failure surfaces as the terminal item of the affected stream (or the
//! `Err` of the affected future). Nothing in the core retries.

use thiserror::Error;

/// Errors produced by handles, statements, results and connections.
#[derive(Error, Debug)]
pub enum Error {
    /// Acquisition or connectivity failure.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    /// A mutating statement was issued while the handle is read-only.
    #[error("Cannot execute mutating statement in a read-only transaction: {sql}")]
    MutabilityViolation { sql: String },

    /// A transaction or savepoint operation is invalid for the current state.
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// A statement was dispatched while another one is still in flight.
    #[error("Another statement is still in flight on this handle")]
    ConcurrentStatement,

    /// A bind identifier or value does not fit the placeholder scheme.
    #[error("Bind error: {message}")]
    Bind { message: String },

    #[error("Column '{column}' holds {found}, which cannot be read as {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Column '{column}' not found in result")]
    ColumnNotFound { column: String },

    /// The rows of a result were requested a second time.
    #[error("Result has already been consumed")]
    AlreadyConsumed,

    /// Failure reported by the database engine.
    #[error("Database error{}: {message}", code_suffix(.code))]
    Database { code: Option<i64>, message: String },
}

impl Error {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// True for failures a caller should treat as coming from the database,
    /// which includes mutability violations caught before dispatch.
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::MutabilityViolation { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn code_suffix(code: &Option<i64>) -> String {
    match code {
        Some(code) => format!(" [{}]", code),
        None => String::new(),
    }
}
