//! sql_session library - reactive sessions over SQL connections
//!
//! Provides handles, statement builders, lazily streamed results and nested
//! transactions with savepoints on top of an asynchronous `Connection`, plus
//! the SQLite backend, configuration and output layers used by the binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod session;

#[macro_use]
mod macros;

#[macro_use]
pub mod test_macros;

#[cfg(test)]
pub mod test_utils;

pub use db::{
    BindIdentifier, Connection, ConnectionFactory, DatabaseConfig, IsolationLevel,
    PlaceholderScheme, RowMetadata, SqliteConnectionFactory, SqliteOptions, SqliteTarget, Value,
};
pub use error::{Error, Result};
pub use session::{
    Batch, ColumnIndex, Handle, Mutability, Query, Results, Row, SessionFactory, SqlResult, Update,
};
