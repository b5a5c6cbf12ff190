//! Connection layer beneath the session core.
//!
//! - `Connection` / `ConnectionFactory`: the capability the session layer
//!   drives, and the frame protocol results come back in
//! - `Value` / `FromValue`: the closed set of SQL values and typed extraction
//! - `PlaceholderScheme`: how a dialect writes and names parameters
//! - `sql`: lexical helpers (statement splitting, mutation classification)
//! - `sqlite`: the bundled SQLite backend
//! - `DatabaseConfig`: which database to open

mod config;
mod connection;
mod escape;
mod placeholder;
pub mod sql;
mod sqlite;
mod value;

pub use config::{DatabaseConfig, DEFAULT_DATABASE};
pub(crate) use connection::ReleasedConnection;
pub use connection::{
    BindSet, ColumnMetadata, Connection, ConnectionFactory, Frame, Frames, IsolationLevel,
    RowMetadata,
};
pub use escape::quote_identifier;
pub use placeholder::{BindIdentifier, PlaceholderScheme};
pub use sqlite::{SqliteConnection, SqliteConnectionFactory, SqliteOptions, SqliteTarget};
pub use value::{FromValue, Value};
