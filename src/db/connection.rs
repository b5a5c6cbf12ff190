//! The connection capability consumed by the session layer.
//!
//! A `Connection` is one physical session with a database engine. The
//! session core never talks to an engine directly: it validates, then hands
//! SQL and bind sets to a `Connection` and reads back a stream of frames.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::placeholder::PlaceholderScheme;
use super::value::Value;
use crate::error::{Error, Result};

/// One unit of a result stream.
///
/// A stream encodes a sequence of results. Each result is an optional
/// `Columns` frame, zero or more `Row` frames, then exactly one `Complete`.
/// Results without a projection (plain updates) are a lone `Complete`.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Columns(Arc<RowMetadata>),
    Row(Vec<Value>),
    Complete { rows_updated: Option<u64> },
}

/// Frames produced by one `Connection::execute` call.
///
/// The stream owns everything it needs; dropping it cancels the remaining
/// work on the connection side.
pub type Frames = BoxStream<'static, Result<Frame>>;

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Declared type, when the engine reports one.
    pub declared_type: Option<String>,
}

/// Column layout shared by every row of a result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RowMetadata {
    columns: Vec<ColumnMetadata>,
}

impl RowMetadata {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self { columns }
    }

    /// Metadata for untyped columns with the given names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| ColumnMetadata {
                    name: name.into(),
                    declared_type: None,
                })
                .collect(),
        )
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of the column called `name`, ignoring ASCII case.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// One complete assignment of values to a statement's parameters, keyed by
/// zero-based parameter index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindSet {
    values: BTreeMap<usize, Value>,
}

impl BindSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, value: Value) {
        self.values.insert(index, value);
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.values.iter().map(|(i, v)| (*i, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First index below `count` that has no value.
    pub fn first_missing(&self, count: usize) -> Option<usize> {
        (0..count).find(|i| !self.values.contains_key(i))
    }
}

impl<V: Into<Value>> FromIterator<V> for BindSet {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(Into::into).enumerate().collect(),
        }
    }
}

/// Standard transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sql = match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        f.write_str(sql)
    }
}

/// Raw statement execution and transaction primitives of one connection.
///
/// Implementations execute multi-statement texts as one result per
/// statement, and one result per bind set for each statement. An empty
/// `bind_sets` means a single execution without parameters.
#[async_trait]
pub trait Connection: Send {
    /// Placeholder scheme of this connection's SQL dialect.
    fn placeholders(&self) -> PlaceholderScheme;

    /// Execute `sql` once per bind set.
    ///
    /// With `returning_keys`, each execution yields the generated keys of the
    /// rows it inserted as the rows of its result.
    async fn execute(
        &mut self,
        sql: &str,
        bind_sets: Vec<BindSet>,
        returning_keys: bool,
    ) -> Result<Frames>;

    async fn begin_transaction(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn create_savepoint(&mut self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    async fn set_read_only(&mut self, read_only: bool) -> Result<()>;

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()>;

    /// Release the underlying resources. Called at most once.
    async fn close(&mut self) -> Result<()>;
}

/// Source of connections for the session factory.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Connection>>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Stand-in left behind once a handle has given up its connection.
pub(crate) struct ReleasedConnection {
    placeholders: PlaceholderScheme,
}

impl ReleasedConnection {
    pub(crate) fn new(placeholders: PlaceholderScheme) -> Self {
        Self { placeholders }
    }
}

fn released() -> Error {
    Error::invalid_state("handle has been released")
}

#[async_trait]
impl Connection for ReleasedConnection {
    fn placeholders(&self) -> PlaceholderScheme {
        self.placeholders
    }

    async fn execute(&mut self, _: &str, _: Vec<BindSet>, _: bool) -> Result<Frames> {
        Err(released())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        Err(released())
    }

    async fn commit(&mut self) -> Result<()> {
        Err(released())
    }

    async fn rollback(&mut self) -> Result<()> {
        Err(released())
    }

    async fn create_savepoint(&mut self, _: &str) -> Result<()> {
        Err(released())
    }

    async fn rollback_to_savepoint(&mut self, _: &str) -> Result<()> {
        Err(released())
    }

    async fn release_savepoint(&mut self, _: &str) -> Result<()> {
        Err(released())
    }

    async fn set_read_only(&mut self, _: bool) -> Result<()> {
        Err(released())
    }

    async fn set_isolation_level(&mut self, _: IsolationLevel) -> Result<()> {
        Err(released())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
