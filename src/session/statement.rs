//! Statement builders.
//!
//! Builders are consumed by their execute call. Nothing is sent to the
//! connection until the returned stream is first polled.

use futures::future;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};

use super::handle::Handle;
use super::result::{Results, Row, SqlResult};
use crate::db::sql::parameter_count;
use crate::db::{BindIdentifier, BindSet, RowMetadata, Value};
use crate::error::{Error, Result};

/// Apply `f` to every result of a lazily dispatched statement.
fn map_results<D, F, S, T>(dispatch: D, f: F) -> impl Stream<Item = Result<T>> + Send
where
    D: Future<Output = Result<Results>> + Send,
    F: FnMut(SqlResult) -> S + Send,
    S: Stream<Item = Result<T>> + Send,
{
    stream::once(dispatch).try_flatten().map_ok(f).try_flatten()
}

/// Parameters bound so far and the statement they belong to.
#[derive(Debug, Clone)]
struct Bindings {
    parameter_count: usize,
    current: BindSet,
    finished: Vec<BindSet>,
}

impl Bindings {
    fn new(handle: &Handle, sql: &str) -> Self {
        Self {
            parameter_count: parameter_count(sql, handle.placeholders()),
            current: BindSet::new(),
            finished: Vec::new(),
        }
    }

    fn bind(&mut self, handle: &Handle, identifier: BindIdentifier, value: Value) -> Result<()> {
        let index = handle
            .placeholders()
            .resolve(&identifier, self.parameter_count)?;
        self.current.insert(index, value);
        Ok(())
    }

    fn add(&mut self, handle: &Handle) -> Result<()> {
        if let Some(missing) = self.current.first_missing(self.parameter_count) {
            return Err(Error::bind(format!(
                "parameter {} is not bound",
                handle.placeholders().placeholder(missing)
            )));
        }
        self.finished.push(std::mem::take(&mut self.current));
        Ok(())
    }

    /// Bind sets to execute. A partly built set is finalized; with nothing
    /// bound at all the statement runs once without parameters.
    fn into_bind_sets(mut self, handle: &Handle) -> Result<Vec<BindSet>> {
        if !self.current.is_empty() || (self.finished.is_empty() && self.parameter_count > 0) {
            self.add(handle)?;
        }
        Ok(self.finished)
    }
}

/// A single SQL text, optionally with one bind set.
///
/// Compound texts produce one result per statement.
#[derive(Debug)]
pub struct Query {
    handle: Handle,
    sql: String,
    bindings: Bindings,
}

impl Query {
    pub(crate) fn new(handle: Handle, sql: String) -> Self {
        let bindings = Bindings::new(&handle, &sql);
        Self {
            handle,
            sql,
            bindings,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bind(
        mut self,
        identifier: impl Into<BindIdentifier>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.bindings
            .bind(&self.handle, identifier.into(), value.into())?;
        Ok(self)
    }

    /// Dispatch now and return the raw results.
    pub async fn execute(self) -> Result<Results> {
        let bind_sets = self.bindings.into_bind_sets(&self.handle)?;
        self.handle.dispatch(&self.sql, bind_sets, false).await
    }

    /// Apply `f` to each result, yielding `f`'s outputs in order.
    pub fn map_result<F, S, T>(self, f: F) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        F: FnMut(SqlResult) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        map_results(self.execute(), f)
    }

    /// Apply `f` to every row of every result.
    pub fn map_rows<F, T>(self, f: F) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        F: FnMut(&Row, &RowMetadata) -> Result<T> + Clone + Send + 'static,
        T: Send + 'static,
    {
        self.map_result(move |result| result.map(f.clone()))
    }
}

/// One SQL text executed once per bind set.
#[derive(Debug)]
pub struct Update {
    handle: Handle,
    sql: String,
    bindings: Bindings,
}

impl Update {
    pub(crate) fn new(handle: Handle, sql: String) -> Self {
        let bindings = Bindings::new(&handle, &sql);
        Self {
            handle,
            sql,
            bindings,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind `value` to the parameter named by `identifier` in the bind set
    /// being built.
    pub fn bind(
        mut self,
        identifier: impl Into<BindIdentifier>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.bindings
            .bind(&self.handle, identifier.into(), value.into())?;
        Ok(self)
    }

    /// Finalize the bind set being built and start a new one.
    pub fn add(mut self) -> Result<Self> {
        self.bindings.add(&self.handle)?;
        Ok(self)
    }

    async fn dispatch(self, returning_keys: bool) -> Result<Results> {
        let bind_sets = self.bindings.into_bind_sets(&self.handle)?;
        self.handle
            .dispatch(&self.sql, bind_sets, returning_keys)
            .await
    }

    /// Run once per bind set, yielding each execution's row count.
    pub fn execute(self) -> impl Stream<Item = Result<u64>> + Send + 'static {
        self.map_result(|result| {
            stream::once(async move { result.rows_updated().await })
        })
    }

    /// Run once per bind set, yielding a result per execution whose rows are
    /// the generated keys.
    pub fn execute_returning_generated_keys(
        self,
    ) -> impl Stream<Item = Result<SqlResult>> + Send + 'static {
        stream::once(self.dispatch(true)).try_flatten()
    }

    /// Apply `f` to the result of every execution.
    pub fn map_result<F, S, T>(self, f: F) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        F: FnMut(SqlResult) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        map_results(self.dispatch(false), f)
    }
}

/// Independent SQL texts executed in order.
#[derive(Debug)]
pub struct Batch {
    handle: Handle,
    statements: Vec<String>,
}

impl Batch {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            statements: Vec::new(),
        }
    }

    pub fn add(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Execute each text in addition order and apply `f` to each result.
    ///
    /// A statement is dispatched only once the previous one's results are
    /// exhausted.
    pub fn map_result<F, S, T>(self, f: F) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        F: FnMut(SqlResult) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle;
        stream::iter(self.statements)
            .then(move |sql| {
                let handle = handle.clone();
                async move { handle.dispatch(&sql, Vec::new(), false).await }
            })
            .try_flatten()
            .map_ok(f)
            .try_flatten()
    }

    /// Execute every text, yielding the row count of each result.
    pub fn execute(self) -> impl Stream<Item = Result<u64>> + Send + 'static {
        self.map_result(|result| stream::once(async move { result.rows_updated().await }))
    }
}

/// A stream that fails immediately with `err`.
pub(crate) fn failed<T: Send + 'static>(err: Error) -> impl Stream<Item = Result<T>> + Send {
    stream::once(future::ready(Err(err)))
}
