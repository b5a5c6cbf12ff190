//! Shared test utilities.
//!
//! `ScriptedConnection` is an in-memory `Connection` that records every call
//! it receives and answers statements from a fixed script, so handle and
//! factory behaviour can be asserted call by call.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::db::sql::{leading_keyword, split_statements};
use crate::db::{
    BindSet, Connection, ConnectionFactory, Frame, Frames, IsolationLevel, PlaceholderScheme,
    RowMetadata, Value,
};
use crate::error::{Error, Result};
use crate::session::Handle;

/// Serializes tests that touch the process environment or working directory.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Calls received by scripted connections, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls whose first word is `op`.
    pub fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(op)
                || call.starts_with(&format!("{}+", op)))
            .count()
    }

    /// Wait until a call with first word `op` is recorded. Background
    /// releases run on the test runtime, so this yields to them.
    pub async fn wait_for(&self, op: &str) {
        for _ in 0..200 {
            if self.count(op) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for '{}', calls: {:?}", op, self.calls());
    }
}

/// In-memory connection answering from a script.
///
/// - a statement whose text is `FAIL` yields a database error frame
/// - `SELECT` yields a `value` column with one row per execution holding
///   the execution's index
/// - with `returning_keys`, inserts yield an `id` row with an increasing key
/// - everything else reports one updated row per execution
pub struct ScriptedConnection {
    log: CallLog,
    placeholders: PlaceholderScheme,
    failing: Vec<&'static str>,
    next_key: i64,
}

impl ScriptedConnection {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            placeholders: PlaceholderScheme::Numbered,
            failing: Vec::new(),
            next_key: 1,
        }
    }

    pub fn with_placeholders(mut self, placeholders: PlaceholderScheme) -> Self {
        self.placeholders = placeholders;
        self
    }

    /// Make the operations named in `ops` (as they appear in the log) fail.
    pub fn failing(mut self, ops: &[&'static str]) -> Self {
        self.failing = ops.to_vec();
        self
    }

    fn record(&self, op: &'static str, detail: Option<String>) -> Result<()> {
        match detail {
            Some(detail) => self.log.push(format!("{} {}", op, detail)),
            None => self.log.push(op),
        }
        if self.failing.contains(&op) {
            return Err(scripted_failure(op));
        }
        Ok(())
    }

    fn frames_for(&mut self, statement: &str, executions: usize, returning_keys: bool) -> Vec<Result<Frame>> {
        if statement == "FAIL" {
            return vec![Err(scripted_failure(statement))];
        }
        let keyword = leading_keyword(statement);
        let mut frames = Vec::new();
        for execution in 0..executions {
            match keyword.as_deref() {
                Some("SELECT") => {
                    frames.push(Ok(Frame::Columns(Arc::new(RowMetadata::from_names(["value"])))));
                    frames.push(Ok(Frame::Row(vec![Value::Integer(execution as i64)])));
                    frames.push(Ok(Frame::Complete { rows_updated: None }));
                }
                Some("INSERT") if returning_keys => {
                    frames.push(Ok(Frame::Columns(Arc::new(RowMetadata::from_names(["id"])))));
                    frames.push(Ok(Frame::Row(vec![Value::Integer(self.next_key)])));
                    frames.push(Ok(Frame::Complete { rows_updated: Some(1) }));
                    self.next_key += 1;
                }
                _ => frames.push(Ok(Frame::Complete { rows_updated: Some(1) })),
            }
        }
        frames
    }
}

fn scripted_failure(what: &str) -> Error {
    Error::Database {
        code: Some(1),
        message: format!("scripted failure: {}", what),
    }
}

fn describe_bind_set(set: &BindSet) -> String {
    let values: Vec<String> = set.iter().map(|(_, value)| value.to_string()).collect();
    format!("[{}]", values.join(", "))
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn placeholders(&self) -> PlaceholderScheme {
        self.placeholders
    }

    async fn execute(
        &mut self,
        sql: &str,
        bind_sets: Vec<BindSet>,
        returning_keys: bool,
    ) -> Result<Frames> {
        let mut entry = String::from(sql);
        for set in &bind_sets {
            entry.push(' ');
            entry.push_str(&describe_bind_set(set));
        }
        self.record(if returning_keys { "execute+keys" } else { "execute" }, Some(entry))?;

        let executions = bind_sets.len().max(1);
        let mut frames = Vec::new();
        for statement in split_statements(sql) {
            frames.extend(self.frames_for(statement, executions, returning_keys));
        }
        Ok(stream::iter(frames).boxed())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.record("begin", None)
    }

    async fn commit(&mut self) -> Result<()> {
        self.record("commit", None)
    }

    async fn rollback(&mut self) -> Result<()> {
        self.record("rollback", None)
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.record("savepoint", Some(name.to_string()))
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.record("rollback_to", Some(name.to_string()))
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.record("release", Some(name.to_string()))
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.record("read_only", Some(read_only.to_string()))
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        self.record("isolation", Some(level.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.record("close", None)
    }
}

/// Factory handing out `ScriptedConnection`s that share one log.
pub struct ScriptedFactory {
    log: CallLog,
    fail_create: bool,
}

impl ScriptedFactory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_create: false,
        }
    }

    pub fn failing(log: CallLog) -> Self {
        Self {
            log,
            fail_create: true,
        }
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn create(&self) -> Result<Box<dyn Connection>> {
        if self.fail_create {
            return Err(Error::connection("scripted acquisition failure"));
        }
        self.log.push("create");
        Ok(Box::new(ScriptedConnection::new(self.log.clone())))
    }

    fn name(&self) -> &'static str {
        "Scripted"
    }
}

/// A handle over a fresh scripted connection, and its call log.
pub fn scripted_handle() -> (Handle, CallLog) {
    scripted_handle_with(PlaceholderScheme::Numbered, &[])
}

/// A scripted handle whose connection fails the operations in `ops`.
pub fn scripted_handle_failing(ops: &[&'static str]) -> (Handle, CallLog) {
    scripted_handle_with(PlaceholderScheme::Numbered, ops)
}

pub fn scripted_handle_with(
    placeholders: PlaceholderScheme,
    failing: &[&'static str],
) -> (Handle, CallLog) {
    let log = CallLog::default();
    let conn = ScriptedConnection::new(log.clone())
        .with_placeholders(placeholders)
        .failing(failing);
    (Handle::new(Box::new(conn)), log)
}
