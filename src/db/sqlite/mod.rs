//! SQLite connection backend.
//!
//! This module provides the reference `Connection` implementation using the
//! bundled SQLite from `rusqlite`. Each connection runs on its own worker
//! thread (see `worker`), so statement execution never blocks the async
//! runtime and rows are produced only as fast as the consumer pulls them.

mod conversion;
mod worker;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::connection::{BindSet, Connection, ConnectionFactory, Frames, IsolationLevel};
use super::placeholder::PlaceholderScheme;
use crate::error::{Error, Result};
use worker::{Control, Request, WorkerSettings};

/// Where a SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    File(PathBuf),
    /// Private in-memory database, or a named one shared by every connection
    /// of the process that uses the same name.
    Memory(Option<String>),
}

impl fmt::Display for SqliteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqliteTarget::File(path) => write!(f, "'{}'", path.display()),
            SqliteTarget::Memory(None) => write!(f, ":memory:"),
            SqliteTarget::Memory(Some(name)) => write!(f, "memory '{}'", name),
        }
    }
}

/// Tuning for SQLite connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    /// Row frames buffered ahead of the consumer.
    pub fetch_size: usize,
    pub placeholders: PlaceholderScheme,
    pub busy_timeout_ms: u64,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            fetch_size: 64,
            placeholders: PlaceholderScheme::Numbered,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Creates `SqliteConnection`s for one database.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    target: SqliteTarget,
    options: SqliteOptions,
}

impl SqliteConnectionFactory {
    pub fn new(target: SqliteTarget, options: SqliteOptions) -> Self {
        Self { target, options }
    }

    pub fn target(&self) -> &SqliteTarget {
        &self.target
    }

    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    async fn create(&self) -> Result<Box<dyn Connection>> {
        let connection = SqliteConnection::open(self.target.clone(), self.options).await?;
        Ok(Box::new(connection))
    }

    fn name(&self) -> &'static str {
        "Sqlite"
    }
}

/// One SQLite connection, driven through its worker thread.
pub struct SqliteConnection {
    requests: mpsc::UnboundedSender<Request>,
    options: SqliteOptions,
}

fn worker_gone() -> Error {
    Error::connection("SQLite worker is no longer running")
}

impl SqliteConnection {
    pub async fn open(target: SqliteTarget, options: SqliteOptions) -> Result<Self> {
        debug!(target = %target, "opening SQLite connection");
        let settings = WorkerSettings {
            placeholders: options.placeholders,
            busy_timeout: Duration::from_millis(options.busy_timeout_ms),
        };
        let requests = worker::spawn(target, settings).await?;
        Ok(Self { requests, options })
    }

    async fn control(&self, command: Control) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Control { command, reply })
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn placeholders(&self) -> PlaceholderScheme {
        self.options.placeholders
    }

    async fn execute(
        &mut self,
        sql: &str,
        bind_sets: Vec<BindSet>,
        returning_keys: bool,
    ) -> Result<Frames> {
        let (frames_tx, frames_rx) = mpsc::channel(self.options.fetch_size.max(1));
        self.requests
            .send(Request::Execute {
                sql: sql.to_string(),
                bind_sets,
                returning_keys,
                frames: frames_tx,
            })
            .map_err(|_| worker_gone())?;

        let frames = stream::unfold(frames_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        Ok(frames.boxed())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.control(Control::Begin).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.control(Control::Commit).await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.control(Control::Rollback).await
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.control(Control::Savepoint(name.to_string())).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.control(Control::RollbackTo(name.to_string())).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.control(Control::Release(name.to_string())).await
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.control(Control::ReadOnly(read_only)).await
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        self.control(Control::Isolation(level)).await
    }

    async fn close(&mut self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        if self.requests.send(Request::Close { reply }).is_err() {
            return Ok(());
        }
        response.await.map_err(|_| worker_gone())?
    }
}
