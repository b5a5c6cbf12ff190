//! The live session bound to one connection.
//!
//! Every statement and transaction operation goes through the same gate:
//! take the in-flight slot, check the handle is not released, roll back
//! any abandoned transaction level, validate mutability, then forward to
//! the connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};

use futures::lock::{Mutex, MutexGuard as ConnectionGuard};
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info, warn};

use super::result::Results;
use super::state::{Mutability, TransactionState};
use super::statement::{failed, Batch, Query, Update};
use super::transaction::roll_back_level;
use crate::db::sql::is_mutating;
use crate::db::{BindSet, Connection, IsolationLevel, PlaceholderScheme, ReleasedConnection, Value};
use crate::error::{Error, Result};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Exclusive right to talk to the connection.
///
/// Held by an open `Results` until its frames are exhausted or dropped, and
/// briefly by every transaction operation.
pub(crate) struct Slot {
    busy: Arc<AtomicBool>,
}

impl Slot {
    pub(crate) fn acquire(busy: &Arc<AtomicBool>) -> Result<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ConcurrentStatement)?;
        Ok(Self { busy: busy.clone() })
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

struct HandleInner {
    id: u64,
    conn: Mutex<Box<dyn Connection>>,
    state: std::sync::Mutex<TransactionState>,
    busy: Arc<AtomicBool>,
    placeholders: PlaceholderScheme,
}

/// A session on one connection.
///
/// Clones share the connection and its transaction state; nested
/// transaction bodies receive such a clone.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    pub fn new(conn: Box<dyn Connection>) -> Self {
        let placeholders = conn.placeholders();
        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                conn: Mutex::new(conn),
                state: std::sync::Mutex::new(TransactionState::default()),
                busy: Arc::new(AtomicBool::new(false)),
                placeholders,
            }),
        }
    }

    /// Process-unique id used in log fields.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn placeholders(&self) -> PlaceholderScheme {
        self.inner.placeholders
    }

    /// Current nesting depth; 0 means autocommit.
    pub fn transaction_depth(&self) -> usize {
        self.state().depth()
    }

    pub fn mutability(&self) -> Mutability {
        self.state().mutability()
    }

    pub fn is_released(&self) -> bool {
        self.state().is_released()
    }

    pub(super) fn state(&self) -> MutexGuard<'_, TransactionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_query(&self, sql: impl Into<String>) -> Query {
        Query::new(self.clone(), sql.into())
    }

    /// Alias of `create_query`.
    pub fn select(&self, sql: impl Into<String>) -> Query {
        self.create_query(sql)
    }

    pub fn create_update(&self, sql: impl Into<String>) -> Update {
        Update::new(self.clone(), sql.into())
    }

    pub fn create_batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    /// Run `sql` once with `params` bound in order, yielding the row count of
    /// each statement execution.
    pub fn execute(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> BoxStream<'static, Result<u64>> {
        let scheme = self.placeholders();
        let update = params
            .into_iter()
            .enumerate()
            .try_fold(self.create_update(sql), |update, (index, value)| {
                update.bind(scheme.identifier(index), value)
            });
        match update {
            Ok(update) => update.execute().boxed(),
            Err(err) => failed(err).boxed(),
        }
    }

    /// Take the slot and the connection, after settling abandoned levels.
    pub(super) async fn guarded(&self) -> Result<(Slot, ConnectionGuard<'_, Box<dyn Connection>>)> {
        let slot = Slot::acquire(&self.inner.busy)?;
        let mut conn = self.inner.conn.lock().await;
        self.settle(&mut **conn).await?;
        Ok((slot, conn))
    }

    async fn settle(&self, conn: &mut dyn Connection) -> Result<()> {
        let abandoned = {
            let mut state = self.state();
            state.ensure_open()?;
            state.take_abandoned()
        };
        if let Some(depth) = abandoned {
            debug!(handle = self.id(), depth, "rolling back abandoned transaction level");
            if let Err(err) = self.unwind_levels(conn, depth).await {
                warn!(handle = self.id(), depth, error = %err, "rollback of abandoned transaction level failed");
            }
        }
        Ok(())
    }

    /// Roll back level `depth` and everything nested in it.
    pub(super) async fn unwind_levels(&self, conn: &mut dyn Connection, depth: usize) -> Result<()> {
        let restore = self.state().end_from(depth)?;
        let rolled_back = roll_back_level(conn, depth).await;
        let restored = self.apply_read_only(conn, restore).await;
        rolled_back.and(restored)
    }

    /// Switch the connection's read-only flag when the effective mode changed.
    pub(super) async fn apply_read_only(
        &self,
        conn: &mut dyn Connection,
        change: Option<bool>,
    ) -> Result<()> {
        let Some(read_only) = change else {
            return Ok(());
        };
        let result = conn.set_read_only(read_only).await;
        if result.is_err() {
            self.state().read_only_failed(read_only);
        }
        result
    }

    /// Validate and forward one statement to the connection.
    pub(crate) async fn dispatch(
        &self,
        sql: &str,
        bind_sets: Vec<BindSet>,
        returning_keys: bool,
    ) -> Result<Results> {
        let (slot, mut conn) = self.guarded().await?;
        let read_only = self.state().is_read_only();
        if read_only && is_mutating(sql) {
            debug!(handle = self.id(), sql, "rejected mutating statement on read-only handle");
            return Err(Error::MutabilityViolation {
                sql: sql.to_string(),
            });
        }
        debug!(
            handle = self.id(),
            sql,
            executions = bind_sets.len().max(1),
            returning_keys,
            "dispatching statement"
        );
        let frames = conn.execute(sql, bind_sets, returning_keys).await?;
        Ok(Results::new(frames, slot))
    }

    /// Restrict the current transaction level (or the connection default in
    /// autocommit) to `mode`. The mode reverts when the level ends.
    pub async fn set_transaction_mutability(&self, mode: Mutability) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        let (depth, change) = {
            let mut state = self.state();
            (state.depth(), state.set_mutability(mode))
        };
        debug!(handle = self.id(), depth, mode = %mode, "transaction mutability set");
        self.apply_read_only(&mut **conn, change).await
    }

    pub async fn set_transaction_isolation_level(&self, level: IsolationLevel) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        debug!(handle = self.id(), level = %level, "transaction isolation level set");
        conn.set_isolation_level(level).await
    }

    /// Release the connection: roll back an open transaction, restore
    /// read-write mode if it was changed, then close it.
    ///
    /// Closing twice is a no-op. Any later operation fails with
    /// `InvalidState`.
    pub async fn close(&self) -> Result<()> {
        if self.is_released() {
            return Ok(());
        }
        let _slot = Slot::acquire(&self.inner.busy)?;
        let mut conn = self.inner.conn.lock().await;
        let (rollback, reset_read_only) = {
            let mut state = self.state();
            if !state.release() {
                return Ok(());
            }
            (state.depth() > 0, state.connection_read_only())
        };
        let released = std::mem::replace(
            &mut *conn,
            Box::new(ReleasedConnection::new(self.inner.placeholders)),
        );
        release_connection(self.id(), released, rollback, reset_read_only).await
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("depth", &state.depth())
            .field("mutability", &state.mutability())
            .field("released", &state.is_released())
            .finish()
    }
}

async fn release_connection(
    id: u64,
    mut conn: Box<dyn Connection>,
    rollback: bool,
    reset_read_only: bool,
) -> Result<()> {
    if rollback {
        if let Err(err) = conn.rollback().await {
            warn!(handle = id, error = %err, "rollback on release failed");
        }
    }
    if reset_read_only {
        if let Err(err) = conn.set_read_only(false).await {
            warn!(handle = id, error = %err, "restoring read-write mode on release failed");
        }
    }
    let closed = conn.close().await;
    match &closed {
        Ok(()) => info!(handle = id, "connection released"),
        Err(err) => warn!(handle = id, error = %err, "closing connection failed"),
    }
    closed
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.release() {
            return;
        }
        let rollback = state.depth() > 0;
        let reset_read_only = state.connection_read_only();
        let conn = std::mem::replace(
            self.conn.get_mut(),
            Box::new(ReleasedConnection::new(self.placeholders)),
        );
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(handle = id, "handle dropped without close, releasing in background");
                runtime.spawn(async move {
                    let _ = release_connection(id, conn, rollback, reset_read_only).await;
                });
            }
            Err(_) => {
                warn!(handle = id, "handle dropped outside a tokio runtime, closing connection without rollback");
            }
        }
    }
}
