//! Transaction levels and savepoints on a handle.
//!
//! Level 1 is a real transaction (BEGIN/COMMIT/ROLLBACK). Deeper levels are
//! implemented with an implicit savepoint per level that is released on
//! success and rolled back to on failure.

use async_stream::try_stream;
use futures::stream::{Stream, StreamExt};
use tracing::{debug, warn};

use super::handle::Handle;
use super::state::implicit_savepoint;
use crate::db::Connection;
use crate::error::{Error, Result};

/// Roll back transaction level `depth`.
pub(super) async fn roll_back_level(conn: &mut dyn Connection, depth: usize) -> Result<()> {
    if depth <= 1 {
        return conn.rollback().await;
    }
    let name = implicit_savepoint(depth);
    conn.rollback_to_savepoint(&name).await?;
    conn.release_savepoint(&name).await
}

async fn commit_level(conn: &mut dyn Connection, depth: usize) -> Result<()> {
    if depth <= 1 {
        conn.commit().await
    } else {
        conn.release_savepoint(&implicit_savepoint(depth)).await
    }
}

/// An open transaction level owned by an `in_transaction` stream.
///
/// Dropping it before the level is finished marks the level abandoned; the
/// handle rolls it back before its next operation or on release.
struct Scope {
    handle: Handle,
    depth: usize,
    armed: bool,
}

impl Scope {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.armed {
            debug!(handle = self.handle.id(), depth = self.depth, "transaction level abandoned");
            self.handle.state().mark_abandoned(self.depth);
        }
    }
}

impl Handle {
    /// Run `f` inside a new transaction level.
    ///
    /// The outermost level begins a transaction and commits it once the
    /// body's stream completes; nested levels use an implicit savepoint.
    /// When the body fails, the level is rolled back and the error is
    /// re-raised. Dropping the returned stream early abandons the level.
    pub fn in_transaction<F, S, T>(&self, f: F) -> impl Stream<Item = Result<T>> + Send + use<F, S, T>
    where
        F: FnOnce(Handle) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.clone();
        try_stream! {
            let scope = handle.enter_level().await?;
            let mut body = Box::pin(f(handle.clone()));
            let failure = loop {
                match body.next().await {
                    Some(Ok(value)) => yield value,
                    Some(Err(err)) => break Some(err),
                    None => break None,
                }
            };
            drop(body);

            match failure {
                None => handle.finish_level(scope).await?,
                Some(err) => {
                    handle.abort_level(scope, &err).await;
                    Err::<(), Error>(err)?;
                }
            }
        }
    }

    async fn enter_level(&self) -> Result<Scope> {
        let (_slot, mut conn) = self.guarded().await?;
        let depth = self.state().begin_scope();
        let mut scope = Scope {
            handle: self.clone(),
            depth,
            armed: true,
        };
        let begun = if depth == 1 {
            conn.begin_transaction().await
        } else {
            conn.create_savepoint(&implicit_savepoint(depth)).await
        };
        if let Err(err) = begun {
            scope.disarm();
            let _ = self.state().end_scope(depth);
            return Err(err);
        }
        debug!(handle = self.id(), depth, "transaction level started");
        Ok(scope)
    }

    async fn finish_level(&self, mut scope: Scope) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        let depth = scope.depth;
        if depth > self.state().depth() {
            scope.disarm();
            debug!(handle = self.id(), depth, "transaction level already ended");
            return Ok(());
        }
        let restore = self.state().end_scope(depth)?;
        scope.disarm();

        let mut committed = self.apply_read_only(&mut **conn, restore).await;
        if committed.is_ok() {
            committed = commit_level(&mut **conn, depth).await;
        }
        match &committed {
            Ok(()) => debug!(handle = self.id(), depth, "transaction level committed"),
            Err(err) => {
                warn!(handle = self.id(), depth, error = %err, "commit failed, rolling back");
                if let Err(rollback_err) = roll_back_level(&mut **conn, depth).await {
                    warn!(handle = self.id(), depth, error = %rollback_err, "rollback after failed commit failed");
                }
            }
        }
        committed
    }

    /// Roll back a level whose body failed with `cause`. Cleanup failures
    /// are logged; the caller re-raises `cause`.
    async fn abort_level(&self, mut scope: Scope, cause: &Error) {
        let depth = scope.depth;
        let result = async {
            let (_slot, mut conn) = self.guarded().await?;
            if depth > self.state().depth() {
                scope.disarm();
                return Ok(());
            }
            let restore = self.state().end_from(depth)?;
            scope.disarm();
            let rolled_back = roll_back_level(&mut **conn, depth).await;
            let restored = self.apply_read_only(&mut **conn, restore).await;
            rolled_back.and(restored)
        }
        .await;
        match result {
            Ok(()) => debug!(handle = self.id(), depth, error = %cause, "transaction level rolled back"),
            Err(err) => warn!(handle = self.id(), depth, error = %err, cause = %cause, "rollback of failed transaction level failed"),
        }
    }

    /// Begin a top-level transaction explicitly.
    pub async fn begin_transaction(&self) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        if self.state().depth() != 0 {
            return Err(Error::invalid_state("a transaction is already active"));
        }
        conn.begin_transaction().await?;
        self.state().begin_scope();
        debug!(handle = self.id(), "transaction started");
        Ok(())
    }

    /// Commit the active transaction, ending every level.
    pub async fn commit_transaction(&self) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        let restore = self.state().end_all()?;
        self.apply_read_only(&mut **conn, restore).await?;
        conn.commit().await?;
        debug!(handle = self.id(), "transaction committed");
        Ok(())
    }

    /// Roll back the active transaction, ending every level.
    pub async fn rollback_transaction(&self) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        let restore = self.state().end_all()?;
        let rolled_back = conn.rollback().await;
        let restored = self.apply_read_only(&mut **conn, restore).await;
        rolled_back.and(restored)?;
        debug!(handle = self.id(), "transaction rolled back");
        Ok(())
    }

    /// Create savepoint `name` in the current transaction level.
    pub async fn create_savepoint(&self, name: &str) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        self.state().check_new_savepoint(name)?;
        conn.create_savepoint(name).await?;
        self.state().push_savepoint(name);
        debug!(handle = self.id(), savepoint = name, "savepoint created");
        Ok(())
    }

    /// Undo everything done since savepoint `name` and drop it together
    /// with every savepoint created after it.
    ///
    /// A savepoint of an enclosing level also ends every level nested in
    /// that one; their `in_transaction` streams then finish without
    /// committing or rolling back.
    pub async fn rollback_transaction_to_savepoint(&self, name: &str) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        let (position, depth) = self.state().find_savepoint(name)?;
        conn.rollback_to_savepoint(name).await?;
        conn.release_savepoint(name).await?;
        self.end_savepoint(&mut **conn, position, depth).await?;
        debug!(handle = self.id(), savepoint = name, "rolled back to savepoint");
        Ok(())
    }

    /// Release savepoint `name`, keeping its effects.
    ///
    /// Levels nested in the savepoint's level end as they do for
    /// [`Handle::rollback_transaction_to_savepoint`], their work kept.
    pub async fn release_savepoint(&self, name: &str) -> Result<()> {
        let (_slot, mut conn) = self.guarded().await?;
        let (position, depth) = self.state().find_savepoint(name)?;
        conn.release_savepoint(name).await?;
        self.end_savepoint(&mut **conn, position, depth).await?;
        debug!(handle = self.id(), savepoint = name, "savepoint released");
        Ok(())
    }

    /// Drop the savepoint at `position`, created at level `depth`, after
    /// the connection discarded it along with everything opened later.
    async fn end_savepoint(
        &self,
        conn: &mut dyn Connection,
        position: usize,
        depth: usize,
    ) -> Result<()> {
        let restore = if depth < self.state().depth() {
            debug!(handle = self.id(), depth, "ending levels nested in savepoint level");
            self.state().end_from(depth + 1)?
        } else {
            None
        };
        self.state().pop_savepoints(position);
        self.apply_read_only(conn, restore).await
    }
}
