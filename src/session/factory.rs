//! Scoped acquisition of handles.

use std::sync::Arc;

use async_stream::try_stream;
use futures::future;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use tracing::{info, warn};

use super::handle::Handle;
use crate::db::ConnectionFactory;
use crate::error::{Error, Result};

/// Entry point of the session layer: turns a `ConnectionFactory` into
/// handles whose connections are released on every exit path.
#[derive(Clone)]
pub struct SessionFactory {
    connections: Arc<dyn ConnectionFactory>,
}

impl SessionFactory {
    pub fn new(connections: impl ConnectionFactory + 'static) -> Self {
        Self {
            connections: Arc::new(connections),
        }
    }

    pub fn from_shared(connections: Arc<dyn ConnectionFactory>) -> Self {
        Self { connections }
    }

    pub fn backend_name(&self) -> &'static str {
        self.connections.name()
    }

    /// Acquire a handle the caller must `close()`.
    ///
    /// A handle dropped without `close()` is released in the background.
    pub async fn open(&self) -> Result<Handle> {
        let conn = self.connections.create().await.map_err(|err| match err {
            Error::Connection { .. } => err,
            other => Error::connection(other.to_string()),
        })?;
        let handle = Handle::new(conn);
        info!(handle = handle.id(), backend = self.backend_name(), "connection acquired");
        Ok(handle)
    }

    /// Acquire a handle, stream the items produced by `f`, then release.
    ///
    /// If acquisition fails, the stream yields the `Connection` error and
    /// `f` is never called. Dropping the stream early releases the handle
    /// in the background.
    pub fn with_handle<F, S, T>(&self, f: F) -> impl Stream<Item = Result<T>> + Send + use<F, S, T>
    where
        F: FnOnce(Handle) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let factory = self.clone();
        try_stream! {
            let handle = factory.open().await?;
            let mut body = Box::pin(f(handle.clone()));
            let failure = loop {
                match body.next().await {
                    Some(Ok(value)) => yield value,
                    Some(Err(err)) => break Some(err),
                    None => break None,
                }
            };
            drop(body);

            let closed = handle.close().await;
            match failure {
                None => closed?,
                Some(err) => {
                    if let Err(close_err) = closed {
                        warn!(handle = handle.id(), error = %close_err, "release after failure failed");
                    }
                    Err::<(), Error>(err)?;
                }
            }
        }
    }

    /// Like `with_handle`, discarding the produced items.
    pub async fn use_handle<F, S, T>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Handle) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.with_handle(f)
            .try_for_each(|_| future::ready(Ok(())))
            .await
    }

    /// Acquire a handle and run `f` inside a top-level transaction that is
    /// committed on completion and rolled back on error or cancellation.
    pub fn in_transaction<F, S, T>(&self, f: F) -> impl Stream<Item = Result<T>> + Send + use<F, S, T>
    where
        F: FnOnce(Handle) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.with_handle(move |handle| handle.in_transaction(f))
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("backend", &self.backend_name())
            .finish()
    }
}
