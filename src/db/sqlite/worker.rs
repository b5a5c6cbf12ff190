//! The thread that owns a rusqlite connection.
//!
//! rusqlite is synchronous and its statements borrow the connection, so each
//! `SqliteConnection` talks to a dedicated thread over channels. Rows go back
//! through a bounded channel: once it is full the thread blocks on send, and
//! when the receiver is dropped the thread stops stepping the statement.

use std::sync::Arc;

use rusqlite::{Connection, OpenFlags, Statement};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::conversion::{from_value_ref, map_error, to_sql_value};
use super::SqliteTarget;
use crate::db::connection::{BindSet, ColumnMetadata, Frame, IsolationLevel, RowMetadata};
use crate::db::escape::quote_identifier;
use crate::db::placeholder::PlaceholderScheme;
use crate::db::sql::{contains_keyword, leading_keyword, split_statements};
use crate::error::{Error, Result};

pub(super) enum Request {
    Execute {
        sql: String,
        bind_sets: Vec<BindSet>,
        returning_keys: bool,
        frames: mpsc::Sender<Result<Frame>>,
    },
    Control {
        command: Control,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

pub(super) enum Control {
    Begin,
    Commit,
    Rollback,
    Savepoint(String),
    RollbackTo(String),
    Release(String),
    ReadOnly(bool),
    Isolation(IsolationLevel),
}

impl Control {
    fn sql(&self) -> String {
        match self {
            Control::Begin => "BEGIN".to_string(),
            Control::Commit => "COMMIT".to_string(),
            Control::Rollback => "ROLLBACK".to_string(),
            Control::Savepoint(name) => format!("SAVEPOINT {}", quote_identifier(name)),
            Control::RollbackTo(name) => {
                format!("ROLLBACK TO SAVEPOINT {}", quote_identifier(name))
            }
            Control::Release(name) => format!("RELEASE SAVEPOINT {}", quote_identifier(name)),
            Control::ReadOnly(read_only) => {
                format!("PRAGMA query_only = {}", if *read_only { "ON" } else { "OFF" })
            }
            // SQLite is serializable unless shared-cache reads are made dirty.
            Control::Isolation(level) => format!(
                "PRAGMA read_uncommitted = {}",
                i32::from(*level == IsolationLevel::ReadUncommitted)
            ),
        }
    }
}

/// Settings the worker needs besides the target.
#[derive(Debug, Clone, Copy)]
pub(super) struct WorkerSettings {
    pub placeholders: PlaceholderScheme,
    pub busy_timeout: std::time::Duration,
}

/// Open `target` on a new thread and return the request channel once the
/// connection is ready.
pub(super) async fn spawn(
    target: SqliteTarget,
    settings: WorkerSettings,
) -> Result<mpsc::UnboundedSender<Request>> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("sqlite-worker".to_string())
        .spawn(move || match open(&target, settings) {
            Ok(conn) => {
                if ready_tx.send(Ok(())).is_ok() {
                    run(conn, requests_rx, settings.placeholders);
                }
            }
            Err(err) => {
                let _ = ready_tx.send(Err(err));
            }
        })
        .map_err(|e| Error::connection(format!("Failed to start SQLite worker: {}", e)))?;

    ready_rx
        .await
        .map_err(|_| Error::connection("SQLite worker exited during startup"))??;
    Ok(requests_tx)
}

fn open(target: &SqliteTarget, settings: WorkerSettings) -> Result<Connection> {
    let conn = match target {
        SqliteTarget::File(path) => Connection::open(path),
        SqliteTarget::Memory(None) => Connection::open_in_memory(),
        SqliteTarget::Memory(Some(name)) => Connection::open_with_flags(
            format!("file:{}?mode=memory&cache=shared", name),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ),
    }
    .map_err(|e| Error::connection(format!("Failed to open SQLite database {}: {}", target, e)))?;

    conn.busy_timeout(settings.busy_timeout)
        .map_err(|e| Error::connection(format!("Failed to configure SQLite connection: {}", e)))?;
    Ok(conn)
}

fn run(
    conn: Connection,
    mut requests: mpsc::UnboundedReceiver<Request>,
    placeholders: PlaceholderScheme,
) {
    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::Execute {
                sql,
                bind_sets,
                returning_keys,
                frames,
            } => {
                let execution = Execution {
                    conn: &conn,
                    placeholders,
                    returning_keys,
                    frames: &frames,
                };
                match execution.run(&sql, &bind_sets) {
                    Ok(()) => {}
                    Err(Stop::Cancelled) => debug!("result stream dropped, execution stopped"),
                    Err(Stop::Failed(err)) => {
                        let _ = frames.blocking_send(Err(err));
                    }
                }
            }
            Request::Control { command, reply } => {
                let result = conn.execute_batch(&command.sql()).map_err(map_error);
                let _ = reply.send(result);
            }
            Request::Close { reply } => {
                let result = conn.close().map_err(|(_, e)| map_error(e));
                if let Err(err) = &result {
                    warn!(error = %err, "closing SQLite connection failed");
                }
                let _ = reply.send(result);
                return;
            }
        }
    }
    debug!("SQLite connection dropped without close");
}

/// Why an execution ended early.
enum Stop {
    /// The consumer dropped the result stream.
    Cancelled,
    Failed(Error),
}

impl From<rusqlite::Error> for Stop {
    fn from(err: rusqlite::Error) -> Self {
        Stop::Failed(map_error(err))
    }
}

struct Execution<'a> {
    conn: &'a Connection,
    placeholders: PlaceholderScheme,
    returning_keys: bool,
    frames: &'a mpsc::Sender<Result<Frame>>,
}

impl Execution<'_> {
    fn run(&self, sql: &str, bind_sets: &[BindSet]) -> std::result::Result<(), Stop> {
        let unbound = [BindSet::new()];
        let bind_sets = if bind_sets.is_empty() { &unbound[..] } else { bind_sets };

        // Plain `?` markers are numbered across the whole text.
        let mut offset = 0;
        for statement in split_statements(sql) {
            let text = if self.returning_keys {
                with_returning(statement)
            } else {
                statement.to_string()
            };
            let mut stmt = self.conn.prepare(&text)?;
            for bind_set in bind_sets {
                self.bind(&mut stmt, bind_set, offset)?;
                self.step(&mut stmt)?;
            }
            offset += stmt.parameter_count();
        }
        Ok(())
    }

    /// Bind the values of `bind_set` that belong to this statement.
    ///
    /// `offset` is the number of positional markers in the statements that
    /// precede it in the same text. Values for parameters the statement does
    /// not declare are skipped; the session validated them against the text.
    fn bind(
        &self,
        stmt: &mut Statement<'_>,
        bind_set: &BindSet,
        offset: usize,
    ) -> std::result::Result<(), Stop> {
        stmt.clear_bindings();
        let declared = stmt.parameter_count();
        for (index, value) in bind_set.iter() {
            let position = match self.placeholders {
                PlaceholderScheme::Positional => index
                    .checked_sub(offset)
                    .filter(|local| *local < declared)
                    .map(|local| local + 1),
                PlaceholderScheme::Numbered | PlaceholderScheme::Dollar => {
                    stmt.parameter_index(&self.placeholders.placeholder(index))?
                }
            };
            if let Some(position) = position {
                stmt.raw_bind_parameter(position, to_sql_value(value))?;
            }
        }
        Ok(())
    }

    /// Run one bound execution and send its frames.
    fn step(&self, stmt: &mut Statement<'_>) -> std::result::Result<(), Stop> {
        let before = self.total_changes()?;
        let column_count = stmt.column_count();
        if column_count == 0 {
            stmt.raw_execute()?;
            let rows_updated = self.changes_since(before)?;
            return self.send(Frame::Complete {
                rows_updated: Some(rows_updated),
            });
        }

        let metadata = RowMetadata::new(
            stmt.columns()
                .iter()
                .map(|column| ColumnMetadata {
                    name: column.name().to_string(),
                    declared_type: column.decl_type().map(str::to_string),
                })
                .collect(),
        );
        self.send(Frame::Columns(Arc::new(metadata)))?;

        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let values = (0..column_count)
                .map(|i| row.get_ref(i).map(from_value_ref))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            self.send(Frame::Row(values))?;
        }
        drop(rows);

        let rows_updated = if self.returning_keys || !stmt.readonly() {
            Some(self.changes_since(before)?)
        } else {
            None
        };
        self.send(Frame::Complete { rows_updated })
    }

    fn total_changes(&self) -> rusqlite::Result<i64> {
        self.conn
            .prepare_cached("SELECT total_changes()")?
            .query_row([], |row| row.get(0))
    }

    /// Rows changed by the statement that just ran.
    ///
    /// `changes()` keeps the count of the last INSERT, UPDATE or DELETE, so
    /// a statement that changed nothing (DDL, a SELECT) would report a stale
    /// count. `before` is `total_changes()` taken before the statement ran.
    fn changes_since(&self, before: i64) -> rusqlite::Result<u64> {
        if self.total_changes()? == before {
            Ok(0)
        } else {
            Ok(self.conn.changes())
        }
    }

    fn send(&self, frame: Frame) -> std::result::Result<(), Stop> {
        self.frames
            .blocking_send(Ok(frame))
            .map_err(|_| Stop::Cancelled)
    }
}

/// Make an INSERT report the rows it created.
fn with_returning(statement: &str) -> String {
    let is_insert = matches!(leading_keyword(statement).as_deref(), Some("INSERT" | "REPLACE"));
    if is_insert && !contains_keyword(statement, "RETURNING") {
        format!("{} RETURNING *", statement)
    } else {
        statement.to_string()
    }
}
