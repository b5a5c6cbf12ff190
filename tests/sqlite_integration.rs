//! End-to-end session tests against SQLite.
//!
//! Each test gets a fresh database file. A plain synchronous `rusqlite`
//! connection on the same file seeds data and verifies what was committed.

use futures::future;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use sql_session::{
    Error, Handle, Mutability, PlaceholderScheme, Result, SessionFactory, SqlResult,
    SqliteConnectionFactory, SqliteOptions, SqliteTarget,
};

/// What one step of a scenario produced.
#[derive(Debug, PartialEq)]
enum Step {
    Values(Vec<i64>),
    Count(u64),
    Done,
}

struct TestDb {
    _dir: TempDir,
    oracle: rusqlite::Connection,
    sessions: SessionFactory,
}

impl TestDb {
    fn with_options(options: SqliteOptions) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.db");
        let oracle = rusqlite::Connection::open(&path).unwrap();
        oracle
            .execute("CREATE TABLE test ( value INTEGER )", [])
            .unwrap();
        let sessions = SessionFactory::new(SqliteConnectionFactory::new(
            SqliteTarget::File(path),
            options,
        ));
        Self {
            _dir: dir,
            oracle,
            sessions,
        }
    }

    fn execute(&self, sql: &str) {
        self.oracle.execute(sql, []).unwrap();
    }

    fn committed_values(&self) -> Vec<i64> {
        let mut stmt = self
            .oracle
            .prepare("SELECT value FROM test ORDER BY rowid")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<i64>>>()
            .unwrap()
    }
}

#[fixture]
fn db() -> TestDb {
    TestDb::with_options(SqliteOptions::default())
}

fn values(result: SqlResult) -> impl Stream<Item = Result<Step>> + Send {
    stream::once(async move {
        result
            .map(|row, _| row.get::<i64>("value"))
            .try_collect::<Vec<i64>>()
            .await
            .map(Step::Values)
    })
}

fn ids(result: SqlResult) -> impl Stream<Item = Result<Vec<i64>>> + Send {
    stream::once(async move {
        result
            .map(|row, _| row.get::<i64>("id"))
            .try_collect::<Vec<i64>>()
            .await
    })
}

fn select_values(handle: &Handle) -> impl Stream<Item = Result<Step>> + Send + use<> {
    handle.select("SELECT value FROM test").map_result(values)
}

fn insert(handle: &Handle, value: i64) -> impl Stream<Item = Result<Step>> + Send + use<> {
    handle
        .execute("INSERT INTO test VALUES (?1)", sql_session::params![value])
        .map_ok(Step::Count)
}

fn create_savepoint(
    handle: &Handle,
    name: &'static str,
) -> impl Stream<Item = Result<Step>> + Send + use<> {
    let handle = handle.clone();
    stream::once(async move { handle.create_savepoint(name).await.map(|_| Step::Done) })
}

fn rollback_to(
    handle: &Handle,
    name: &'static str,
) -> impl Stream<Item = Result<Step>> + Send + use<> {
    let handle = handle.clone();
    stream::once(async move {
        handle
            .rollback_transaction_to_savepoint(name)
            .await
            .map(|_| Step::Done)
    })
}

fn read_only(handle: &Handle) -> impl Stream<Item = Result<Step>> + Send + use<> {
    let handle = handle.clone();
    stream::once(async move {
        handle
            .set_transaction_mutability(Mutability::ReadOnly)
            .await
            .map(|_| Step::Done)
    })
}

fn boom() -> Error {
    Error::Database {
        code: None,
        message: "body failed".to_string(),
    }
}

#[rstest]
#[tokio::test]
async fn batch_yields_one_result_per_statement(db: TestDb) {
    db.execute("INSERT INTO test VALUES (100)");

    let results: Vec<Step> = db
        .sessions
        .with_handle(|h| {
            h.create_batch()
                .add("INSERT INTO test VALUES(200)")
                .add("SELECT value FROM test")
                .map_result(|result| {
                    stream::once(async move { result.rows_updated().await.map(Step::Count) })
                })
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results, vec![Step::Count(1), Step::Count(0)]);
    assert_eq!(db.committed_values(), vec![100, 200]);
}

#[rstest]
#[tokio::test]
async fn compound_statement_yields_result_per_statement(db: TestDb) {
    db.execute("INSERT INTO test VALUES (100)");

    let results: Vec<Step> = db
        .sessions
        .with_handle(|h| {
            h.create_query("SELECT value FROM test; SELECT value FROM test")
                .map_result(values)
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![Step::Values(vec![100]), Step::Values(vec![100])]
    );
}

#[rstest]
#[tokio::test]
async fn connection_mutability_rejects_insert(db: TestDb) {
    let result = db
        .sessions
        .use_handle(|h| read_only(&h).chain(insert(&h, 200)))
        .await;

    assert!(matches!(result, Err(Error::MutabilityViolation { .. })));
    assert!(result.unwrap_err().is_database_error());
    assert!(db.committed_values().is_empty());
}

#[rstest]
#[tokio::test]
async fn generated_keys_per_insertion(db: TestDb) {
    db.execute("CREATE TABLE test2 (id INTEGER PRIMARY KEY AUTOINCREMENT, value INTEGER)");

    let keys: Vec<Vec<i64>> = db
        .sessions
        .with_handle(|h| {
            let update = h
                .create_update("INSERT INTO test2(value) VALUES (?1)")
                .bind(0, 100)
                .and_then(|u| u.add())
                .and_then(|u| u.bind(0, 200))
                .and_then(|u| u.add());
            match update {
                Ok(update) => update
                    .execute_returning_generated_keys()
                    .map_ok(ids)
                    .try_flatten()
                    .boxed(),
                Err(err) => stream::once(future::ready(Err(err))).boxed(),
            }
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(keys, vec![vec![1], vec![2]]);
}

#[rstest]
#[tokio::test]
async fn prepared_statement_yields_count_per_bind_set(db: TestDb) {
    let counts: Vec<u64> = db
        .sessions
        .with_handle(|h| {
            let mut update = Ok(h.create_update("INSERT INTO test VALUES(?1)"));
            for i in 0..10 {
                update = update.and_then(|u| u.bind(0, i)).and_then(|u| u.add());
            }
            match update {
                Ok(update) => update.execute().boxed(),
                Err(err) => stream::once(future::ready(Err(err))).boxed(),
            }
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(counts, vec![1; 10]);
    assert_eq!(db.committed_values(), (0..10).collect::<Vec<i64>>());
}

#[rstest]
#[tokio::test]
async fn savepoint_rollback_discards_later_work(db: TestDb) {
    db.execute("INSERT INTO test VALUES (100)");

    let steps: Vec<Step> = db
        .sessions
        .with_handle(|h| {
            h.in_transaction(|h1| {
                select_values(&h1)
                    .chain(insert(&h1, 200))
                    .chain(select_values(&h1))
                    .chain(create_savepoint(&h1, "test_savepoint"))
                    .chain(insert(&h1, 300))
                    .chain(select_values(&h1))
                    .chain(rollback_to(&h1, "test_savepoint"))
                    .chain(select_values(&h1))
            })
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(
        steps,
        vec![
            Step::Values(vec![100]),
            Step::Count(1),
            Step::Values(vec![100, 200]),
            Step::Done,
            Step::Count(1),
            Step::Values(vec![100, 200, 300]),
            Step::Done,
            Step::Values(vec![100, 200]),
        ]
    );
    assert_eq!(db.committed_values(), vec![100, 200]);
}

#[rstest]
#[tokio::test]
async fn savepoint_without_rollback_keeps_work(db: TestDb) {
    db.execute("INSERT INTO test VALUES (100)");

    let steps: Vec<Step> = db
        .sessions
        .in_transaction(|h| {
            create_savepoint(&h, "test_savepoint")
                .chain(insert(&h, 200))
                .chain(select_values(&h))
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(steps.last(), Some(&Step::Values(vec![100, 200])));
    assert_eq!(db.committed_values(), vec![100, 200]);
}

#[rstest]
#[tokio::test]
async fn transaction_commit_is_visible_to_outer_handle(db: TestDb) {
    db.execute("INSERT INTO test VALUES (100)");

    let steps: Vec<Step> = db
        .sessions
        .with_handle(|h| {
            h.in_transaction(|h1| {
                select_values(&h1)
                    .chain(insert(&h1, 200))
                    .chain(select_values(&h1))
            })
            .chain(select_values(&h))
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(
        steps,
        vec![
            Step::Values(vec![100]),
            Step::Count(1),
            Step::Values(vec![100, 200]),
            Step::Values(vec![100, 200]),
        ]
    );
    assert_eq!(db.committed_values(), vec![100, 200]);
}

#[rstest]
#[tokio::test]
async fn transaction_mutability_rejects_insert(db: TestDb) {
    let result: Result<Vec<Step>> = db
        .sessions
        .in_transaction(|h| read_only(&h).chain(insert(&h, 200)))
        .try_collect()
        .await;

    assert!(matches!(result, Err(Error::MutabilityViolation { .. })));
    assert!(db.committed_values().is_empty());
}

#[rstest]
#[tokio::test]
async fn transaction_rollback_restores_pre_transaction_state(db: TestDb) {
    db.execute("INSERT INTO test VALUES (100)");

    let handle = db.sessions.open().await.unwrap();
    let mut steps = Vec::new();
    let mut failure = None;
    {
        let mut txn = Box::pin(handle.in_transaction(|h1| {
            select_values(&h1)
                .chain(insert(&h1, 200))
                .chain(select_values(&h1))
                .chain(stream::once(future::ready(Err(boom()))))
        }));
        while let Some(item) = txn.next().await {
            match item {
                Ok(step) => steps.push(step),
                Err(err) => failure = Some(err),
            }
        }
    }
    let after: Vec<Step> = select_values(&handle).try_collect().await.unwrap();
    handle.close().await.unwrap();

    assert!(matches!(failure, Some(Error::Database { .. })));
    assert_eq!(
        steps,
        vec![
            Step::Values(vec![100]),
            Step::Count(1),
            Step::Values(vec![100, 200]),
        ]
    );
    assert_eq!(after, vec![Step::Values(vec![100])]);
    assert_eq!(db.committed_values(), vec![100]);
}

#[rstest]
#[tokio::test]
async fn nested_transaction_commits_with_outer(db: TestDb) {
    let _: Vec<Step> = db
        .sessions
        .in_transaction(|h| {
            insert(&h, 100).chain(h.in_transaction(|h2| {
                assert_eq!(h2.transaction_depth(), 2);
                insert(&h2, 200)
            }))
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(db.committed_values(), vec![100, 200]);
}

#[rstest]
#[tokio::test]
async fn nested_transaction_failure_rolls_back_only_inner_level(db: TestDb) {
    let steps: Vec<Step> = db
        .sessions
        .in_transaction(|h| {
            let inner = h.in_transaction(|h2| {
                insert(&h2, 200).chain(stream::once(future::ready(Err(boom()))))
            });
            let recovered = stream::once(async move {
                let outcome: Result<Vec<Step>> = inner.try_collect().await;
                assert!(outcome.is_err());
                Ok(Step::Done)
            });
            insert(&h, 100).chain(recovered).chain(insert(&h, 300))
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(steps, vec![Step::Count(1), Step::Done, Step::Count(1)]);
    assert_eq!(db.committed_values(), vec![100, 300]);
}

#[rstest]
#[tokio::test]
async fn result_rows_cannot_be_consumed_twice(db: TestDb) {
    db.execute("INSERT INTO test VALUES (100)");

    let outcomes: Vec<bool> = db
        .sessions
        .with_handle(|h| {
            h.select("SELECT value FROM test").map_result(|result| {
                stream::once(async move {
                    let first: Vec<i64> =
                        result.map(|row, _| row.get::<i64>(0)).try_collect().await?;
                    let second: Result<Vec<i64>> =
                        result.map(|row, _| row.get::<i64>(0)).try_collect().await;
                    Ok::<bool, Error>(
                        first == vec![100] && matches!(second, Err(Error::AlreadyConsumed)),
                    )
                })
            })
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(outcomes, vec![true]);
}

#[rstest]
#[tokio::test]
async fn dollar_placeholders_bind_by_name() {
    let db = TestDb::with_options(SqliteOptions {
        placeholders: PlaceholderScheme::Dollar,
        ..SqliteOptions::default()
    });

    let counts: Vec<u64> = db
        .sessions
        .with_handle(|h| match h.create_update("INSERT INTO test VALUES ($1)").bind("$1", 7) {
            Ok(update) => update.execute().boxed(),
            Err(err) => stream::once(future::ready(Err(err))).boxed(),
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(counts, vec![1]);
    assert_eq!(db.committed_values(), vec![7]);
}

#[rstest]
#[tokio::test]
async fn small_fetch_size_streams_every_row() {
    let db = TestDb::with_options(SqliteOptions {
        fetch_size: 1,
        ..SqliteOptions::default()
    });
    for i in 0..50 {
        db.execute(&format!("INSERT INTO test VALUES ({})", i));
    }

    let steps: Vec<Step> = db
        .sessions
        .with_handle(|h| select_values(&h))
        .try_collect()
        .await
        .unwrap();

    assert_eq!(steps, vec![Step::Values((0..50).collect())]);
}

#[rstest]
#[tokio::test]
async fn engine_error_surfaces_and_releases(db: TestDb) {
    let result: Result<Vec<u64>> = db
        .sessions
        .with_handle(|h| h.execute("INSERT INTO missing VALUES (1)", vec![]))
        .try_collect()
        .await;

    match result {
        Err(Error::Database { message, .. }) => assert!(message.contains("missing")),
        other => panic!("expected database error, got {:?}", other),
    }

    let steps: Vec<Step> = db
        .sessions
        .with_handle(|h| insert(&h, 1))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(steps, vec![Step::Count(1)]);
}

#[rstest]
#[tokio::test]
async fn bound_compound_query_binds_each_statement(db: TestDb) {
    let steps: Vec<Step> = db
        .sessions
        .with_handle(|h| {
            match h
                .create_query("INSERT INTO test VALUES (?1); SELECT value FROM test")
                .bind(0usize, 5)
            {
                Ok(query) => query.map_result(values).boxed(),
                Err(err) => stream::once(future::ready(Err(err))).boxed(),
            }
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(steps.last(), Some(&Step::Values(vec![5])));
    assert_eq!(db.committed_values(), vec![5]);
}

#[rstest]
#[tokio::test]
async fn batch_ddl_reports_no_rows_updated(db: TestDb) {
    let counts: Vec<u64> = db
        .sessions
        .with_handle(|h| {
            h.create_batch()
                .add("INSERT INTO test SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 3")
                .add("CREATE TABLE other (a INTEGER)")
                .execute()
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(counts, vec![3, 0]);
}

#[rstest]
#[tokio::test]
async fn update_with_returning_clause_reports_count(db: TestDb) {
    db.execute("CREATE TABLE test2 (id INTEGER PRIMARY KEY AUTOINCREMENT, value INTEGER)");

    let counts: Vec<u64> = db
        .sessions
        .with_handle(|h| {
            h.create_update("INSERT INTO test2(value) VALUES (100) RETURNING id")
                .execute()
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(counts, vec![1]);
}

#[rstest]
#[tokio::test]
async fn nested_level_rolls_back_to_enclosing_savepoint(db: TestDb) {
    let steps: Vec<Step> = db
        .sessions
        .in_transaction(|h| {
            let inner = h.in_transaction(|h2| {
                insert(&h2, 200)
                    .chain(rollback_to(&h2, "outer_sp"))
                    .chain(select_values(&h2))
            });
            insert(&h, 100)
                .chain(create_savepoint(&h, "outer_sp"))
                .chain(inner)
                .chain(insert(&h, 300))
                .chain(select_values(&h))
        })
        .try_collect()
        .await
        .unwrap();

    assert_eq!(
        steps,
        vec![
            Step::Count(1),
            Step::Done,
            Step::Count(1),
            Step::Done,
            Step::Values(vec![100]),
            Step::Count(1),
            Step::Values(vec![100, 300]),
        ]
    );
    assert_eq!(db.committed_values(), vec![100, 300]);
}
