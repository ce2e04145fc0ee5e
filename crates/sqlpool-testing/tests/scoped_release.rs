//! Cursors, single-row results and transactions return their connection
//! exactly once, on success, on failure and on explicit close.
//!
//! Every test ends with `close_and_check`, which fails if a connection was
//! leaked (close would hang), closed twice, or reused in an invalid state.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{close_and_check, pool, wait_for_stat};
use futures_util::TryStreamExt;
use sqlpool::{CancellationToken, Error, SqlValue};
use sqlpool_testing::{MockDriver, MockOp, MockRow};

const SELECT_N: &str = "SELECT n FROM numbers ORDER BY n";

fn numbers(driver: &MockDriver) -> Vec<MockRow> {
    let rows: Vec<MockRow> = (1..=3).map(|n| vec![SqlValue::Int(n)]).collect();
    driver.rows(SELECT_N, rows.clone());
    rows
}

// =============================================================================
// Cursors
// =============================================================================

#[tokio::test]
async fn test_cursor_releases_when_exhausted() {
    let (pool, driver) = pool(1).await;
    let expected = numbers(&driver);

    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    assert!(rows.is_open());
    assert_eq!(pool.stat().acquired, 1);

    let mut seen = Vec::new();
    while let Some(row) = rows.next().await.unwrap() {
        seen.push(row);
    }
    assert_eq!(seen, expected);
    assert!(!rows.is_open());

    let stat = pool.stat();
    assert_eq!((stat.idle, stat.acquired), (1, 0));

    // Reads and closes after the end are no-ops.
    assert!(rows.next().await.unwrap().is_none());
    rows.close().await.unwrap();
    rows.close().await.unwrap();
    assert_eq!(pool.stat().idle, 1);

    drop(rows);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_cursor_close_drains_and_releases() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    assert_eq!(rows.next().await.unwrap(), Some(vec![SqlValue::Int(1)]));

    rows.close().await.unwrap();
    assert!(driver.log().contains(&"1: FINISH".to_owned()));
    assert_eq!(pool.stat().idle, 1);

    rows.close().await.unwrap();
    assert!(rows.next().await.unwrap().is_none());

    // The connection is clean for the next query.
    let again = pool.query_rows(SELECT_N, &[]).await.collect().await.unwrap();
    assert_eq!(again.len(), 3);
    assert_eq!(driver.stats().connects, 1);

    drop(rows);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_cursor_read_failure_releases_and_repeats_error() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    rows.next().await.unwrap();

    driver.fail_next(MockOp::NextRow);
    let err = rows.next().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    let stat = pool.stat();
    assert_eq!((stat.live, stat.idle, stat.acquired), (1, 1, 0));

    let again = rows.next().await.unwrap_err();
    assert_eq!(again.to_string(), err.to_string());
    assert_eq!(rows.err().map(ToString::to_string), Some(err.to_string()));
    rows.close().await.unwrap();
    assert_eq!(pool.stat().idle, 1);

    drop(rows);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_cursor_fatal_read_failure_destroys_connection() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    driver.break_next(MockOp::NextRow);
    assert!(rows.next().await.is_err());

    wait_for_stat(&pool, |s| s.live == 0).await;
    assert_eq!(driver.stats().closes, 1);

    drop(rows);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_query_failure_releases_immediately() {
    let (pool, driver) = pool(1).await;
    driver.fail_next(MockOp::Query);

    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    assert!(!rows.is_open());
    assert!(matches!(rows.err(), Some(Error::Protocol(_))));

    let stat = pool.stat();
    assert_eq!((stat.idle, stat.acquired), (1, 0));

    assert!(rows.next().await.is_err());
    rows.close().await.unwrap();
    assert_eq!(pool.stat().idle, 1);

    drop(rows);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_cursor_on_closed_pool_carries_error_without_touching_pool() {
    let (pool, driver) = pool(1).await;
    pool.close().await;
    let before = pool.stat();

    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    assert!(rows.next().await.unwrap_err().is_closed());
    assert!(rows.next().await.unwrap_err().is_closed());
    rows.close().await.unwrap();
    drop(rows);

    assert_eq!(pool.stat(), before);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_cursor_on_failed_connect_carries_connect_error() {
    let (pool, driver) = pool(2).await;
    let held = pool.acquire(&CancellationToken::new()).await.unwrap();
    let before = pool.stat();

    driver.fail_next(MockOp::Connect);
    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    let err = rows.next().await.unwrap_err();
    assert_eq!(err.to_string(), "connection failed: injected Connect failure");

    let after = pool.stat();
    assert_eq!(
        (after.live, after.idle, after.acquired),
        (before.live, before.idle, before.acquired)
    );

    held.release();
    drop(rows);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_dropped_open_cursor_closes_its_connection() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    let mut rows = pool.query_rows(SELECT_N, &[]).await;
    rows.next().await.unwrap();
    drop(rows);

    wait_for_stat(&pool, |s| s.live == 0).await;
    assert_eq!(driver.stats().closes, 1);

    // A fresh connection takes its place.
    let all = pool.query_rows(SELECT_N, &[]).await.collect().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(driver.stats().connects, 2);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_cursor_as_stream() {
    let (pool, driver) = pool(1).await;
    let expected = numbers(&driver);

    let rows: Vec<MockRow> = pool
        .query_rows(SELECT_N, &[])
        .await
        .into_stream()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows, expected);
    assert_eq!(pool.stat().idle, 1);

    close_and_check(&pool, &driver).await;
}

// =============================================================================
// Single-row results
// =============================================================================

#[tokio::test]
async fn test_query_row_reads_first_row_and_releases() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    let row = pool.query_row(SELECT_N, &[]).await;
    assert!(row.err().is_none());
    assert_eq!(pool.stat().acquired, 1);

    assert_eq!(row.get().await.unwrap(), vec![SqlValue::Int(1)]);
    let stat = pool.stat();
    assert_eq!((stat.idle, stat.acquired), (1, 0));
    assert!(driver.log().contains(&"1: FINISH".to_owned()));

    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_query_row_without_rows() {
    let (pool, driver) = pool(1).await;

    let err = pool
        .query_row("SELECT * FROM users WHERE id = $1", &[42.into()])
        .await
        .get()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoRows));
    assert_eq!(pool.stat().idle, 1);

    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_query_row_failures_release() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    driver.fail_next(MockOp::Query);
    let row = pool.query_row(SELECT_N, &[]).await;
    assert!(row.err().is_some());
    assert_eq!(pool.stat().acquired, 0);
    assert!(matches!(row.get().await, Err(Error::Protocol(_))));

    driver.fail_next(MockOp::NextRow);
    let err = pool.query_row(SELECT_N, &[]).await.get().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(pool.stat().idle, 1);

    driver.fail_next(MockOp::FinishQuery);
    assert!(pool.query_row(SELECT_N, &[]).await.get().await.is_err());
    assert_eq!(pool.stat().idle, 1);

    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_query_row_on_closed_pool() {
    let (pool, driver) = pool(1).await;
    pool.close().await;

    let row = pool.query_row(SELECT_N, &[]).await;
    assert!(row.err().is_some_and(Error::is_closed));
    assert!(row.get().await.unwrap_err().is_closed());
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_unread_row_closes_its_connection() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    drop(pool.query_row(SELECT_N, &[]).await);
    wait_for_stat(&pool, |s| s.live == 0).await;
    assert_eq!(driver.stats().closes, 1);

    close_and_check(&pool, &driver).await;
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_commit_releases() {
    let (pool, driver) = pool(1).await;
    driver.command_tag("INSERT INTO users (name) VALUES ($1)", "INSERT 0 1");

    let mut tx = pool.begin_transaction().await.unwrap();
    assert_eq!(pool.stat().acquired, 1);
    let tag = tx
        .execute("INSERT INTO users (name) VALUES ($1)", &["alice".into()])
        .await
        .unwrap();
    assert_eq!(tag.rows_affected(), 1);
    tx.commit().await.unwrap();

    let stat = pool.stat();
    assert_eq!((stat.idle, stat.acquired), (1, 0));
    assert_eq!(
        driver.log(),
        vec![
            "1: CONNECT",
            "1: BEGIN",
            "1: EXECUTE INSERT INTO users (name) VALUES ($1)",
            "1: COMMIT",
        ]
    );
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_rollback_releases() {
    let (pool, driver) = pool(1).await;
    numbers(&driver);

    let mut tx = pool.begin_transaction().await.unwrap();
    assert_eq!(tx.query_row(SELECT_N, &[]).await.unwrap(), vec![SqlValue::Int(1)]);
    tx.rollback().await.unwrap();

    assert_eq!(pool.stat().idle, 1);
    assert!(driver.log().contains(&"1: ROLLBACK".to_owned()));
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_failed_commit_and_rollback_still_release() {
    let (pool, driver) = pool(1).await;

    driver.fail_next(MockOp::Commit);
    let tx = pool.begin_transaction().await.unwrap();
    assert!(matches!(tx.commit().await, Err(Error::Protocol(_))));
    assert_eq!(pool.stat().idle, 1);

    driver.fail_next(MockOp::Rollback);
    let tx = pool.begin_transaction().await.unwrap();
    assert!(tx.rollback().await.is_err());
    assert_eq!(pool.stat().idle, 1);

    // Same connection throughout, never left inside a transaction.
    assert_eq!(driver.stats().connects, 1);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_failed_begin_releases() {
    let (pool, driver) = pool(1).await;
    driver.fail_next(MockOp::Begin);

    let err = pool.begin_transaction().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    let stat = pool.stat();
    assert_eq!((stat.idle, stat.acquired), (1, 0));

    // The connection is usable straight away.
    pool.begin_transaction().await.unwrap().commit().await.unwrap();
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_failed_statement_keeps_transaction_open() {
    let (pool, driver) = pool(1).await;
    driver.fail_next(MockOp::Execute);

    let mut tx = pool.begin_transaction().await.unwrap();
    assert!(tx.execute("UPDATE t SET x = 1", &[]).await.is_err());
    assert_eq!(pool.stat().acquired, 1);
    tx.rollback().await.unwrap();

    assert_eq!(pool.stat().idle, 1);
    close_and_check(&pool, &driver).await;
}

#[tokio::test]
async fn test_abandoned_transaction_closes_its_connection() {
    let (pool, driver) = pool(1).await;

    let tx = pool.begin_transaction().await.unwrap();
    drop(tx);
    wait_for_stat(&pool, |s| s.live == 0).await;
    assert_eq!(driver.stats().closes, 1);

    // The replacement connection starts outside any transaction.
    pool.begin_transaction().await.unwrap().commit().await.unwrap();
    assert_eq!(driver.stats().connects, 2);
    close_and_check(&pool, &driver).await;
}

// =============================================================================
// Everything at once
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_workload_balances_connects_and_closes() {
    let (pool, driver) = pool(3).await;
    numbers(&driver);

    let handles: Vec<_> = (0..24)
        .map(|i| {
            let pool = pool.clone();
            let driver = driver.clone();
            tokio::spawn(async move {
                match i % 6 {
                    // Statements may pick up a failure injected by another
                    // task, so their results are not checked here.
                    0 => {
                        let _ = pool.execute("UPDATE t SET x = 1", &[]).await;
                    }
                    1 => {
                        let rows = pool.query_rows(SELECT_N, &[]).await.collect().await;
                        assert_eq!(rows.unwrap().len(), 3);
                    }
                    2 => {
                        let mut rows = pool.query_rows(SELECT_N, &[]).await;
                        rows.next().await.unwrap();
                        rows.close().await.unwrap();
                    }
                    3 => {
                        pool.query_row(SELECT_N, &[]).await.get().await.unwrap();
                    }
                    4 => {
                        let mut tx = pool.begin_transaction().await.unwrap();
                        let _ = tx.execute("UPDATE t SET x = 2", &[]).await;
                        tx.commit().await.unwrap();
                    }
                    _ => {
                        driver.fail_next(MockOp::Execute);
                        let _ = pool.execute("UPDATE t SET x = 3", &[]).await;
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let stat = pool.stat();
    assert_eq!(stat.acquired, 0);
    assert!(stat.live <= 3);
    close_and_check(&pool, &driver).await;
}
