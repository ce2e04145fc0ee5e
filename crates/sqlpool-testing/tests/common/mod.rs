//! Shared helpers for end-to-end pool tests.

#![allow(dead_code)]

use std::time::Duration;

use sqlpool::{Pool, PoolBuilder, Stat};
use sqlpool_testing::MockDriver;

pub const TARGET: &str = "mock://localhost/test";

/// Install a test-friendly subscriber; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A connected pool of `max` connections over a fresh mock driver.
pub async fn pool(max: u32) -> (Pool<MockDriver>, MockDriver) {
    init_tracing();
    let driver = MockDriver::new();
    let pool = PoolBuilder::new()
        .max_connections(max)
        .build(driver.clone(), TARGET)
        .await
        .expect("mock pool connects");
    (pool, driver)
}

/// Close the pool and check that every connection it opened was closed
/// exactly once and never misused.
pub async fn close_and_check(pool: &Pool<MockDriver>, driver: &MockDriver) {
    tokio::time::timeout(Duration::from_secs(5), pool.close())
        .await
        .expect("close should not hang; a connection was never returned");

    let stat = pool.stat();
    assert_eq!((stat.live, stat.idle, stat.acquired), (0, 0, 0));

    let stats = driver.stats();
    assert_eq!(stats.connects, stats.closes, "connections opened vs closed");
    assert_eq!(stats.misuse, 0, "connection reused in an invalid state");
}

/// Poll the pool's stat until `cond` holds, failing after a few seconds.
pub async fn wait_for_stat<F>(pool: &Pool<MockDriver>, cond: F) -> Stat
where
    F: Fn(&Stat) -> bool,
{
    let wait = async {
        loop {
            let stat = pool.stat();
            if cond(&stat) {
                return stat;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("pool never reached the expected state")
}
