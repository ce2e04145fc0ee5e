//! Shared helpers for resource pool integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlpool_resource::{Manage, PoolConfig, ResourcePool, Stat};
use tokio::sync::Semaphore;

/// Counts constructor and destructor calls; construction can be gated.
pub struct Tracker {
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub fail_next: AtomicBool,
    gate: Semaphore,
}

impl Tracker {
    pub fn new() -> Arc<Self> {
        Self::with_gate(Semaphore::MAX_PERMITS)
    }

    /// Constructions block until [`Tracker::open_gate`] is called.
    pub fn gated() -> Arc<Self> {
        Self::with_gate(0)
    }

    fn with_gate(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            fail_next: AtomicBool::new(false),
            gate: Semaphore::new(permits),
        })
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1024);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct TrackingManager(pub Arc<Tracker>);

#[async_trait]
impl Manage for TrackingManager {
    type Resource = u64;
    type Error = std::io::Error;

    async fn create(&self) -> Result<u64, std::io::Error> {
        let _permit = self
            .0
            .gate
            .acquire()
            .await
            .map_err(|_| std::io::Error::other("gate closed"))?;

        if self.0.fail_next.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::other("connection refused"));
        }
        Ok(self.0.created.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn destroy(&self, _resource: u64) {
        self.0.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn pool(max_size: usize) -> (ResourcePool<TrackingManager>, Arc<Tracker>) {
    pool_with(max_size, Tracker::new())
}

pub fn pool_with(
    max_size: usize,
    tracker: Arc<Tracker>,
) -> (ResourcePool<TrackingManager>, Arc<Tracker>) {
    let pool = ResourcePool::new(
        TrackingManager(Arc::clone(&tracker)),
        PoolConfig::new().max_size(max_size),
    )
    .expect("valid config");
    (pool, tracker)
}

/// Poll the pool's stat until `cond` holds, failing after a few seconds.
pub async fn wait_for_stat<F>(pool: &ResourcePool<TrackingManager>, cond: F) -> Stat
where
    F: Fn(&Stat) -> bool,
{
    let wait = async {
        loop {
            let stat = pool.stat();
            if cond(&stat) {
                return stat;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("pool never reached the expected state")
}
