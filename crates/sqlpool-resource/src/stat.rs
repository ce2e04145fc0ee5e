//! Point-in-time pool statistics.

use std::time::Duration;

/// Snapshot of pool counts and cumulative metrics.
///
/// All fields are read under the pool lock, so the counts are mutually
/// consistent at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Maximum number of live resources.
    pub capacity: usize,
    /// Resources currently constructed (idle + acquired + being destroyed).
    pub live: usize,
    /// Resources idle in the pool.
    pub idle: usize,
    /// Resources held by borrowers.
    pub acquired: usize,
    /// Constructions currently in flight.
    pub constructing: usize,
    /// Resources whose destructor has not finished yet.
    pub destroying: usize,
    /// Callers currently blocked waiting for a resource.
    pub waiting: usize,
    /// Successful acquires since the pool was created.
    pub acquire_count: u64,
    /// Total time spent in successful acquires.
    pub acquire_duration: Duration,
    /// Successful acquires that had to construct or wait.
    pub empty_acquire_count: u64,
    /// Acquires that ended because the caller cancelled.
    pub cancelled_acquire_count: u64,
    /// Resources constructed since the pool was created.
    pub created_count: u64,
    /// Resources destroyed since the pool was created.
    pub destroyed_count: u64,
    /// Constructor failures since the pool was created.
    pub construct_failed_count: u64,
}

impl Stat {
    /// Percentage of capacity currently acquired.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.acquired as f64 / self.capacity as f64) * 100.0
    }

    /// Check if the pool cannot construct any more resources.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.live + self.constructing >= self.capacity
    }

    /// Mean duration of a successful acquire.
    #[must_use]
    pub fn average_acquire_duration(&self) -> Duration {
        if self.acquire_count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.acquire_duration.as_nanos() / u128::from(self.acquire_count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Cumulative counters, stored beside the pool state under the same lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) acquire_count: u64,
    pub(crate) acquire_duration: Duration,
    pub(crate) empty_acquire_count: u64,
    pub(crate) cancelled_acquire_count: u64,
    pub(crate) created_count: u64,
    pub(crate) destroyed_count: u64,
    pub(crate) construct_failed_count: u64,
}
