//! Resource lifecycle: the manager seam and per-resource metadata.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Creates and destroys the resources held by a pool.
///
/// The pool treats the resource as opaque. Both callbacks run outside the
/// pool lock, so a slow connect or disconnect never blocks unrelated
/// acquire/release traffic.
///
/// # Example
///
/// ```rust,ignore
/// struct Counter;
///
/// #[async_trait]
/// impl Manage for Counter {
///     type Resource = u64;
///     type Error = std::io::Error;
///
///     async fn create(&self) -> Result<u64, std::io::Error> {
///         Ok(42)
///     }
///
///     async fn destroy(&self, _resource: u64) {}
/// }
/// ```
#[async_trait]
pub trait Manage: Send + Sync + 'static {
    /// The pooled resource.
    type Resource: Send + 'static;

    /// Error returned when a resource cannot be created.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new resource.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Destroy a resource that is leaving the pool for good.
    async fn destroy(&self, resource: Self::Resource);

    /// Whether a released resource may be handed out again.
    ///
    /// Resources for which this returns `false` are destroyed on release
    /// instead of becoming idle.
    fn is_reusable(&self, _resource: &Self::Resource) -> bool {
        true
    }
}

/// Lifecycle state of a pooled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Owned by the pool, waiting to be acquired.
    Idle,
    /// Exclusively owned by one borrower.
    Acquired,
    /// Leaving the pool; the destructor is running or about to run.
    Destroying,
}

/// Bookkeeping the pool keeps for every live resource.
#[derive(Debug, Clone)]
pub struct ResourceMetadata {
    /// Unique identifier within the pool.
    pub id: u64,
    /// When the resource was constructed.
    pub created_at: Instant,
    /// When the resource was last handed to a borrower.
    pub last_acquired_at: Option<Instant>,
    /// When the resource was last returned to the idle set.
    pub last_released_at: Option<Instant>,
    /// Number of times the resource has been handed to a borrower.
    pub acquire_count: u64,
    /// Current lifecycle state.
    pub state: ResourceState,
}

impl ResourceMetadata {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_acquired_at: None,
            last_released_at: None,
            acquire_count: 0,
            state: ResourceState::Acquired,
        }
    }

    /// Time since the resource was constructed.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time the resource has spent idle, if it is idle.
    #[must_use]
    pub fn idle_time(&self) -> Option<Duration> {
        match self.state {
            ResourceState::Idle => self.last_released_at.map(|at| at.elapsed()),
            _ => None,
        }
    }

    pub(crate) fn mark_checked_out(&mut self) {
        self.last_acquired_at = Some(Instant::now());
        self.acquire_count += 1;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = ResourceState::Idle;
        self.last_released_at = Some(Instant::now());
    }
}
