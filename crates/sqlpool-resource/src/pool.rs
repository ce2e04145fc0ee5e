//! Resource pool implementation.
//!
//! All pool state lives behind one mutex that is only held for O(1)
//! bookkeeping. Constructors and destructors run outside the lock.
//!
//! Blocked callers are queued FIFO. A released resource (or a construction
//! slot freed by a failed construction or a destroyed resource) is handed
//! directly to the longest waiter over a oneshot channel, so an idle
//! resource never passes a queued caller.
//!
//! Everything in flight is owned by a guard: [`Resource`] releases on drop,
//! `SlotPermit` gives back its construction slot on drop, and
//! `DestroyGuard` retires a live slot once the destructor finishes. A grant
//! that is dropped undelivered (cancelled waiter, dropped future) therefore
//! goes back to the pool instead of leaking.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{Manage, ResourceMetadata, ResourceState};
use crate::stat::{Counters, Stat};

type AcquireResult<M> = Result<Resource<M>, PoolError<<M as Manage>::Error>>;

/// A bounded pool of resources created on demand by a [`Manage`]
/// implementation.
///
/// The pool grows up to its capacity and never shrinks while open. When the
/// pool is at capacity and nothing is idle, [`acquire`](Self::acquire)
/// blocks until a resource is released.
///
/// Cloning is cheap; clones share the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use sqlpool_resource::{PoolConfig, ResourcePool};
/// use tokio_util::sync::CancellationToken;
///
/// let pool = ResourcePool::new(manager, PoolConfig::new().max_size(4))?;
///
/// let resource = pool.acquire(&CancellationToken::new()).await?;
/// // Use resource...
/// resource.release();
///
/// pool.close().await;
/// ```
pub struct ResourcePool<M: Manage> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: Manage> {
    manager: M,

    /// Maximum number of live resources.
    capacity: usize,

    state: Mutex<PoolState<M>>,

    /// Signalled whenever a slot is retired after the pool is closed.
    drained: Notify,

    next_resource_id: AtomicU64,
}

struct PoolState<M: Manage> {
    /// Idle resources; the most recently released is reused first.
    idle: VecDeque<Entry<M::Resource>>,

    /// Blocked acquirers in arrival order.
    waiters: VecDeque<Waiter<M>>,

    /// Constructed resources: idle + acquired + destroying.
    live: usize,

    acquired: usize,

    /// Constructions in flight; each holds a reserved slot.
    constructing: usize,

    destroying: usize,

    closed: bool,

    next_waiter_id: u64,

    counters: Counters,
}

struct Entry<T> {
    value: T,
    meta: ResourceMetadata,
}

struct Waiter<M: Manage> {
    id: u64,
    tx: oneshot::Sender<Grant<M>>,
}

/// What a blocked acquirer can be woken with.
enum Grant<M: Manage> {
    /// A released resource, already marked acquired.
    Resource(Resource<M>),
    /// Permission to construct a new resource in a freed slot.
    Slot(SlotPermit<M>),
}

/// Outcome of the locked part of an acquire.
enum Step<M: Manage> {
    Closed,
    Ready(Resource<M>),
    Construct(SlotPermit<M>),
    Wait(u64, oneshot::Receiver<Grant<M>>),
}

impl<M: Manage> ResourcePool<M> {
    /// Create a new pool.
    ///
    /// No resources are created until the first acquire.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError<M::Error>> {
        config.validate::<M::Error>()?;

        let inner = Arc::new(PoolInner {
            manager,
            capacity: config.max_size,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.max_size),
                waiters: VecDeque::new(),
                live: 0,
                acquired: 0,
                constructing: 0,
                destroying: 0,
                closed: false,
                next_waiter_id: 0,
                counters: Counters::default(),
            }),
            drained: Notify::new(),
            next_resource_id: AtomicU64::new(1),
        });

        tracing::info!(capacity = config.max_size, "resource pool created");

        Ok(Self { inner })
    }

    /// Acquire a resource.
    ///
    /// Returns an idle resource if one exists, otherwise constructs one if
    /// the pool is below capacity, otherwise waits (FIFO) for a release.
    ///
    /// Fails with [`PoolError::PoolClosed`] once the pool is closed,
    /// [`PoolError::ConstructFailed`] if the constructor fails, and
    /// [`PoolError::Cancelled`] if `cancel` fires first. A construction
    /// that is in flight when `cancel` fires still completes; its resource
    /// becomes idle for the next caller.
    ///
    /// Dropping the returned future is equivalent to cancelling it.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn acquire(&self, cancel: &CancellationToken) -> AcquireResult<M> {
        let started = Instant::now();

        let (result, empty) = self.acquire_inner(cancel).await;
        self.inner.record_acquire(started, empty, &result);

        result.map(|mut resource| {
            resource.checked_out();
            tracing::trace!(
                resource_id = resource.id(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "resource acquired"
            );
            resource
        })
    }

    /// Acquire an idle resource without waiting or constructing.
    ///
    /// Returns `None` if no resource is immediately available.
    pub fn try_acquire(&self) -> Result<Option<Resource<M>>, PoolError<M::Error>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }

        let Some(mut entry) = state.idle.pop_back() else {
            return Ok(None);
        };
        entry.meta.state = ResourceState::Acquired;
        entry.meta.mark_checked_out();
        state.acquired += 1;
        state.counters.acquire_count += 1;
        drop(state);

        Ok(Some(Resource::new(entry, Arc::clone(&self.inner))))
    }

    /// Close the pool.
    ///
    /// All later acquires fail with [`PoolError::PoolClosed`], including
    /// callers that are currently waiting. Idle resources are destroyed
    /// immediately; this call then waits until every acquired resource has
    /// been released (and destroyed) and every in-flight construction has
    /// finished. Calling `close` again just waits for the same condition.
    pub async fn close(&self) {
        let (idle, waiters, first) = {
            let mut state = self.inner.state.lock();
            let first = !state.closed;
            state.closed = true;

            let waiters = std::mem::take(&mut state.waiters);
            let idle: Vec<_> = state
                .idle
                .drain(..)
                .map(|mut entry| {
                    entry.meta.state = ResourceState::Destroying;
                    entry
                })
                .collect();
            state.destroying += idle.len();

            (idle, waiters, first)
        };

        // Dropping the senders fails every waiter with `PoolClosed`.
        drop(waiters);

        if first {
            tracing::info!(idle = idle.len(), "closing resource pool");
        }

        join_all(idle.into_iter().map(|entry| self.inner.destroy(entry))).await;
        self.inner.wait_drained().await;

        if first {
            tracing::info!("resource pool closed");
        }
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get a consistent snapshot of the pool counts and metrics.
    #[must_use]
    pub fn stat(&self) -> Stat {
        let state = self.inner.state.lock();
        let counters = &state.counters;
        Stat {
            capacity: self.inner.capacity,
            live: state.live,
            idle: state.idle.len(),
            acquired: state.acquired,
            constructing: state.constructing,
            destroying: state.destroying,
            waiting: state.waiters.len(),
            acquire_count: counters.acquire_count,
            acquire_duration: counters.acquire_duration,
            empty_acquire_count: counters.empty_acquire_count,
            cancelled_acquire_count: counters.cancelled_acquire_count,
            created_count: counters.created_count,
            destroyed_count: counters.destroyed_count,
            construct_failed_count: counters.construct_failed_count,
        }
    }

    /// Maximum number of live resources.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Get the resource manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Returns `(result, empty)` where `empty` is true if the caller had to
    /// construct or wait.
    async fn acquire_inner(&self, cancel: &CancellationToken) -> (AcquireResult<M>, bool) {
        if self.inner.is_closed() {
            return (Err(PoolError::PoolClosed), false);
        }
        if cancel.is_cancelled() {
            return (Err(PoolError::Cancelled), false);
        }

        match self.inner.begin_acquire() {
            Step::Closed => (Err(PoolError::PoolClosed), false),
            Step::Ready(resource) => (Ok(resource), false),
            Step::Construct(permit) => (self.construct(permit, cancel).await, true),
            Step::Wait(id, rx) => (self.wait(id, rx, cancel).await, true),
        }
    }

    async fn construct(&self, permit: SlotPermit<M>, cancel: &CancellationToken) -> AcquireResult<M> {
        let mut rx = self.inner.spawn_create(permit);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            res = &mut rx => Some(res),
        };

        match outcome {
            // Dropping `rx` hands a late resource back to the pool.
            None => {
                tracing::trace!("acquire cancelled during construction");
                Err(PoolError::Cancelled)
            }
            Some(Ok(result)) => result,
            // The construction task was dropped without running: the
            // runtime is shutting down.
            Some(Err(_)) => Err(PoolError::PoolClosed),
        }
    }

    async fn wait(
        &self,
        id: u64,
        mut rx: oneshot::Receiver<Grant<M>>,
        cancel: &CancellationToken,
    ) -> AcquireResult<M> {
        // Dequeues the waiter if this future is cancelled or dropped.
        let queued = QueuedWaiter {
            pool: &self.inner,
            id,
            armed: true,
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            grant = &mut rx => Some(grant),
        };

        match outcome {
            None => {
                drop(queued);
                tracing::trace!(waiter_id = id, "acquire cancelled while waiting");
                // A grant delivered before removal is returned when `rx` drops.
                Err(PoolError::Cancelled)
            }
            // Dequeued by `hand_off` or `close` before the channel resolved.
            Some(Ok(Grant::Resource(resource))) => {
                queued.defuse();
                Ok(resource)
            }
            Some(Ok(Grant::Slot(permit))) => {
                queued.defuse();
                self.construct(permit, cancel).await
            }
            Some(Err(_)) => {
                queued.defuse();
                Err(PoolError::PoolClosed)
            }
        }
    }
}

impl<M: Manage> PoolInner<M> {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn begin_acquire(self: &Arc<Self>) -> Step<M> {
        let mut state = self.state.lock();
        if state.closed {
            return Step::Closed;
        }

        if let Some(mut entry) = state.idle.pop_back() {
            entry.meta.state = ResourceState::Acquired;
            state.acquired += 1;
            return Step::Ready(Resource::new(entry, Arc::clone(self)));
        }

        if state.live + state.constructing < self.capacity {
            state.constructing += 1;
            return Step::Construct(SlotPermit::new(Arc::clone(self)));
        }

        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { id, tx });

        tracing::trace!(
            waiter_id = id,
            waiting = state.waiters.len(),
            "pool exhausted, waiting for a resource"
        );

        Step::Wait(id, rx)
    }

    fn remove_waiter(&self, id: u64) {
        self.state.lock().waiters.retain(|w| w.id != id);
    }

    /// Run the constructor in a background task so a cancelled acquire
    /// never interrupts it.
    fn spawn_create(
        self: &Arc<Self>,
        permit: SlotPermit<M>,
    ) -> oneshot::Receiver<AcquireResult<M>> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(self);

        tokio::spawn(async move {
            let outcome = match inner.manager.create().await {
                Ok(value) => {
                    let resource = permit.fulfill(value);
                    if inner.is_closed() {
                        // Released into a closed pool, so destroyed.
                        drop(resource);
                        Err(PoolError::PoolClosed)
                    } else {
                        Ok(resource)
                    }
                }
                Err(err) => {
                    tracing::debug!(error = %err, "resource construction failed");
                    permit.fail();
                    Err(PoolError::ConstructFailed(err))
                }
            };

            // If the acquirer went away, the unsent resource is dropped here
            // and returns to the pool.
            let _ = tx.send(outcome);
        });

        rx
    }

    fn put_back(self: &Arc<Self>, mut entry: Entry<M::Resource>, force_destroy: bool) {
        debug_assert_eq!(
            entry.meta.state,
            ResourceState::Acquired,
            "resource {} returned while not acquired",
            entry.meta.id
        );

        let reusable = !force_destroy && self.manager.is_reusable(&entry.value);

        let mut state = self.state.lock();
        debug_assert!(state.acquired > 0, "release without a matching acquire");
        state.acquired -= 1;

        if state.closed || !reusable {
            entry.meta.state = ResourceState::Destroying;
            state.destroying += 1;
            let closed = state.closed;
            drop(state);

            tracing::trace!(
                resource_id = entry.meta.id,
                closed,
                reusable,
                "destroying released resource"
            );
            self.spawn_destroy(entry);
            return;
        }

        let id = entry.meta.id;

        // Longest waiter first; the resource stays marked acquired.
        state.acquired += 1;
        let grant = Grant::Resource(Resource::new(entry, Arc::clone(self)));
        let Some(grant) = Self::hand_off(&mut state, grant) else {
            tracing::trace!(resource_id = id, "released resource handed to waiter");
            return;
        };
        state.acquired -= 1;

        if let Some(mut entry) = grant.reclaim() {
            entry.meta.mark_idle();
            state.idle.push_back(entry);
            tracing::trace!(resource_id = id, idle = state.idle.len(), "resource released");
        }
    }

    /// Give `grant` to the longest waiter still listening. Returns the grant
    /// if nobody took it.
    fn hand_off(state: &mut PoolState<M>, mut grant: Grant<M>) -> Option<Grant<M>> {
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Offer a freed construction slot to the longest waiter.
    fn offer_slot(self: &Arc<Self>, state: &mut PoolState<M>) {
        if state.closed
            || state.waiters.is_empty()
            || state.live + state.constructing >= self.capacity
        {
            return;
        }

        state.constructing += 1;
        let grant = Grant::Slot(SlotPermit::new(Arc::clone(self)));
        if let Some(grant) = Self::hand_off(state, grant) {
            let _ = grant.reclaim();
            state.constructing -= 1;
        }
    }

    /// Called when a reserved construction slot is given up.
    fn abandon_slot(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.constructing -= 1;
        self.offer_slot(&mut state);
        let closed = state.closed;
        drop(state);

        if closed {
            self.drained.notify_waiters();
        }
    }

    fn spawn_destroy(self: &Arc<Self>, entry: Entry<M::Resource>) {
        let guard = DestroyGuard {
            pool: Arc::clone(self),
            id: entry.meta.id,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    inner.manager.destroy(entry.value).await;
                    drop(guard);
                });
            }
            Err(_) => {
                tracing::warn!(
                    resource_id = entry.meta.id,
                    "no async runtime available, dropping resource without its destructor"
                );
                drop(entry);
                drop(guard);
            }
        }
    }

    async fn destroy(self: &Arc<Self>, entry: Entry<M::Resource>) {
        let _guard = DestroyGuard {
            pool: Arc::clone(self),
            id: entry.meta.id,
        };
        self.manager.destroy(entry.value).await;
    }

    fn finish_destroy(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        state.destroying -= 1;
        state.live -= 1;
        state.counters.destroyed_count += 1;
        self.offer_slot(&mut state);
        let closed = state.closed;
        drop(state);

        tracing::debug!(resource_id = id, "resource destroyed");

        if closed {
            self.drained.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                if state.live == 0 && state.constructing == 0 {
                    return;
                }
                tracing::trace!(
                    live = state.live,
                    constructing = state.constructing,
                    "waiting for outstanding resources"
                );
            }

            notified.await;
        }
    }

    fn record_acquire(&self, started: Instant, empty: bool, result: &AcquireResult<M>) {
        let mut state = self.state.lock();
        let counters = &mut state.counters;
        match result {
            Ok(_) => {
                counters.acquire_count += 1;
                counters.acquire_duration += started.elapsed();
                if empty {
                    counters.empty_acquire_count += 1;
                }
            }
            Err(PoolError::Cancelled) => counters.cancelled_acquire_count += 1,
            Err(_) => {}
        }
    }
}

impl<M: Manage> Grant<M> {
    /// Take an undelivered grant apart without running its drop behaviour.
    /// Safe to call with the pool lock held.
    fn reclaim(self) -> Option<Entry<M::Resource>> {
        match self {
            Self::Resource(mut resource) => resource.entry.take(),
            Self::Slot(mut permit) => {
                permit.armed = false;
                None
            }
        }
    }
}

/// A reserved construction slot. Gives the slot back on drop unless it was
/// fulfilled.
struct SlotPermit<M: Manage> {
    pool: Arc<PoolInner<M>>,
    armed: bool,
}

impl<M: Manage> SlotPermit<M> {
    fn new(pool: Arc<PoolInner<M>>) -> Self {
        Self { pool, armed: true }
    }

    /// Turn the slot into a live, acquired resource.
    fn fulfill(mut self, value: M::Resource) -> Resource<M> {
        self.armed = false;
        let id = self.pool.next_resource_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.pool.state.lock();
            state.constructing -= 1;
            state.live += 1;
            state.acquired += 1;
            state.counters.created_count += 1;
        }

        tracing::debug!(resource_id = id, "resource created");

        let entry = Entry {
            value,
            meta: ResourceMetadata::new(id),
        };
        Resource::new(entry, Arc::clone(&self.pool))
    }

    fn fail(self) {
        self.pool.state.lock().counters.construct_failed_count += 1;
    }
}

impl<M: Manage> Drop for SlotPermit<M> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.abandon_slot();
        }
    }
}

/// A queued acquirer. Removes its entry from the waiter queue on drop
/// unless a grant or the close signal already took it out.
struct QueuedWaiter<'a, M: Manage> {
    pool: &'a PoolInner<M>,
    id: u64,
    armed: bool,
}

impl<M: Manage> QueuedWaiter<'_, M> {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl<M: Manage> Drop for QueuedWaiter<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.remove_waiter(self.id);
        }
    }
}

/// Retires a live slot once the destructor has run (or been dropped).
struct DestroyGuard<M: Manage> {
    pool: Arc<PoolInner<M>>,
    id: u64,
}

impl<M: Manage> Drop for DestroyGuard<M> {
    fn drop(&mut self) {
        self.pool.finish_destroy(self.id);
    }
}

const RELEASED: &str = "(bug) resource already returned to pool";

/// A resource borrowed from a [`ResourcePool`].
///
/// Exactly one borrower holds a resource at a time. The resource goes back
/// to the pool when this guard is released or dropped; if the pool has been
/// closed (or the manager reports it unusable) it is destroyed instead.
#[must_use = "dropping a resource immediately returns it to the pool"]
pub struct Resource<M: Manage> {
    entry: Option<Entry<M::Resource>>,
    pool: Arc<PoolInner<M>>,
}

impl<M: Manage> Resource<M> {
    fn new(entry: Entry<M::Resource>, pool: Arc<PoolInner<M>>) -> Self {
        Self {
            entry: Some(entry),
            pool,
        }
    }

    // `entry` is only taken by methods that consume the guard.
    #[allow(clippy::expect_used)]
    fn entry(&self) -> &Entry<M::Resource> {
        self.entry.as_ref().expect(RELEASED)
    }

    #[allow(clippy::expect_used)]
    fn entry_mut(&mut self) -> &mut Entry<M::Resource> {
        self.entry.as_mut().expect(RELEASED)
    }

    fn checked_out(&mut self) {
        self.entry_mut().meta.mark_checked_out();
    }

    /// Get the resource's pool bookkeeping.
    #[must_use]
    pub fn metadata(&self) -> &ResourceMetadata {
        &self.entry().meta
    }

    /// Unique identifier of the resource within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.entry().meta.id
    }

    /// Return the resource to the pool.
    ///
    /// Equivalent to dropping the guard; provided for call sites that want
    /// the release to be explicit.
    pub fn release(self) {
        drop(self);
    }

    /// Destroy the resource instead of returning it to the pool.
    ///
    /// Use this when the resource is known to be unusable. Its slot is
    /// freed once the destructor has run.
    pub fn destroy(mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.put_back(entry, true);
        }
    }
}

impl<M: Manage> Deref for Resource<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        &self.entry().value
    }
}

impl<M: Manage> DerefMut for Resource<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry_mut().value
    }
}

impl<M: Manage> Drop for Resource<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.put_back(entry, false);
        }
    }
}

impl<M: Manage> fmt::Debug for Resource<M>
where
    M::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Resource");
        if let Some(entry) = &self.entry {
            s.field("id", &entry.meta.id).field("value", &entry.value);
        }
        s.finish()
    }
}

impl<M: Manage> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Manage> fmt::Debug for ResourcePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ResourcePool")
            .field("capacity", &self.inner.capacity)
            .field("live", &state.live)
            .field("idle", &state.idle.len())
            .field("acquired", &state.acquired)
            .field("closed", &state.closed)
            .finish()
    }
}
