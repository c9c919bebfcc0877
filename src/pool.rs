//! The resource pool: fair acquisition, owner-only release, waiting removal

use crate::cancel::on_cancel;
use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};
use crate::owner::OwnerId;
use crate::ownership::{OwnershipTable, ResourceLocks};
use crate::queue::{AvailabilityQueue, Offer};

use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Every operation fails with [`PoolError::PoolClosed`]
    Closed,
    /// Normal operation
    Open,
    /// A graceful [`ResourcePool::close`] is waiting for owners to release.
    /// Only owners' releases are accepted.
    Draining,
}

struct Shared<T> {
    available: AvailabilityQueue<T>,
    owners: OwnershipTable<T>,
    locks: ResourceLocks,
    state: RwLock<PoolState>,
    metrics: MetricsTracker,
    capacity: Option<usize>,
}

impl<T: Send + Sync + 'static> Shared<T> {
    /// Lifecycle check. Never hold the returned guard across a blocking wait.
    fn gate(&self, allow_draining: bool) -> PoolResult<RwLockReadGuard<'_, PoolState>> {
        let state = self.state.read();
        let current = *state;
        match current {
            PoolState::Open => Ok(state),
            PoolState::Draining if allow_draining => Ok(state),
            _ => Err(PoolError::PoolClosed),
        }
    }

    fn acquire_as(
        &self,
        owner: OwnerId,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> PoolResult<Option<Arc<T>>> {
        drop(self.gate(false)?);

        let result = self.available.poll(owner, &self.owners, deadline, cancel);
        match &result {
            Ok(Some(_)) => {
                MetricsTracker::bump(&self.metrics.total_acquired);
                trace!(%owner, "resource acquired");
            }
            Ok(None) => {
                MetricsTracker::bump(&self.metrics.acquire_timeouts);
                trace!(%owner, "acquire timed out");
            }
            Err(PoolError::Cancelled) => {
                MetricsTracker::bump(&self.metrics.cancellations);
                debug!(%owner, "acquire cancelled");
            }
            Err(_) => {}
        }
        result
    }

    fn add(&self, resource: Arc<T>) -> PoolResult<bool> {
        let lock = self.locks.get(&resource);
        let _section = lock.enter();
        let _gate = self.gate(false)?;

        match self.available.offer(resource, &self.owners) {
            Offer::Queued | Offer::HandedOff => {
                MetricsTracker::bump(&self.metrics.total_added);
                Ok(true)
            }
            rejected => {
                MetricsTracker::bump(&self.metrics.add_rejections);
                debug!(reason = ?rejected, "add rejected");
                Ok(false)
            }
        }
    }

    fn release_as(&self, owner: OwnerId, resource: &Arc<T>) -> PoolResult<()> {
        let lock = self.locks.get(resource);
        let _section = lock.enter();
        let state = self.gate(true)?;

        match self.owners.owner_of(resource) {
            Some(holder) if holder == owner => {
                self.owners.unlock(resource);
                lock.notify_released();
                MetricsTracker::bump(&self.metrics.total_released);

                if *state == PoolState::Draining {
                    debug!(%owner, "resource released while draining");
                    return Ok(());
                }

                let offer = self.available.offer(Arc::clone(resource), &self.owners);
                if offer.accepted() {
                    trace!(%owner, ?offer, "resource released");
                } else {
                    warn!(
                        %owner,
                        ?offer,
                        "released resource could not be re-queued, dropping it"
                    );
                }
            }
            Some(holder) => {
                MetricsTracker::bump(&self.metrics.foreign_releases);
                debug!(
                    %owner,
                    %holder,
                    "ignoring release by a caller that does not own the resource"
                );
            }
            None => {
                debug!(%owner, "ignoring release of a resource nobody holds");
            }
        }
        Ok(())
    }

    /// Remove a resource for good.
    ///
    /// A free resource is taken out of the queue. A resource held by
    /// `owner` is forgotten. A resource held by somebody else is waited for
    /// when `wait` is set, re-checking after every wakeup since the
    /// resource can be re-acquired before we get to run.
    fn remove_as(
        &self,
        owner: OwnerId,
        resource: &Arc<T>,
        wait: bool,
        cancel: Option<&CancellationToken>,
        allow_draining: bool,
    ) -> PoolResult<bool> {
        let lock = self.locks.get(resource);
        let _registration = cancel.map(|token| {
            let lock = lock.share();
            on_cancel(token, move || lock.notify_locked())
        });

        let mut section = lock.enter();
        loop {
            let gate = self.gate(allow_draining)?;

            match self.owners.owner_of(resource) {
                None => {
                    if self.available.remove(resource) {
                        MetricsTracker::bump(&self.metrics.total_removed);
                        debug!(%owner, "free resource removed");
                        return Ok(true);
                    }
                    // Acquired between the two checks.
                    if self.owners.is_locked(resource) {
                        continue;
                    }
                    return Ok(false);
                }
                Some(holder) if holder == owner => {
                    self.owners.unlock(resource);
                    lock.notify_released();
                    MetricsTracker::bump(&self.metrics.total_removed);
                    debug!(%owner, "owned resource removed");
                    return Ok(true);
                }
                Some(holder) => {
                    if !wait {
                        debug!(%owner, %holder, "resource is held elsewhere, not removing");
                        return Ok(false);
                    }
                    if cancel.is_some_and(CancellationToken::is_cancelled) {
                        MetricsTracker::bump(&self.metrics.cancellations);
                        debug!(%owner, %holder, "remove cancelled");
                        return Err(PoolError::Cancelled);
                    }

                    drop(gate);
                    trace!(%owner, %holder, "waiting for resource to be released");
                    lock.wait_released(&mut section);
                }
            }
        }
    }

    fn open(&self) -> PoolResult<()> {
        let mut state = self.state.write();
        let current = *state;
        match current {
            PoolState::Open => Ok(()),
            PoolState::Draining => Err(PoolError::Closing),
            PoolState::Closed => {
                self.available.reopen();
                *state = PoolState::Open;
                info!(capacity = ?self.capacity, "pool opened");
                Ok(())
            }
        }
    }

    fn close_as(&self, owner: OwnerId) -> PoolResult<()> {
        let owned = {
            let mut state = self.state.write();
            if *state != PoolState::Open {
                return Err(PoolError::PoolClosed);
            }
            *state = PoolState::Draining;

            let dropped = self.available.close();
            let owned = self.owners.snapshot();
            info!(dropped, owned = owned.len(), "closing pool");
            owned
        };

        for resource in &owned {
            match self.remove_as(owner, resource, true, None, true) {
                Ok(_) => {}
                Err(PoolError::PoolClosed) => {
                    debug!("pool was closed immediately while draining");
                    return Ok(());
                }
                Err(error) => return Err(error),
            }
        }

        let mut state = self.state.write();
        if *state == PoolState::Draining {
            *state = PoolState::Closed;
            info!(drained = owned.len(), "pool closed");
        }
        Ok(())
    }

    fn close_now(&self) -> PoolResult<()> {
        {
            let mut state = self.state.write();
            if *state == PoolState::Closed {
                return Err(PoolError::PoolClosed);
            }
            *state = PoolState::Closed;

            let dropped = self.available.close_discarding();
            let discarded = self.owners.len();
            self.owners.clear();
            info!(dropped, discarded, "pool closed immediately");
        }

        // Removers parked on held resources re-check and see the pool closed.
        self.locks.wake_all();
        Ok(())
    }
}

/// Deadline `timeout` from now; a timeout too large to represent never
/// expires.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Thread-safe pool of caller-supplied resources.
///
/// Resources are shared `Arc<T>` handles and are told apart by allocation,
/// not by value. Callers [`acquire`](Self::acquire) a resource, use it
/// exclusively and [`release`](Self::release) it; only the caller that
/// acquired a resource can release it. Blocked acquirers are served in the
/// order they arrived.
///
/// Cloning the pool yields another handle to the same pool.
///
/// # Examples
///
/// ```
/// use fair_resourcepool::{PoolConfiguration, ResourcePool};
/// use std::sync::Arc;
///
/// let pool = ResourcePool::new(PoolConfiguration::new());
/// pool.open().unwrap();
///
/// let conn = Arc::new("db-1");
/// assert!(pool.add(Arc::clone(&conn)).unwrap());
///
/// let held = pool.acquire().unwrap();
/// assert!(Arc::ptr_eq(&held, &conn));
/// assert!(!pool.add(Arc::clone(&conn)).unwrap());
///
/// pool.release(&held).unwrap();
/// assert_eq!(pool.available_count(), 1);
/// ```
pub struct ResourcePool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> ResourcePool<T> {
    /// Create a new, empty pool
    pub fn new(config: PoolConfiguration) -> Self {
        let state = if config.open_on_create {
            PoolState::Open
        } else {
            PoolState::Closed
        };

        Self {
            shared: Arc::new(Shared {
                available: AvailabilityQueue::new(config.max_pool_size),
                owners: OwnershipTable::new(),
                locks: ResourceLocks::new(),
                state: RwLock::new(state),
                metrics: MetricsTracker::new(),
                capacity: config.max_pool_size,
            }),
        }
    }

    /// Create an open pool holding the given resources
    pub fn with_resources(resources: Vec<Arc<T>>, config: PoolConfiguration) -> Self {
        let pool = Self::new(config.opened());

        for resource in resources {
            if !matches!(pool.add(resource), Ok(true)) {
                warn!("initial resource rejected");
            }
        }
        pool
    }

    /// Take a free resource, blocking until one is available.
    ///
    /// Fails with [`PoolError::PoolClosed`] if the pool is not open, or
    /// closes while waiting.
    pub fn acquire(&self) -> PoolResult<Arc<T>> {
        let acquired = self.shared.acquire_as(OwnerId::current(), None, None)?;
        Ok(acquired.expect("acquire without a deadline cannot time out"))
    }

    /// Take a free resource, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the time runs out.
    pub fn acquire_timeout(&self, timeout: Duration) -> PoolResult<Option<Arc<T>>> {
        self.shared
            .acquire_as(OwnerId::current(), deadline_after(timeout), None)
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`PoolError::Cancelled`] once `token` is cancelled.
    ///
    /// # Examples
    ///
    /// ```
    /// use fair_resourcepool::{CancellationToken, PoolConfiguration, PoolError, ResourcePool};
    /// use std::thread;
    ///
    /// let pool = ResourcePool::<u32>::new(PoolConfiguration::new().opened());
    /// let token = CancellationToken::new();
    ///
    /// let canceller = token.clone();
    /// let handle = thread::spawn(move || canceller.cancel());
    ///
    /// // Nothing was ever added, so only the cancellation can end this wait.
    /// assert_eq!(pool.acquire_cancellable(&token), Err(PoolError::Cancelled));
    /// handle.join().unwrap();
    /// ```
    pub fn acquire_cancellable(&self, token: &CancellationToken) -> PoolResult<Arc<T>> {
        let acquired = self
            .shared
            .acquire_as(OwnerId::current(), None, Some(token))?;
        Ok(acquired.expect("acquire without a deadline cannot time out"))
    }

    /// Like [`acquire_timeout`](Self::acquire_timeout), cancellable
    pub fn acquire_timeout_cancellable(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> PoolResult<Option<Arc<T>>> {
        self.shared
            .acquire_as(OwnerId::current(), deadline_after(timeout), Some(token))
    }

    /// Make a resource available.
    ///
    /// Returns `false` if the resource is held by somebody, is already
    /// available, or the pool is at capacity.
    pub fn add(&self, resource: Arc<T>) -> PoolResult<bool> {
        self.shared.add(resource)
    }

    /// Give back a resource acquired by the calling thread or task.
    ///
    /// A release by anybody else is ignored.
    pub fn release(&self, resource: &Arc<T>) -> PoolResult<()> {
        self.shared.release_as(OwnerId::current(), resource)
    }

    /// Remove a resource for good, waiting for its holder to release it
    /// first if somebody else has it.
    ///
    /// Returns `false` if the pool does not know the resource.
    pub fn remove(&self, resource: &Arc<T>) -> PoolResult<bool> {
        self.shared
            .remove_as(OwnerId::current(), resource, true, None, false)
    }

    /// Remove a resource unless somebody else holds it
    pub fn remove_now(&self, resource: &Arc<T>) -> PoolResult<bool> {
        self.shared
            .remove_as(OwnerId::current(), resource, false, None, false)
    }

    /// Like [`remove`](Self::remove), but gives up with
    /// [`PoolError::Cancelled`] once `token` is cancelled.
    pub fn remove_cancellable(
        &self,
        resource: &Arc<T>,
        token: &CancellationToken,
    ) -> PoolResult<bool> {
        self.shared
            .remove_as(OwnerId::current(), resource, true, Some(token), false)
    }

    /// Open the pool. Opening an open pool does nothing.
    pub fn open(&self) -> PoolResult<()> {
        self.shared.open()
    }

    /// Close the pool gracefully.
    ///
    /// Available resources are dropped and blocked acquirers fail at once.
    /// Then every held resource is removed as its holder releases it; this
    /// call returns when all of them are gone.
    pub fn close(&self) -> PoolResult<()> {
        self.shared.close_as(OwnerId::current())
    }

    /// Close the pool and forget every resource, held or not.
    ///
    /// An acquirer that was handed a resource but had not woken up yet
    /// fails with [`PoolError::PoolClosed`] instead of getting it.
    pub fn close_now(&self) -> PoolResult<()> {
        self.shared.close_now()
    }

    /// Async [`acquire`](Self::acquire).
    ///
    /// Ownership is recorded for the calling task. Dropping the future
    /// abandons the wait; a resource that arrives anyway goes back to the
    /// pool.
    pub async fn acquire_async(&self) -> PoolResult<Arc<T>> {
        let acquired = self.acquire_blocking(None).await?;
        Ok(acquired.expect("acquire without a deadline cannot time out"))
    }

    /// Async [`acquire_timeout`](Self::acquire_timeout)
    pub async fn acquire_timeout_async(&self, timeout: Duration) -> PoolResult<Option<Arc<T>>> {
        self.acquire_blocking(deadline_after(timeout)).await
    }

    /// Async [`remove`](Self::remove). Dropping the future stops waiting.
    pub async fn remove_async(&self, resource: &Arc<T>) -> PoolResult<bool> {
        let owner = OwnerId::current();
        let token = CancellationToken::new();
        let armed = token.clone().drop_guard();
        let shared = Arc::clone(&self.shared);
        let resource = Arc::clone(resource);

        let removed = tokio::task::spawn_blocking(move || {
            shared.remove_as(owner, &resource, true, Some(&token), false)
        })
        .await
        .map_err(|_| PoolError::Cancelled)?;

        armed.disarm();
        removed
    }

    async fn acquire_blocking(&self, deadline: Option<Instant>) -> PoolResult<Option<Arc<T>>> {
        let owner = OwnerId::current();
        let token = CancellationToken::new();
        let armed = token.clone().drop_guard();
        let shared = Arc::clone(&self.shared);
        let (sender, receiver) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            let acquired = shared.acquire_as(owner, deadline, Some(&token));
            if let Err(Ok(Some(resource))) = sender.send(acquired) {
                debug!(%owner, "acquiring task went away, returning resource");
                let _ = shared.release_as(owner, &resource);
            }
        });

        let acquired = receiver.await.map_err(|_| PoolError::Cancelled)?;
        armed.disarm();
        acquired
    }

    pub fn is_open(&self) -> bool {
        self.state() == PoolState::Open
    }

    pub fn state(&self) -> PoolState {
        *self.shared.state.read()
    }

    /// Resources waiting in the availability queue
    pub fn available_count(&self) -> usize {
        self.shared.available.len()
    }

    /// Resources currently held
    pub fn owned_count(&self) -> usize {
        self.shared.owners.len()
    }

    /// Callers blocked in acquire
    pub fn waiting_count(&self) -> usize {
        self.shared.available.waiting()
    }

    pub fn is_owned(&self, resource: &Arc<T>) -> bool {
        self.shared.owners.is_locked(resource)
    }

    pub fn owner_of(&self, resource: &Arc<T>) -> Option<OwnerId> {
        self.shared.owners.owner_of(resource)
    }

    /// Whether the pool knows the resource, free or held
    pub fn contains(&self, resource: &Arc<T>) -> bool {
        self.shared.owners.is_locked(resource) || self.shared.available.contains(resource)
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.shared.metrics.get_metrics(
            self.owned_count(),
            self.available_count(),
            self.waiting_count(),
            self.shared.capacity,
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }
}
