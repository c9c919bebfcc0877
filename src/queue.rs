//! Fair blocking queue of available resources

use crate::cancel::on_cancel;
use crate::errors::{PoolError, PoolResult};
use crate::owner::OwnerId;
use crate::ownership::OwnershipTable;

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of offering a resource to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Stored until somebody asks for it
    Queued,
    /// Given straight to the longest waiting taker
    HandedOff,
    /// Held by a caller, not available
    Owned,
    /// Already queued
    Duplicate,
    /// Capacity reached
    Full,
}

impl Offer {
    pub fn accepted(self) -> bool {
        matches!(self, Offer::Queued | Offer::HandedOff)
    }
}

struct Waiter {
    id: u64,
    owner: OwnerId,
    signal: Arc<Condvar>,
}

struct QueueState<T> {
    items: VecDeque<Arc<T>>,
    waiters: VecDeque<Waiter>,
    handed: HashMap<u64, Arc<T>>,
    next_waiter: u64,
    closed: bool,
}

impl<T> QueueState<T> {
    fn position(&self, resource: &Arc<T>) -> Option<usize> {
        self.items.iter().position(|item| Arc::ptr_eq(item, resource))
    }

    fn forget_waiter(&mut self, id: u64) {
        self.waiters.retain(|waiter| waiter.id != id);
    }
}

/// Blocking queue of free resources.
///
/// Takers are served strictly in the order they started waiting: a
/// resource offered while somebody waits goes to the head of the waiter
/// line, and ownership is recorded for that waiter before the queue lock
/// is released. Items and waiters are never both non-empty.
pub(crate) struct AvailabilityQueue<T> {
    state: Arc<Mutex<QueueState<T>>>,
    capacity: Option<usize>,
}

impl<T: Send + Sync + 'static> AvailabilityQueue<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                handed: HashMap::new(),
                next_waiter: 0,
                closed: false,
            })),
            capacity,
        }
    }

    /// Take the next resource for `owner`, blocking until one arrives.
    ///
    /// Returns `Ok(None)` once `deadline` passes. Ownership is recorded in
    /// `owners` atomically with leaving the queue.
    pub fn poll(
        &self,
        owner: OwnerId,
        owners: &OwnershipTable<T>,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> PoolResult<Option<Arc<T>>> {
        let signal = Arc::new(Condvar::new());
        let _registration = cancel.map(|token| {
            let state = Arc::clone(&self.state);
            let signal = Arc::clone(&signal);
            on_cancel(token, move || {
                let _state = state.lock();
                signal.notify_all();
            })
        });

        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(PoolError::Cancelled);
        }

        if let Some(resource) = state.items.pop_front() {
            owners.lock(&resource, owner);
            return Ok(Some(resource));
        }

        let id = state.next_waiter;
        state.next_waiter += 1;
        state.waiters.push_back(Waiter {
            id,
            owner,
            signal: Arc::clone(&signal),
        });

        loop {
            // A handed resource is already ours, even if we also timed out.
            if let Some(resource) = state.handed.remove(&id) {
                return Ok(Some(resource));
            }

            if state.closed {
                return Err(PoolError::PoolClosed);
            }

            if cancel.is_some_and(CancellationToken::is_cancelled) {
                state.forget_waiter(id);
                return Err(PoolError::Cancelled);
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        state.forget_waiter(id);
                        return Ok(None);
                    }
                    signal.wait_until(&mut state, deadline);
                }
                None => signal.wait(&mut state),
            }
        }
    }

    /// Non-blocking insert.
    ///
    /// Refuses resources that are owned or already queued.
    pub fn offer(&self, resource: Arc<T>, owners: &OwnershipTable<T>) -> Offer {
        let mut state = self.state.lock();

        if owners.is_locked(&resource) {
            return Offer::Owned;
        }
        if state.position(&resource).is_some() {
            return Offer::Duplicate;
        }

        if let Some(waiter) = state.waiters.pop_front() {
            owners.lock(&resource, waiter.owner);
            state.handed.insert(waiter.id, resource);
            waiter.signal.notify_all();
            return Offer::HandedOff;
        }

        if self.capacity.is_some_and(|capacity| state.items.len() >= capacity) {
            return Offer::Full;
        }

        state.items.push_back(resource);
        Offer::Queued
    }

    /// Remove a specific resource, returning whether it was queued
    pub fn remove(&self, resource: &Arc<T>) -> bool {
        let mut state = self.state.lock();
        match state.position(resource) {
            Some(index) => {
                state.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, resource: &Arc<T>) -> bool {
        self.state.lock().position(resource).is_some()
    }

    /// Clear and fail every current and future taker with `PoolClosed`
    /// until [`reopen`](Self::reopen).
    ///
    /// Resources already handed to a taker that has not woken yet stay
    /// with that taker, which is recorded as their owner.
    pub fn close(&self) -> usize {
        self.shut(false)
    }

    /// Like [`close`](Self::close), but also takes back resources handed
    /// to takers that have not woken yet; those takers fail with
    /// `PoolClosed`. For use when the ownership table is cleared too.
    pub fn close_discarding(&self) -> usize {
        self.shut(true)
    }

    fn shut(&self, discard_handed: bool) -> usize {
        let mut state = self.state.lock();
        state.closed = true;

        let dropped = state.items.len();
        state.items.clear();
        if discard_handed {
            state.handed.clear();
        }

        for waiter in state.waiters.drain(..) {
            waiter.signal.notify_all();
        }

        dropped
    }

    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn queue() -> (Arc<AvailabilityQueue<u32>>, Arc<OwnershipTable<u32>>) {
        (
            Arc::new(AvailabilityQueue::new(None)),
            Arc::new(OwnershipTable::new()),
        )
    }

    fn wait_for_waiters(queue: &AvailabilityQueue<u32>, count: usize) {
        while queue.waiting() < count {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_offer_then_poll_records_owner() {
        let (queue, owners) = queue();
        let resource = Arc::new(1);
        let me = OwnerId::current();

        assert_eq!(queue.offer(Arc::clone(&resource), &owners), Offer::Queued);
        let taken = queue.poll(me, &owners, None, None).unwrap().unwrap();

        assert!(Arc::ptr_eq(&taken, &resource));
        assert_eq!(owners.owner_of(&resource), Some(me));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_duplicate_and_owned_are_refused() {
        let (queue, owners) = queue();
        let resource = Arc::new(1);

        assert_eq!(queue.offer(Arc::clone(&resource), &owners), Offer::Queued);
        assert_eq!(queue.offer(Arc::clone(&resource), &owners), Offer::Duplicate);

        // Equal value, different allocation.
        assert_eq!(queue.offer(Arc::new(1), &owners), Offer::Queued);

        let other = Arc::new(2);
        owners.lock(&other, OwnerId::current());
        assert_eq!(queue.offer(other, &owners), Offer::Owned);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_capacity() {
        let queue = AvailabilityQueue::new(Some(1));
        let owners = OwnershipTable::new();

        assert!(queue.offer(Arc::new(1), &owners).accepted());
        assert_eq!(queue.offer(Arc::new(2), &owners), Offer::Full);
    }

    #[test]
    fn test_poll_times_out() {
        let (queue, owners) = queue();
        let deadline = Instant::now() + Duration::from_millis(20);

        let result = queue.poll(OwnerId::current(), &owners, Some(deadline), None);
        assert_eq!(result, Ok(None));
        assert_eq!(queue.waiting(), 0);
    }

    #[test]
    fn test_waiters_served_in_arrival_order() {
        let (queue, owners) = queue();
        let mut handles = Vec::new();

        for index in 0..3 {
            let worker_queue = Arc::clone(&queue);
            let owners = Arc::clone(&owners);
            handles.push(thread::spawn(move || {
                let taken = worker_queue.poll(OwnerId::current(), &owners, None, None);
                (index, *taken.unwrap().unwrap())
            }));
            wait_for_waiters(&queue, index + 1);
        }

        for value in [10, 20, 30] {
            assert_eq!(queue.offer(Arc::new(value), &owners), Offer::HandedOff);
        }

        let served: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(served, vec![(0, 10), (1, 20), (2, 30)]);
        assert_eq!(owners.len(), 3);
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let (queue, owners) = queue();
        let token = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let owners = Arc::clone(&owners);
            let token = token.clone();
            thread::spawn(move || queue.poll(OwnerId::current(), &owners, None, Some(&token)))
        };

        wait_for_waiters(&queue, 1);
        token.cancel();

        assert_eq!(waiter.join().unwrap(), Err(PoolError::Cancelled));
        assert_eq!(queue.waiting(), 0);

        // The queue keeps working for everybody else.
        assert_eq!(queue.offer(Arc::new(5), &owners), Offer::Queued);
    }

    #[test]
    fn test_close_fails_waiters_until_reopened() {
        let (queue, owners) = queue();

        let waiter = {
            let queue = Arc::clone(&queue);
            let owners = Arc::clone(&owners);
            thread::spawn(move || queue.poll(OwnerId::current(), &owners, None, None))
        };

        wait_for_waiters(&queue, 1);
        assert_eq!(queue.close(), 0);
        assert_eq!(waiter.join().unwrap(), Err(PoolError::PoolClosed));

        queue.reopen();
        queue.offer(Arc::new(3), &owners);
        let taken = queue.poll(OwnerId::current(), &owners, None, None).unwrap();
        assert_eq!(taken.as_deref(), Some(&3));
    }

    #[test]
    fn test_remove_and_close() {
        let (queue, owners) = queue();
        let a = Arc::new(1);
        let b = Arc::new(2);

        queue.offer(Arc::clone(&a), &owners);
        queue.offer(Arc::clone(&b), &owners);

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));
        assert!(queue.contains(&b));

        assert_eq!(queue.close(), 1);
        assert_eq!(queue.len(), 0);
    }

    fn hand_to_sleeping_taker(queue: &AvailabilityQueue<u32>, owners: &OwnershipTable<u32>) {
        // A waiter that was served but has not run since.
        let mut state = queue.state.lock();
        state.waiters.push_back(Waiter {
            id: 7,
            owner: OwnerId::current(),
            signal: Arc::new(Condvar::new()),
        });
        drop(state);
        assert_eq!(queue.offer(Arc::new(9), owners), Offer::HandedOff);
    }

    #[test]
    fn test_graceful_close_keeps_handed_resources() {
        let (queue, owners) = queue();
        hand_to_sleeping_taker(&queue, &owners);

        queue.close();
        assert_eq!(queue.state.lock().handed.get(&7).map(|r| **r), Some(9));
        assert_eq!(owners.len(), 1);
    }

    #[test]
    fn test_close_discarding_takes_back_handed_resources() {
        let (queue, owners) = queue();
        hand_to_sleeping_taker(&queue, &owners);

        queue.close_discarding();
        assert!(queue.state.lock().handed.is_empty());
        assert_eq!(queue.waiting(), 0);
    }
}
