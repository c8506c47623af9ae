use crate::error::{PipelineError, Result};
use crate::item::Item;
use crate::policy::{Offer, OverflowPolicy};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Healthy,
    /// Overflow happened but the consumer has not seen it yet
    Pending { capacity: usize, seq: u64 },
    Reported,
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<Item<T>>,
    closed: bool,
    fault: Fault,
}

/// Point-in-time view of a buffer's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: Option<usize>,
    pub offered: u64,
    pub dropped: u64,
}

/// The holding area between a producer and a consumer.
///
/// All mutation goes through one mutex so that the policy's capacity check and its
/// eviction decision are atomic with respect to concurrent drains. Clones share the
/// same underlying queue.
#[derive(Debug)]
pub struct Buffer<T> {
    state: Arc<Mutex<State<T>>>,
    policy: OverflowPolicy,
    available: Arc<Notify>,
    offered_count: Arc<AtomicU64>,
    dropped_count: Arc<AtomicU64>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            policy: self.policy,
            available: Arc::clone(&self.available),
            offered_count: Arc::clone(&self.offered_count),
            dropped_count: Arc::clone(&self.dropped_count),
        }
    }
}

impl<T> Buffer<T> {
    /// Create an empty buffer governed by `policy`
    pub fn new(policy: OverflowPolicy) -> Result<Self> {
        policy.validate()?;
        let queue = match policy.capacity() {
            Some(capacity) => VecDeque::with_capacity(capacity),
            None => VecDeque::new(),
        };
        Ok(Self {
            state: Arc::new(Mutex::new(State {
                queue,
                closed: false,
                fault: Fault::Healthy,
            })),
            policy,
            available: Arc::new(Notify::new()),
            offered_count: Arc::new(AtomicU64::new(0)),
            dropped_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Offer an item, applying the overflow policy if the buffer is full.
    ///
    /// Under `ErrorOnOverflow` a full buffer fails with [`PipelineError::Overflow`],
    /// discards everything it holds and refuses all later offers and drains.
    pub fn offer(&self, item: Item<T>) -> Result<Offer<Item<T>>> {
        let (outcome, cleared) = {
            let mut state = self.state.lock();
            if state.closed || state.fault != Fault::Healthy {
                return Err(PipelineError::Closed);
            }
            let outcome = self.policy.apply(&mut state.queue, item);
            let mut cleared = 0;
            if let Offer::Rejected(rejected) = &outcome {
                cleared = state.queue.len();
                state.queue.clear();
                state.fault = Fault::Pending {
                    capacity: self.policy.capacity().unwrap_or_default(),
                    seq: rejected.seq(),
                };
            }
            (outcome, cleared)
        };

        self.offered_count.fetch_add(1, Ordering::Relaxed);
        match &outcome {
            Offer::Accepted => {}
            Offer::Rejected(rejected) => {
                self.dropped_count
                    .fetch_add(1 + cleared as u64, Ordering::Relaxed);
                let capacity = self.policy.capacity().unwrap_or_default();
                warn!(seq = rejected.seq(), capacity, "buffer overflow, failing pipeline");
                self.available.notify_one();
                return Err(PipelineError::Overflow {
                    capacity,
                    seq: rejected.seq(),
                });
            }
            discarded => {
                self.dropped_count.fetch_add(1, Ordering::Relaxed);
                if let Some(item) = discarded.discarded() {
                    debug!(seq = item.seq(), policy = %self.policy, "discarded item");
                }
            }
        }
        self.available.notify_one();
        Ok(outcome)
    }

    /// Remove up to `max_n` items, oldest first. Empty once the buffer has faulted.
    pub fn drain(&self, max_n: usize) -> Vec<Item<T>> {
        let mut state = self.state.lock();
        if state.fault != Fault::Healthy {
            return Vec::new();
        }
        let n = max_n.min(state.queue.len());
        state.queue.drain(..n).collect()
    }

    /// Remove the oldest item, if any
    pub fn pop(&self) -> Option<Item<T>> {
        self.drain(1).into_iter().next()
    }

    /// Wait for the next item.
    ///
    /// Returns the overflow error exactly once after a fault, then `None`. Also
    /// returns `None` once the buffer is closed and empty. Intended for a single
    /// consuming task.
    pub async fn recv(&self) -> Option<Result<Item<T>>> {
        loop {
            {
                let mut state = self.state.lock();
                match state.fault {
                    Fault::Pending { capacity, seq } => {
                        state.fault = Fault::Reported;
                        return Some(Err(PipelineError::Overflow { capacity, seq }));
                    }
                    Fault::Reported => return None,
                    Fault::Healthy => {}
                }
                if let Some(item) = state.queue.pop_front() {
                    return Some(Ok(item));
                }
                if state.closed {
                    return None;
                }
            }
            self.available.notified().await;
        }
    }

    /// Wait until `recv` would return without suspending, leaving the buffer untouched
    pub async fn ready(&self) {
        loop {
            {
                let state = self.state.lock();
                if !state.queue.is_empty() || state.closed || state.fault != Fault::Healthy {
                    return;
                }
            }
            self.available.notified().await;
        }
    }

    /// Mark the end of the source. Buffered items stay drainable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether an overflow has put the buffer in its terminal error state
    pub fn is_faulted(&self) -> bool {
        self.state.lock().fault != Fault::Healthy
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Get the current number of held items
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Get the capacity of the buffer, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.policy.capacity()
    }

    /// Get the utilization of a bounded buffer as a percentage (0-100)
    pub fn utilization(&self) -> Option<u32> {
        self.capacity()
            .map(|capacity| ((self.len() * 100) / capacity).min(100) as u32)
    }

    /// Number of items ever offered
    pub fn offered_count(&self) -> u64 {
        self.offered_count.load(Ordering::Relaxed)
    }

    /// Number of items discarded by the policy, including those lost to an overflow fault
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.len(),
            capacity: self.capacity(),
            offered: self.offered_count(),
            dropped: self.dropped_count(),
        }
    }
}
