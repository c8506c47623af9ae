use crate::error::{PipelineError, Result};
use std::collections::VecDeque;
use std::fmt;

/// Determines what a bounded buffer does when it is offered an item while full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Accept everything; the buffer grows without bound
    Unbounded,
    /// Discard the newly offered item, keeping the initial fill
    DropLatest(usize),
    /// Evict the oldest held item to make room for the new one
    DropOldest(usize),
    /// Hold at most one item; a new offer replaces it
    LatestOnly,
    /// Fail the pipeline on the first item that does not fit
    ErrorOnOverflow(usize),
}

/// Outcome of applying a policy to one offered item.
///
/// Discarded items are handed back so callers can log or count them.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum Offer<T> {
    /// Stored without disturbing existing contents
    Accepted,
    /// The offered item was discarded (`DropLatest`)
    Dropped(T),
    /// The offered item was stored after evicting the oldest one (`DropOldest`)
    Evicted(T),
    /// The offered item replaced the held one (`LatestOnly`)
    Replaced(T),
    /// The offered item did not fit (`ErrorOnOverflow`); the buffer is unchanged
    Rejected(T),
}

impl<T> Offer<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Offer::Rejected(_))
    }

    /// The item that is gone from the pipeline as a result of this offer, if any
    pub fn discarded(&self) -> Option<&T> {
        match self {
            Offer::Accepted => None,
            Offer::Dropped(item)
            | Offer::Evicted(item)
            | Offer::Replaced(item)
            | Offer::Rejected(item) => Some(item),
        }
    }
}

impl OverflowPolicy {
    /// Maximum number of held items, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        match *self {
            OverflowPolicy::Unbounded => None,
            OverflowPolicy::LatestOnly => Some(1),
            OverflowPolicy::DropLatest(capacity)
            | OverflowPolicy::DropOldest(capacity)
            | OverflowPolicy::ErrorOnOverflow(capacity) => Some(capacity),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OverflowPolicy::Unbounded => "unbounded",
            OverflowPolicy::DropLatest(_) => "drop-latest",
            OverflowPolicy::DropOldest(_) => "drop-oldest",
            OverflowPolicy::LatestOnly => "latest-only",
            OverflowPolicy::ErrorOnOverflow(_) => "error-on-overflow",
        }
    }

    /// Whether items may be discarded without failing the run
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            OverflowPolicy::DropLatest(_)
                | OverflowPolicy::DropOldest(_)
                | OverflowPolicy::LatestOnly
        )
    }

    /// Reject capacities a bounded buffer cannot honour
    pub fn validate(&self) -> Result<()> {
        match self.capacity() {
            Some(0) => Err(PipelineError::ConfigError(format!(
                "{} policy requires a capacity of at least 1",
                self.name()
            ))),
            _ => Ok(()),
        }
    }

    /// Offer `item` to `queue` under this policy.
    ///
    /// The capacity check and the resulting mutation happen together, so callers
    /// must hold exclusive access to `queue` for the duration of the call.
    pub fn apply<T>(&self, queue: &mut VecDeque<T>, item: T) -> Offer<T> {
        match *self {
            OverflowPolicy::Unbounded => {
                queue.push_back(item);
                Offer::Accepted
            }
            OverflowPolicy::DropLatest(capacity) => {
                if queue.len() >= capacity {
                    Offer::Dropped(item)
                } else {
                    queue.push_back(item);
                    Offer::Accepted
                }
            }
            OverflowPolicy::DropOldest(capacity) => {
                let evicted = if queue.len() >= capacity {
                    queue.pop_front()
                } else {
                    None
                };
                queue.push_back(item);
                match evicted {
                    Some(oldest) => Offer::Evicted(oldest),
                    None => Offer::Accepted,
                }
            }
            OverflowPolicy::LatestOnly => {
                let held = queue.pop_front();
                queue.clear();
                queue.push_back(item);
                match held {
                    Some(previous) => Offer::Replaced(previous),
                    None => Offer::Accepted,
                }
            }
            OverflowPolicy::ErrorOnOverflow(capacity) => {
                if queue.len() >= capacity {
                    Offer::Rejected(item)
                } else {
                    queue.push_back(item);
                    Offer::Accepted
                }
            }
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capacity() {
            Some(capacity) if *self != OverflowPolicy::LatestOnly => {
                write!(f, "{}({})", self.name(), capacity)
            }
            _ => f.write_str(self.name()),
        }
    }
}
