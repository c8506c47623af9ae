use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Credit-based flow control between two adjacent stages.
///
/// The downstream stage grants credit with [`Demand::request`]; the upstream stage
/// spends one credit per delivered item. A credit of `u64::MAX` is unbounded and is
/// never spent.
#[derive(Debug, Clone)]
pub struct Demand {
    credit: Arc<AtomicU64>,
    replenished: Arc<Notify>,
}

impl Demand {
    /// Demand with no outstanding credit
    pub fn new() -> Self {
        Self::with_credit(0)
    }

    pub fn with_credit(credit: u64) -> Self {
        Self {
            credit: Arc::new(AtomicU64::new(credit)),
            replenished: Arc::new(Notify::new()),
        }
    }

    /// Demand that never runs out
    pub fn unbounded() -> Self {
        Self::with_credit(u64::MAX)
    }

    /// Grant `n` more items of credit
    pub fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let _ = self
            .credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |credit| {
                Some(credit.saturating_add(n))
            });
        self.replenished.notify_one();
    }

    /// Spend one credit if any is available
    pub fn try_acquire(&self) -> bool {
        self.credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |credit| match credit {
                0 => None,
                u64::MAX => Some(u64::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }

    /// Wait until a credit is available, then spend it
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            self.replenished.notified().await;
        }
    }

    /// Credit currently outstanding
    pub fn outstanding(&self) -> u64 {
        self.credit.load(Ordering::Acquire)
    }

    pub fn is_unbounded(&self) -> bool {
        self.outstanding() == u64::MAX
    }
}

impl Default for Demand {
    fn default() -> Self {
        Self::new()
    }
}
