use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Why a run stopped producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A finite source was exhausted and fully drained
    Completed,
    /// The consumer had enough (`take(n)`) or the run was cancelled. Not an error.
    UpstreamCancelled,
    /// An `ErrorOnOverflow` buffer overflowed
    Overflow,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Termination::Completed => "completed",
            Termination::UpstreamCancelled => "upstream cancelled",
            Termination::Overflow => "overflow",
        })
    }
}

/// Cancellation state for one pipeline run.
///
/// Cancellation is cooperative: the producer checks the flag before every emission
/// and never delivers an item after observing it, but an emission already in
/// flight is allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct PipelineHandle {
    cancelled: Arc<AtomicBool>,
    signal: Arc<Notify>,
}

impl PipelineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("pipeline cancellation requested");
            self.signal.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        let notified = self.signal.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.as_mut().await;
            notified.set(self.signal.notified());
        }
    }

    /// Guard that cancels this run when dropped
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

/// Cancels its run when dropped, propagating a vanished consumer upstream
#[derive(Debug)]
pub struct CancelOnDrop(PipelineHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let handle = PipelineHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_cancel_on_drop() {
        let handle = PipelineHandle::new();
        {
            let _guard = handle.cancel_on_drop();
        }
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wakes_waiter() {
        let handle = PipelineHandle::new();
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        handle.cancelled().await;
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let handle = PipelineHandle::new();
        handle.cancel();
        handle.cancelled().await;
    }
}
