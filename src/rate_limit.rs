use crate::demand::Demand;
use crate::error::{PipelineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// How a [`RateLimiter`] paces releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RateLimit {
    /// At least `min_interval` between consecutive releases
    Spacing {
        #[serde(rename = "minIntervalMs", with = "crate::config::millis")]
        min_interval: Duration,
    },
    /// At most `max` releases per fixed window of length `per`
    Window {
        max: u64,
        #[serde(rename = "perMs", with = "crate::config::millis")]
        per: Duration,
    },
    /// Demand granted in batches of `prefetch`, topped up once three quarters are spent
    Prefetch { prefetch: u64 },
}

impl RateLimit {
    pub fn validate(&self) -> Result<()> {
        let valid = match *self {
            RateLimit::Spacing { min_interval } => !min_interval.is_zero(),
            RateLimit::Window { max, per } => max > 0 && !per.is_zero(),
            RateLimit::Prefetch { prefetch } => prefetch > 0,
        };
        if valid {
            Ok(())
        } else {
            Err(PipelineError::ConfigError(format!(
                "rate limit values must be non-zero: {self:?}"
            )))
        }
    }

    /// Batch size used to top up prefetch demand
    fn replenish_size(prefetch: u64) -> u64 {
        prefetch - prefetch / 4
    }
}

#[derive(Debug, Default)]
struct Schedule {
    last_release: Option<Instant>,
    window_start: Option<Instant>,
    released_in_window: u64,
    spent_since_refill: u64,
}

/// Caps how many items are released downstream, by demand and by time.
///
/// A release needs one unit of [`Demand`] and a free slot in the time schedule.
/// Items that are not released yet stay upstream in the buffer, where its overflow
/// policy applies; the limiter never drops anything itself.
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    demand: Demand,
    schedule: Mutex<Schedule>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Result<Self> {
        limit.validate()?;
        let demand = match limit {
            RateLimit::Prefetch { prefetch } => Demand::with_credit(prefetch),
            _ => Demand::new(),
        };
        Ok(Self {
            limit,
            demand,
            schedule: Mutex::new(Schedule::default()),
        })
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    pub fn demand(&self) -> &Demand {
        &self.demand
    }

    /// Express consumer demand for `n` more items
    pub fn request(&self, n: u64) {
        self.demand.request(n);
    }

    /// Reserve a release slot at `now`, or report how long until one opens
    pub fn try_reserve(&self, now: Instant) -> std::result::Result<(), Duration> {
        let mut schedule = self.schedule.lock();
        match self.limit {
            RateLimit::Spacing { min_interval } => {
                if let Some(last) = schedule.last_release {
                    let next = last + min_interval;
                    if now < next {
                        return Err(next - now);
                    }
                }
                schedule.last_release = Some(now);
                Ok(())
            }
            RateLimit::Window { max, per } => {
                let current = schedule.window_start;
                let start = match current {
                    Some(start) if now.duration_since(start) < per => start,
                    _ => {
                        schedule.released_in_window = 0;
                        schedule.window_start = Some(now);
                        now
                    }
                };
                if schedule.released_in_window >= max {
                    return Err(start + per - now);
                }
                schedule.released_in_window += 1;
                schedule.last_release = Some(now);
                Ok(())
            }
            RateLimit::Prefetch { .. } => {
                schedule.last_release = Some(now);
                Ok(())
            }
        }
    }

    /// Wait for demand and a free slot, then release one item
    pub async fn acquire(&self) {
        self.demand.acquire().await;
        while let Err(wait) = self.try_reserve(Instant::now()) {
            tokio::time::sleep(wait).await;
        }
        self.after_release();
    }

    /// Acquire on behalf of a consumer that pulls one item at a time.
    ///
    /// Prefetch limiters manage their own demand; the other modes are granted one
    /// unit of demand per pull.
    pub async fn acquire_next(&self) {
        if !matches!(self.limit, RateLimit::Prefetch { .. }) {
            self.demand.request(1);
        }
        self.acquire().await;
    }

    fn after_release(&self) {
        if let RateLimit::Prefetch { prefetch } = self.limit {
            let replenish = RateLimit::replenish_size(prefetch);
            let mut schedule = self.schedule.lock();
            schedule.spent_since_refill += 1;
            if schedule.spent_since_refill >= replenish {
                schedule.spent_since_refill = 0;
                self.demand.request(replenish);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(RateLimiter::new(RateLimit::Prefetch { prefetch: 0 }).is_err());
        assert!(RateLimiter::new(RateLimit::Window {
            max: 0,
            per: Duration::from_millis(10)
        })
        .is_err());
        assert!(RateLimiter::new(RateLimit::Spacing {
            min_interval: Duration::ZERO
        })
        .is_err());
    }

    #[test]
    fn test_spacing_schedule() {
        let limiter = RateLimiter::new(RateLimit::Spacing {
            min_interval: Duration::from_millis(50),
        })
        .unwrap();
        let t0 = Instant::now();
        assert!(limiter.try_reserve(t0).is_ok());
        assert_eq!(
            limiter.try_reserve(t0 + Duration::from_millis(20)),
            Err(Duration::from_millis(30))
        );
        assert!(limiter.try_reserve(t0 + Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_window_ceiling() {
        let limiter = RateLimiter::new(RateLimit::Window {
            max: 2,
            per: Duration::from_millis(100),
        })
        .unwrap();
        let t0 = Instant::now();
        assert!(limiter.try_reserve(t0).is_ok());
        assert!(limiter.try_reserve(t0 + Duration::from_millis(10)).is_ok());
        assert_eq!(
            limiter.try_reserve(t0 + Duration::from_millis(40)),
            Err(Duration::from_millis(60))
        );
        assert!(limiter.try_reserve(t0 + Duration::from_millis(100)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_replenishes_at_low_tide() {
        let limiter = RateLimiter::new(RateLimit::Prefetch { prefetch: 10 }).unwrap();
        assert_eq!(limiter.demand().outstanding(), 10);
        for _ in 0..8 {
            limiter.acquire_next().await;
        }
        // 2 left over plus a top-up of 8
        assert_eq!(limiter.demand().outstanding(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_demand() {
        let limiter = std::sync::Arc::new(
            RateLimiter::new(RateLimit::Spacing {
                min_interval: Duration::from_millis(10),
            })
            .unwrap(),
        );
        let requester = std::sync::Arc::clone(&limiter);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            requester.request(1);
        });
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_next_paces_releases() {
        let limiter = RateLimiter::new(RateLimit::Spacing {
            min_interval: Duration::from_millis(25),
        })
        .unwrap();
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire_next().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[test]
    fn test_serde_shape() {
        let json = r#"{"kind":"window","max":5,"perMs":1000}"#;
        let limit: RateLimit = serde_json::from_str(json).unwrap();
        assert_eq!(
            limit,
            RateLimit::Window {
                max: 5,
                per: Duration::from_secs(1)
            }
        );
        let json = r#"{"kind":"spacing","minIntervalMs":20}"#;
        let limit: RateLimit = serde_json::from_str(json).unwrap();
        assert_eq!(
            limit,
            RateLimit::Spacing {
                min_interval: Duration::from_millis(20)
            }
        );
    }
}
