use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tracing::debug;

/// Exponential wait schedule applied while the rate budget is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub max_retries: u32,
}

/// Request budget for one upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub backoff: BackoffPolicy,
}

impl ThrottlePolicy {
    /// Public chart endpoint: roughly one request per second with short waits.
    pub fn web_feed_default() -> Self {
        Self {
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
            backoff: BackoffPolicy {
                initial_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(2),
                multiplier: 2.0,
                max_retries: 2,
            },
        }
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter with a bounded wait.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<DirectRateLimiter>,
    backoff: BackoffPolicy,
}

impl Throttle {
    pub fn new(policy: &ThrottlePolicy) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(
                policy.quota_window,
                policy.quota_limit,
            ))),
            backoff: policy.backoff.clone(),
        }
    }

    /// Takes one unit of budget, or returns the delay before the next try.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }
        Err(self.retry_delay(0).unwrap_or(self.backoff.max_delay))
    }

    /// Waits for budget following the backoff schedule. Returns `false` once
    /// the retries are exhausted.
    pub async fn acquire(&self) -> bool {
        let mut retry = 0_u32;
        loop {
            if self.limiter.check().is_ok() {
                return true;
            }
            let Some(delay) = self.retry_delay(retry) else {
                return false;
            };
            debug!(retry, delay_ms = delay.as_millis() as u64, "rate budget exhausted, waiting");
            tokio::time::sleep(delay).await;
            retry = retry.saturating_add(1);
        }
    }

    pub fn retry_delay(&self, retry_count: u32) -> Option<Duration> {
        if retry_count > self.backoff.max_retries {
            return None;
        }

        let scale = self.backoff.multiplier.powf(f64::from(retry_count));
        let seconds = self.backoff.initial_delay.as_secs_f64() * scale;
        let capped_seconds = seconds.min(self.backoff.max_delay.as_secs_f64());
        Some(Duration::from_secs_f64(capped_seconds))
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    // period is clamped above zero, so with_period always yields a quota
    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
