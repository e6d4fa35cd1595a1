//! Process-wide request rate limiter
//!
//! Token bucket (governor) shared by every worker of a run. Each request
//! attempt, retries included, takes one token, so the aggregate request rate
//! is bounded independently of worker concurrency.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::{
    Quota, RateLimiter as GovernorLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::HarvestError;
use crate::infrastructure::config::RateLimitConfig;

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Proof that a token was taken; carries how long the caller waited
#[derive(Debug, Clone, Copy)]
pub struct RatePermit {
    pub waited: Duration,
}

pub struct RateLimiter {
    limiter: Option<DirectLimiter>,
    granted: AtomicU64,
    timed_out: AtomicU64,
}

impl RateLimiter {
    /// `requests_per_second == 0` disables limiting
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let limiter = NonZeroU32::new(config.requests_per_second).map(|rate| {
            let burst = NonZeroU32::new(config.burst).unwrap_or(rate);
            info!("🎫 Rate limiter: {} req/s, burst {}", rate, burst);
            GovernorLimiter::direct(Quota::per_second(rate).allow_burst(burst))
        });
        if limiter.is_none() {
            info!("🔓 Rate limiting disabled (requests_per_second = 0)");
        }
        Self {
            limiter,
            granted: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Wait for a token, giving up at `deadline` or when the run is cancelled.
    ///
    /// Only the calling worker waits; a timed-out or cancelled wait consumes
    /// no token.
    pub async fn acquire(
        &self,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<RatePermit, HarvestError> {
        let Some(limiter) = &self.limiter else {
            self.granted.fetch_add(1, Ordering::Relaxed);
            return Ok(RatePermit { waited: Duration::ZERO });
        };

        let started = tokio::time::Instant::now();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HarvestError::Cancelled),
            ready = tokio::time::timeout(deadline, limiter.until_ready()) => match ready {
                Ok(()) => {
                    self.granted.fetch_add(1, Ordering::Relaxed);
                    let waited = started.elapsed();
                    debug!("🎫 Token acquired after {:?}", waited);
                    Ok(RatePermit { waited })
                }
                Err(_) => {
                    self.timed_out.fetch_add(1, Ordering::Relaxed);
                    Err(HarvestError::RateLimitTimeout { waited: deadline })
                }
            },
        }
    }

    /// Permits handed out so far
    #[must_use]
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }
}
