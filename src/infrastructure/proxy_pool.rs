//! Egress proxy pool
//!
//! Health state machine per endpoint:
//!
//! ```text
//! healthy --failure--> suspected --failures >= ban_threshold--> banned
//!    ^                     |                                      |
//!    +------success--------+                         cool-down elapsed
//!    +-----------------trial success------------- half-open trial
//!                                     trial failure -> banned (new cool-down)
//! ```
//!
//! Selection is round-robin. Suspected endpoints are skipped with a
//! probability proportional to their failure count, but still serve when
//! nothing healthier is available.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyHealth {
    Healthy,
    Suspected,
    Banned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    Failure,
}

/// One egress endpoint and its health bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct ProxyEndpoint {
    pub address: String,
    pub health: ProxyHealth,
    pub consecutive_failures: u32,
    pub last_used: Option<DateTime<Utc>>,
    #[serde(skip)]
    banned_at: Option<Instant>,
    #[serde(skip)]
    trial_in_flight: bool,
}

impl ProxyEndpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            health: ProxyHealth::Healthy,
            consecutive_failures: 0,
            last_used: None,
            banned_at: None,
            trial_in_flight: false,
        }
    }
}

/// Handle for one request attempt through one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    pub index: usize,
    pub address: String,
    /// Half-open trial of a banned endpoint
    pub trial: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ProxyPoolConfig {
    pub ban_threshold: u32,
    pub cooldown: Duration,
}

#[derive(Debug)]
struct PoolInner {
    endpoints: Vec<ProxyEndpoint>,
    cursor: usize,
    rng: fastrand::Rng,
}

#[derive(Debug)]
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    config: ProxyPoolConfig,
}

/// Per-health counts for run summaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyHealthCounts {
    pub healthy: usize,
    pub suspected: usize,
    pub banned: usize,
}

impl ProxyPool {
    #[must_use]
    pub fn new(addresses: Vec<String>, config: ProxyPoolConfig, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        let endpoints: Vec<_> = addresses.into_iter().map(ProxyEndpoint::new).collect();
        if !endpoints.is_empty() {
            info!(
                "🔀 Proxy pool initialized with {} endpoints (ban after {} failures, cool-down {:?})",
                endpoints.len(),
                config.ban_threshold,
                config.cooldown
            );
        }
        Self {
            inner: Mutex::new(PoolInner {
                endpoints,
                cursor: 0,
                rng,
            }),
            config,
        }
    }

    /// Empty pool: requests go out directly
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        // Bookkeeping stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Pick the endpoint for the next attempt
    pub fn acquire(&self) -> Result<ProxyLease, HarvestError> {
        let mut inner = self.lock();
        let total = inner.endpoints.len();
        if total == 0 {
            return Err(HarvestError::ProxyPoolExhausted { total });
        }

        let now = Instant::now();
        let start = inner.cursor;
        let mut fallback: Option<usize> = None;
        let mut chosen: Option<(usize, bool)> = None;

        for step in 0..total {
            let index = (start + step) % total;
            let endpoint = &inner.endpoints[index];
            match endpoint.health {
                ProxyHealth::Healthy => {
                    chosen = Some((index, false));
                    break;
                }
                ProxyHealth::Suspected => {
                    let skip_probability = f64::from(endpoint.consecutive_failures)
                        / f64::from(self.config.ban_threshold.max(1));
                    if inner.rng.f64() < skip_probability {
                        fallback.get_or_insert(index);
                        continue;
                    }
                    chosen = Some((index, false));
                    break;
                }
                ProxyHealth::Banned => {
                    let cooled = endpoint
                        .banned_at
                        .is_none_or(|at| now.duration_since(at) >= self.config.cooldown);
                    if cooled && !endpoint.trial_in_flight {
                        chosen = Some((index, true));
                        break;
                    }
                }
            }
        }

        let (index, trial) = chosen
            .or_else(|| fallback.map(|index| (index, false)))
            .ok_or(HarvestError::ProxyPoolExhausted { total })?;

        inner.cursor = (index + 1) % total;
        let endpoint = &mut inner.endpoints[index];
        endpoint.last_used = Some(Utc::now());
        if trial {
            endpoint.trial_in_flight = true;
            info!("🧪 Half-open trial for banned proxy {}", endpoint.address);
        }
        debug!("Proxy {} selected ({:?})", endpoint.address, endpoint.health);

        Ok(ProxyLease {
            index,
            address: endpoint.address.clone(),
            trial,
        })
    }

    /// Feed an attempt's outcome back into the endpoint's health
    pub fn report(&self, lease: &ProxyLease, outcome: ProxyOutcome) {
        let ban_threshold = self.config.ban_threshold;
        let mut inner = self.lock();
        let Some(endpoint) = inner.endpoints.get_mut(lease.index) else {
            return;
        };
        if lease.trial {
            endpoint.trial_in_flight = false;
        }

        match outcome {
            ProxyOutcome::Success => {
                if endpoint.health != ProxyHealth::Healthy {
                    info!("✅ Proxy {} recovered", endpoint.address);
                }
                endpoint.health = ProxyHealth::Healthy;
                endpoint.consecutive_failures = 0;
                endpoint.banned_at = None;
            }
            ProxyOutcome::Failure => {
                endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
                if lease.trial || endpoint.consecutive_failures >= ban_threshold {
                    endpoint.health = ProxyHealth::Banned;
                    endpoint.banned_at = Some(Instant::now());
                    warn!(
                        "⛔ Proxy {} banned after {} consecutive failures",
                        endpoint.address, endpoint.consecutive_failures
                    );
                } else {
                    endpoint.health = ProxyHealth::Suspected;
                    debug!(
                        "Proxy {} suspected ({} failures)",
                        endpoint.address, endpoint.consecutive_failures
                    );
                }
            }
        }
    }

    /// Hand a lease back without an outcome (the attempt was abandoned)
    pub fn release(&self, lease: &ProxyLease) {
        if !lease.trial {
            return;
        }
        if let Some(endpoint) = self.lock().endpoints.get_mut(lease.index) {
            endpoint.trial_in_flight = false;
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<ProxyEndpoint> {
        self.lock().endpoints.clone()
    }

    #[must_use]
    pub fn health_counts(&self) -> ProxyHealthCounts {
        self.lock()
            .endpoints
            .iter()
            .fold(ProxyHealthCounts::default(), |mut counts, endpoint| {
                match endpoint.health {
                    ProxyHealth::Healthy => counts.healthy += 1,
                    ProxyHealth::Suspected => counts.suspected += 1,
                    ProxyHealth::Banned => counts.banned += 1,
                }
                counts
            })
    }
}
