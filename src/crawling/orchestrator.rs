//! Request orchestration
//!
//! Executes one logical fetch: every attempt takes a rate-limit token, picks
//! a (rotated) egress endpoint, goes through the [`Transport`], is classified,
//! and reports back to the proxy pool. Retryable outcomes back off and try
//! again until the attempt budget is spent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::retry_policy::{RetryPolicy, StatusClassifier};
use crate::domain::{FetchOutcome, HarvestError, RequestTask};
use crate::infrastructure::backend::BackendEndpoints;
use crate::infrastructure::config::HarvestConfig;
use crate::infrastructure::http_transport::{HttpRequest, HttpResponse, Transport};
use crate::infrastructure::proxy_pool::{ProxyLease, ProxyOutcome, ProxyPool};
use crate::infrastructure::rate_limiter::RateLimiter;

/// Successful response of one logical fetch
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub task: RequestTask,
    pub status: u16,
    pub body: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Attempt counters across every fetch of a run
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RequestStats {
    pub attempts: u64,
    pub failed_attempts: u64,
    pub fetches_failed: u64,
}

#[derive(Default)]
struct StatsCounters {
    attempts: AtomicU64,
    failed_attempts: AtomicU64,
    fetches_failed: AtomicU64,
}

pub struct RequestOrchestrator {
    transport: Arc<dyn Transport>,
    endpoints: BackendEndpoints,
    proxies: Arc<ProxyPool>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    classifier: StatusClassifier,
    acquire_timeout: Duration,
    direct_fallback: bool,
    cancel: CancellationToken,
    stats: StatsCounters,
}

impl RequestOrchestrator {
    #[must_use]
    pub fn new(
        config: &HarvestConfig,
        transport: Arc<dyn Transport>,
        proxies: Arc<ProxyPool>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            endpoints: BackendEndpoints::new(config.backend.clone()),
            proxies,
            limiter,
            policy: RetryPolicy::from_config(&config.retry),
            classifier: StatusClassifier::from_config(&config.classification),
            acquire_timeout: config.rate_limit.acquire_timeout(),
            direct_fallback: config.network.direct_fallback,
            cancel,
            stats: StatsCounters::default(),
        }
    }

    #[must_use]
    pub const fn endpoints(&self) -> &BackendEndpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn stats(&self) -> RequestStats {
        RequestStats {
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            failed_attempts: self.stats.failed_attempts.load(Ordering::Relaxed),
            fetches_failed: self.stats.fetches_failed.load(Ordering::Relaxed),
        }
    }

    /// Run one logical fetch to success, a fatal outcome, or retry exhaustion
    pub async fn fetch(&self, task: RequestTask) -> Result<RawPayload, HarvestError> {
        let result = self.fetch_inner(task).await;
        if matches!(&result, Err(e) if !matches!(e, HarvestError::Cancelled)) {
            self.stats.fetches_failed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn fetch_inner(&self, mut task: RequestTask) -> Result<RawPayload, HarvestError> {
        let url = self.endpoints.url_for(&task)?;
        let kind = task.kind();
        let mut last_error: Option<HarvestError> = None;

        for attempt in 1..=self.policy.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            task.attempt = attempt;

            let outcome = match self.limiter.acquire(self.acquire_timeout, &self.cancel).await {
                Ok(_permit) => self.attempt(&url, &task).await?,
                Err(HarvestError::Cancelled) => return Err(HarvestError::Cancelled),
                Err(e) => FetchOutcome::Retryable(e),
            };
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            match outcome {
                FetchOutcome::Success(response) => {
                    debug!(
                        "✅ {} page {} fetched (HTTP {}, attempt {})",
                        task.seed, task.page_index, response.status, attempt
                    );
                    return Ok(RawPayload {
                        status: response.status,
                        body: response.body,
                        attempts: attempt,
                        task,
                    });
                }
                FetchOutcome::Fatal(error) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    warn!("❌ {} {:?} failed fatally: {}", task.seed, kind, error);
                    return Err(error);
                }
                FetchOutcome::Retryable(error) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    if !self.policy.should_retry(attempt) {
                        warn!(
                            "❌ {} {:?} attempt {}/{} failed: {}",
                            task.seed, kind, attempt, self.policy.max_attempts, error
                        );
                        last_error = Some(error);
                        break;
                    }

                    let delay = self.policy.delay_with_hint(attempt, error.retry_after());
                    warn!(
                        "🔄 {} {:?} attempt {}/{} failed: {} (retrying in {:?})",
                        task.seed, kind, attempt, self.policy.max_attempts, error, delay
                    );
                    last_error = Some(error);
                    self.backoff(delay).await?;
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| HarvestError::transient(None, "no attempt was made"));
        Err(HarvestError::FetchExhausted {
            attempts: self.policy.max_attempts,
            last: Box::new(last),
        })
    }

    /// One request through one egress endpoint
    async fn attempt(
        &self,
        url: &str,
        task: &RequestTask,
    ) -> Result<FetchOutcome<HttpResponse>, HarvestError> {
        let lease = self.select_proxy()?;
        let request = HttpRequest {
            url: url.to_string(),
            proxy: lease.as_ref().map(|l| l.address.clone()),
        };
        debug!(
            "🌐 {} attempt {} via {}",
            task.seed,
            task.attempt,
            request.proxy.as_deref().unwrap_or("direct")
        );

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                if let Some(lease) = &lease {
                    self.proxies.release(lease);
                }
                return Err(HarvestError::Cancelled);
            }
            result = self.transport.get(&request) => result,
        };

        Ok(match result {
            Ok(response) => {
                self.report(lease.as_ref(), self.classifier.proxy_outcome(response.status));
                self.classifier
                    .classify_response(task.kind(), response, lease.is_some())
            }
            Err(error) => {
                self.report(lease.as_ref(), ProxyOutcome::Failure);
                FetchOutcome::Retryable(self.classifier.classify_transport(&error))
            }
        })
    }

    fn select_proxy(&self) -> Result<Option<ProxyLease>, HarvestError> {
        if self.proxies.is_empty() {
            return Ok(None);
        }
        match self.proxies.acquire() {
            Ok(lease) => Ok(Some(lease)),
            Err(error) if self.direct_fallback => {
                info!("🔀 {}; falling back to a direct request", error);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    fn report(&self, lease: Option<&ProxyLease>, outcome: ProxyOutcome) {
        if let Some(lease) = lease {
            self.proxies.report(lease, outcome);
        }
    }

    async fn backoff(&self, delay: Duration) -> Result<(), HarvestError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(HarvestError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
