//! Retry policy and outcome classification
//!
//! Backoff for attempt `k` is `base * 2^(k-1)`, capped at `max_delay`, then
//! shifted by a uniform jitter in `[-jitter, +jitter]` and clamped back into
//! `[0, max_delay]`. Status classification comes from configuration tables
//! so ban/not-found semantics can be tuned without code changes.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EndpointKind, FetchOutcome, HarvestError};
use crate::infrastructure::config::{ClassificationConfig, RetryConfig};
use crate::infrastructure::http_transport::{HttpResponse, TransportError};
use crate::infrastructure::proxy_pool::ProxyOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered delay after attempt `attempt`, capped
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Jittered delay after attempt `attempt`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as i128;
        let jitter = self.jitter.as_millis().min(u128::from(u64::MAX)) as u64;
        let offset = if jitter == 0 {
            0
        } else {
            i128::from(fastrand::u64(0..=jitter.saturating_mul(2))) - i128::from(jitter)
        };
        let max = self.max_delay.as_millis() as i128;
        let millis = (nominal + offset).clamp(0, max);
        Duration::from_millis(millis as u64)
    }

    /// Jittered delay, stretched to a server `Retry-After` but never past the cap
    #[must_use]
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for(attempt);
        retry_after.map_or(delay, |hint| delay.max(hint).min(self.max_delay))
    }
}

/// Maps HTTP statuses and transport failures onto the error taxonomy
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    retryable: HashSet<u16>,
    retry_server_errors: bool,
    proxy_faults: HashSet<u16>,
}

impl StatusClassifier {
    #[must_use]
    pub fn from_config(config: &ClassificationConfig) -> Self {
        Self {
            retryable: config.retryable_statuses.iter().copied().collect(),
            retry_server_errors: config.retry_server_errors,
            proxy_faults: config.proxy_fault_statuses.iter().copied().collect(),
        }
    }

    /// Classify one HTTP response.
    ///
    /// A proxy-fault status seen through a proxy is retryable: the next
    /// attempt rotates to another endpoint.
    pub fn classify_response(
        &self,
        kind: EndpointKind,
        response: HttpResponse,
        via_proxy: bool,
    ) -> FetchOutcome<HttpResponse> {
        let status = response.status;
        if (200..300).contains(&status) {
            return FetchOutcome::Success(response);
        }

        if via_proxy && self.proxy_faults.contains(&status) {
            return FetchOutcome::Retryable(HarvestError::NetworkTransient {
                status: Some(status),
                message: format!("{kind:?} request blocked at the proxy with HTTP {status}"),
                retry_after: response.retry_after,
            });
        }

        if self.retryable.contains(&status) || (self.retry_server_errors && (500..600).contains(&status)) {
            return FetchOutcome::Retryable(HarvestError::NetworkTransient {
                status: Some(status),
                message: format!("{kind:?} request returned HTTP {status}"),
                retry_after: response.retry_after,
            });
        }

        let message = match (status, kind) {
            (404, EndpointKind::ProfileLookup) => "profile not found".to_string(),
            (404, _) => "listing not found".to_string(),
            _ => format!("{kind:?} request rejected with HTTP {status}"),
        };
        FetchOutcome::Fatal(HarvestError::fatal(Some(status), message))
    }

    /// Transport-level failures are always transient
    #[must_use]
    pub fn classify_transport(&self, error: &TransportError) -> HarvestError {
        HarvestError::transient(None, error.to_string())
    }

    /// Whether a response status should count against the egress endpoint
    #[must_use]
    pub fn proxy_outcome(&self, status: u16) -> ProxyOutcome {
        if self.proxy_faults.contains(&status) {
            ProxyOutcome::Failure
        } else {
            ProxyOutcome::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn policy(base_ms: u64, max_ms: u64, jitter_ms: u64) -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig {
            max_attempts: 3,
            base_delay_ms: base_ms,
            max_delay_ms: max_ms,
            jitter_ms,
        })
    }

    fn response(status: u16) -> HttpResponse {
        HttpResponse {
            status,
            body: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn nominal_delay_doubles_until_cap() {
        let policy = policy(100, 1_000, 0);
        let delays: Vec<u64> = (1..=6)
            .map(|k| policy.nominal_delay(k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(policy.nominal_delay(200), Duration::from_millis(1_000));
    }

    #[test]
    fn should_retry_until_max_attempts() {
        let policy = policy(100, 1_000, 0);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = policy(100, 2_000, 0);
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(60))),
            Duration::from_secs(2)
        );
        assert_eq!(policy.delay_with_hint(1, None), Duration::from_millis(100));
    }

    proptest! {
        #[test]
        fn jittered_delay_stays_in_bounds(
            base in 1u64..5_000,
            max in 1u64..120_000,
            jitter in 0u64..2_000,
            attempt in 1u32..12,
        ) {
            let policy = policy(base, max.max(base), jitter);
            let delay = policy.delay_for(attempt).as_millis() as u64;
            let nominal = policy.nominal_delay(attempt).as_millis() as u64;

            prop_assert!(delay <= max.max(base));
            prop_assert!(delay >= nominal.saturating_sub(jitter));
            prop_assert!(delay <= nominal + jitter);
        }
    }

    #[rstest]
    #[case(200, EndpointKind::KeywordSearch, "success")]
    #[case(429, EndpointKind::KeywordSearch, "retryable")]
    #[case(503, EndpointKind::CursorPage, "retryable")]
    #[case(408, EndpointKind::ProfileLookup, "retryable")]
    #[case(404, EndpointKind::ProfileLookup, "fatal")]
    #[case(400, EndpointKind::KeywordSearch, "fatal")]
    #[case(401, EndpointKind::CursorPage, "fatal")]
    #[case(403, EndpointKind::ProfileLookup, "fatal")]
    fn default_status_table(#[case] status: u16, #[case] kind: EndpointKind, #[case] expected: &str) {
        let classifier = StatusClassifier::from_config(&ClassificationConfig::default());
        let label = match classifier.classify_response(kind, response(status), false) {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::Retryable(_) => "retryable",
            FetchOutcome::Fatal(_) => "fatal",
        };
        assert_eq!(label, expected);
    }

    #[test]
    fn server_errors_can_be_made_fatal() {
        let classifier = StatusClassifier::from_config(&ClassificationConfig {
            retry_server_errors: false,
            ..ClassificationConfig::default()
        });
        assert!(matches!(
            classifier.classify_response(EndpointKind::KeywordSearch, response(500), false),
            FetchOutcome::Fatal(HarvestError::RequestFatal { status: Some(500), .. })
        ));
    }

    #[rstest]
    #[case(403)]
    #[case(407)]
    fn proxy_faults_are_retryable_only_through_a_proxy(#[case] status: u16) {
        let classifier = StatusClassifier::from_config(&ClassificationConfig::default());
        assert!(matches!(
            classifier.classify_response(EndpointKind::ProfileLookup, response(status), true),
            FetchOutcome::Retryable(HarvestError::NetworkTransient { .. })
        ));
        assert!(matches!(
            classifier.classify_response(EndpointKind::ProfileLookup, response(status), false),
            FetchOutcome::Fatal(_)
        ));
        // not a proxy fault: fatal either way
        assert!(matches!(
            classifier.classify_response(EndpointKind::ProfileLookup, response(404), true),
            FetchOutcome::Fatal(_)
        ));
    }

    #[test]
    fn proxy_fault_statuses() {
        let classifier = StatusClassifier::from_config(&ClassificationConfig::default());
        assert_eq!(classifier.proxy_outcome(429), ProxyOutcome::Failure);
        assert_eq!(classifier.proxy_outcome(403), ProxyOutcome::Failure);
        assert_eq!(classifier.proxy_outcome(404), ProxyOutcome::Success);
        assert_eq!(classifier.proxy_outcome(503), ProxyOutcome::Success);
    }
}
