//! Harvest error taxonomy
//!
//! Failures are classified once, where they happen, and the variant decides
//! how far they travel: retried inside the orchestrator, stop a single seed,
//! or abort the whole run.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum HarvestError {
    /// Timeout, connection reset, HTTP 429 or 5xx
    #[error("Network transient error{}: {message}", StatusSuffix(*.status))]
    NetworkTransient {
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// 404 on a profile lookup or any malformed-request 4xx
    #[error("Request fatal error{}: {message}", StatusSuffix(*.status))]
    RequestFatal { status: Option<u16>, message: String },

    #[error("Proxy pool exhausted: no eligible endpoint among {total}")]
    ProxyPoolExhausted { total: usize },

    #[error("Rate limit permit not granted within {waited:?}")]
    RateLimitTimeout { waited: Duration },

    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Export I/O error: {0}")]
    ExportIo(String),

    #[error("Fetch exhausted after {attempts} attempts: {last}")]
    FetchExhausted {
        attempts: u32,
        last: Box<HarvestError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

struct StatusSuffix(Option<u16>);

impl fmt::Display for StatusSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(status) => write!(f, " (HTTP {status})"),
            None => Ok(()),
        }
    }
}

impl HarvestError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::NetworkTransient {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RequestFatal {
            status,
            message: message.into(),
        }
    }

    pub fn export_io(context: &str, error: impl fmt::Display) -> Self {
        Self::ExportIo(format!("{context}: {error}"))
    }

    /// Retried by the orchestrator
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkTransient { .. } | Self::RateLimitTimeout { .. })
    }

    /// Stops every worker, not just the failing seed
    #[must_use]
    pub const fn is_run_fatal(&self) -> bool {
        matches!(self, Self::ProxyPoolExhausted { .. } | Self::ExportIo(_))
    }

    /// Short stable label for summaries and log fields
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NetworkTransient { .. } => "network_transient",
            Self::RequestFatal { .. } => "request_fatal",
            Self::ProxyPoolExhausted { .. } => "proxy_pool_exhausted",
            Self::RateLimitTimeout { .. } => "rate_limit_timeout",
            Self::Normalization(_) => "normalization",
            Self::ExportIo(_) => "export_io",
            Self::FetchExhausted { .. } => "fetch_exhausted",
            Self::Cancelled => "cancelled",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Server-requested delay, when one came with the failure
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::NetworkTransient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Classified result of a single request attempt
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Success(T),
    Retryable(HarvestError),
    Fatal(HarvestError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_and_run_fatal_classes() {
        assert!(HarvestError::transient(Some(429), "slow down").is_retryable());
        assert!(HarvestError::RateLimitTimeout { waited: Duration::from_secs(1) }.is_retryable());
        assert!(!HarvestError::fatal(Some(404), "gone").is_retryable());

        assert!(HarvestError::ProxyPoolExhausted { total: 3 }.is_run_fatal());
        assert!(HarvestError::export_io("write", "disk full").is_run_fatal());
        assert!(!HarvestError::fatal(Some(404), "gone").is_run_fatal());
    }

    #[test]
    fn display_includes_status_when_known() {
        let err = HarvestError::fatal(Some(404), "user not found");
        assert_eq!(err.to_string(), "Request fatal error (HTTP 404): user not found");

        let err = HarvestError::transient(None, "connection reset");
        assert_eq!(err.to_string(), "Network transient error: connection reset");

        let exhausted = HarvestError::FetchExhausted {
            attempts: 3,
            last: Box::new(HarvestError::transient(Some(503), "unavailable")),
        };
        assert!(exhausted.to_string().contains("after 3 attempts"));
        assert_eq!(exhausted.kind(), "fetch_exhausted");
    }
}
