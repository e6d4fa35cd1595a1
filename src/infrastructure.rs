//! Infrastructure layer - configuration, logging and the network edge
//!
//! Everything that touches the outside world or is shared process-wide:
//! configuration loading, logging setup, the HTTP transport, backend URL
//! shapes, the egress proxy pool and the request rate limiter.

pub mod backend;
pub mod config;
pub mod http_transport;
pub mod logging;
pub mod proxy_pool;
pub mod rate_limiter;

pub use backend::BackendEndpoints;
pub use config::{HarvestConfig, SeedInput, load_seed_input};
pub use http_transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
pub use logging::init_logging_with_config;
pub use proxy_pool::{ProxyHealth, ProxyLease, ProxyOutcome, ProxyPool, ProxyPoolConfig};
pub use rate_limiter::RateLimiter;
