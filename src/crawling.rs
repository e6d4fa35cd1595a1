//! # Acquisition Pipeline
//!
//! Explicit module layout (no mod.rs):
//! - `orchestrator`: one logical fetch with retry, proxy rotation and rate limiting
//! - `pagination`: pull-based page walking per seed
//! - `normalizer`: raw payloads to `ArtistRecord`s
//! - `dedup` / `export_sink`: run-scoped filtering and durable output
//! - `harvester`: the bounded worker pool that drives a run

pub mod dedup;
pub mod export_sink;
pub mod harvester;
pub mod mock_transport;
pub mod normalizer;
pub mod orchestrator;
pub mod pagination;
pub mod retry_policy;
pub mod session;

pub use dedup::{Deduplicator, load_seen_ids};
pub use export_sink::{ExportSink, FinalizeReport, JournalRecovery, recover_journal};
pub use harvester::Harvester;
pub use normalizer::{NormalizedBatch, RawPage, RawUser, ResponseNormalizer};
pub use orchestrator::{RawPayload, RequestOrchestrator, RequestStats};
pub use pagination::{PaginationWalker, WalkLimits, WalkPage, WalkStop};
pub use retry_policy::{RetryPolicy, StatusClassifier};
pub use session::{RunSummary, SeedReport, SessionState};
