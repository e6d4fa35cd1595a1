//! Run driver
//!
//! A bounded pool of workers pulls seeds from a shared queue and walks each
//! one to completion. Run-fatal errors (exhausted proxy pool, export I/O)
//! cancel the shared token so every worker winds down; the sink is always
//! finalized and the run always ends in a [`RunSummary`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::crawling::dedup::{Deduplicator, load_seen_ids};
use crate::crawling::export_sink::{ExportSink, sibling_path};
use crate::crawling::normalizer::ResponseNormalizer;
use crate::crawling::orchestrator::RequestOrchestrator;
use crate::crawling::pagination::{PaginationWalker, WalkLimits, WalkStop};
use crate::crawling::session::{RunSummary, SeedReport, SessionState, SummaryInputs};
use crate::domain::{ArtistRecord, HarvestError, Seed, SeedRef};
use crate::infrastructure::config::HarvestConfig;
use crate::infrastructure::http_transport::Transport;
use crate::infrastructure::proxy_pool::{ProxyPool, ProxyPoolConfig};
use crate::infrastructure::rate_limiter::RateLimiter;

const SUMMARY_SUFFIX: &str = ".summary.json";

pub struct Harvester {
    config: HarvestConfig,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

/// How a page's batch left the emit loop
enum BatchFlow {
    Continue,
    SeedCapReached,
    TotalCapReached,
    Cancelled,
    Aborted(HarvestError),
}

/// Everything a worker shares with its siblings
struct WorkerContext {
    orchestrator: Arc<RequestOrchestrator>,
    normalizer: ResponseNormalizer,
    dedup: Arc<Deduplicator>,
    sink: Arc<ExportSink>,
    session: Arc<SessionState>,
    queue: Mutex<VecDeque<(usize, Seed)>>,
    limits: WalkLimits,
    max_total: Option<u64>,
    cancel: CancellationToken,
}

impl Harvester {
    #[must_use]
    pub fn new(config: HarvestConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the run when cancelled (Ctrl-C, deadline)
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Harvest every seed and finalize the artifact.
    ///
    /// Fails only when the run cannot start (bad configuration, unusable
    /// output location); every later failure is reported in the summary.
    pub async fn run(&self, seeds: Vec<Seed>) -> Result<RunSummary, HarvestError> {
        self.config
            .validate()
            .map_err(|e| HarvestError::Configuration(e.to_string()))?;

        let session = Arc::new(SessionState::new());
        info!(
            "🚀 Harvest run {} starting: {} seeds, {} workers",
            session.run_id(),
            seeds.len(),
            self.config.crawl.concurrency
        );

        let (sink, recovery) = ExportSink::open(&self.config.export).await?;
        let dedup = Arc::new(Deduplicator::new());
        if let Some(path) = &self.config.export.seen_ids_path {
            dedup.extend(load_seen_ids(path).await?);
        }
        dedup.extend(recovery.records.iter().map(|record| record.id));
        session.add_recovered(recovery.records.len() as u64);

        let proxies = Arc::new(ProxyPool::new(
            self.config.network.proxies.clone(),
            ProxyPoolConfig {
                ban_threshold: self.config.network.ban_threshold,
                cooldown: self.config.network.ban_cooldown(),
            },
            self.config.network.proxy_rng_seed,
        ));
        let limiter = Arc::new(RateLimiter::new(&self.config.rate_limit));
        let orchestrator = Arc::new(RequestOrchestrator::new(
            &self.config,
            self.transport.clone(),
            proxies.clone(),
            limiter.clone(),
            self.cancel.clone(),
        ));

        let worker_count = self.config.crawl.concurrency.min(seeds.len());
        let context = Arc::new(WorkerContext {
            orchestrator: orchestrator.clone(),
            normalizer: ResponseNormalizer::new(),
            dedup,
            sink: Arc::new(sink),
            session: session.clone(),
            queue: Mutex::new(seeds.into_iter().enumerate().collect()),
            limits: WalkLimits {
                max_items: self.config.crawl.max_items_per_seed.map(u64::from),
                end_page: self.config.crawl.end_page,
            },
            max_total: self.config.crawl.max_items_total,
            cancel: self.cancel.clone(),
        });

        let deadline = self.spawn_deadline();
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(context.clone().run_worker(worker_id));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("❌ Harvest worker failed: {}", e);
            }
        }
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let cancelled = self.cancel.is_cancelled() && session.abort_reason().is_none();
        if cancelled {
            warn!("🛑 Run cancelled; finalizing records emitted so far");
        }

        let records_in_output = match context.sink.finalize().await {
            Ok(report) => Some(report.records),
            Err(e) => {
                error!("❌ Finalizing output failed: {}", e);
                session.record_abort(&e);
                None
            }
        };

        let summary = session.summarize(SummaryInputs {
            output_path: self.config.export.output_path.clone(),
            records_in_output,
            requests: orchestrator.stats(),
            rate_limit_permits: limiter.granted(),
            proxy_health: proxies.health_counts(),
            cancelled,
        });

        if self.config.export.write_summary {
            let path = sibling_path(&self.config.export.output_path, SUMMARY_SUFFIX);
            if let Err(e) = summary.write_to(&path).await {
                warn!("⚠️ Could not write run summary: {}", e);
            }
        }

        info!(
            "✅ Harvest run {} finished: {} emitted, {} duplicates, {} dropped, {} pages, {} failed seeds{}",
            summary.run_id,
            summary.records_emitted,
            summary.duplicates_skipped,
            summary.normalization_errors,
            summary.pages_fetched,
            summary.seeds_failed,
            summary
                .abort_reason
                .as_deref()
                .map(|reason| format!(" (aborted: {reason})"))
                .unwrap_or_default()
        );
        Ok(summary)
    }

    fn spawn_deadline(&self) -> Option<tokio::task::JoinHandle<()>> {
        let timeout = Duration::from_secs(self.config.crawl.run_timeout_secs?);
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    warn!("⏰ Run deadline of {:?} reached; cancelling", timeout);
                    cancel.cancel();
                }
            }
        }))
    }
}

impl WorkerContext {
    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        loop {
            if self.cancel.is_cancelled() || self.session.total_cap_reached(self.max_total) {
                break;
            }
            let next = self
                .queue
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            let Some((index, seed)) = next else {
                break;
            };

            let report = self.harvest_seed(worker_id, index, seed).await;
            self.session.push_report(report);
        }
    }

    async fn harvest_seed(&self, worker_id: usize, index: usize, seed: Seed) -> SeedReport {
        let seed_ref = SeedRef::new(index, &seed);
        let mut report = SeedReport::new(index, seed.to_string());
        info!("🌱 [worker {}] Harvesting {}", worker_id, seed_ref);

        let mut walker =
            PaginationWalker::new(self.orchestrator.clone(), seed, seed_ref.clone(), self.limits);
        let mut early_stop: Option<&'static str> = None;

        while let Some(page) = walker.next_page().await {
            report.pages += 1;
            self.session.add_page();

            let batch = self.normalizer.normalize(page.page);
            let dropped = batch.dropped() as u64;
            if dropped > 0 {
                report.dropped += dropped;
                self.session.add_normalization_errors(dropped);
            }

            let (emitted, flow) = self
                .emit_batch(batch.records, walker.remaining(), &mut report)
                .await;
            walker.record_emitted(emitted);
            report.emitted += emitted;

            match flow {
                BatchFlow::Continue | BatchFlow::SeedCapReached => {}
                BatchFlow::TotalCapReached => {
                    early_stop = Some("max_items_total");
                    break;
                }
                BatchFlow::Cancelled => {
                    early_stop = Some("cancelled");
                    break;
                }
                BatchFlow::Aborted(error) => {
                    self.abort(&error);
                    report.error = Some(error.to_string());
                    early_stop = Some("aborted");
                    break;
                }
            }
        }

        report.stop_reason = match (early_stop, walker.stop_reason()) {
            (Some(reason), _) => reason.to_string(),
            (None, Some(stop)) => stop.to_string(),
            (None, None) => "unknown".to_string(),
        };

        if let Some(error) = walker.stop_reason().and_then(WalkStop::error) {
            warn!("❌ {} failed after {} pages: {}", seed_ref, report.pages, error);
            report.error = Some(error.to_string());
            if error.is_run_fatal() {
                self.abort(error);
            }
        } else {
            info!(
                "✅ {} done: {} records over {} pages ({})",
                seed_ref, report.emitted, report.pages, report.stop_reason
            );
        }
        report
    }

    /// Dedup and emit one page's records, honouring both caps
    async fn emit_batch(
        &self,
        records: Vec<ArtistRecord>,
        remaining: Option<u64>,
        report: &mut SeedReport,
    ) -> (u64, BatchFlow) {
        let mut emitted = 0;
        for record in records {
            if self.cancel.is_cancelled() {
                return (emitted, BatchFlow::Cancelled);
            }
            if remaining.is_some_and(|left| emitted >= left) {
                return (emitted, BatchFlow::SeedCapReached);
            }
            if !self.dedup.accept(&record) {
                report.duplicates += 1;
                self.session.add_duplicate();
                continue;
            }
            if !self.session.reserve_emit(self.max_total) {
                return (emitted, BatchFlow::TotalCapReached);
            }
            if let Err(error) = self.sink.emit(&record).await {
                self.session.release_emit();
                return (emitted, BatchFlow::Aborted(error));
            }
            emitted += 1;
        }
        (emitted, BatchFlow::Continue)
    }

    fn abort(&self, error: &HarvestError) {
        if self.session.record_abort(error) {
            error!("⛔ Run aborted: {}", error);
        }
        self.cancel.cancel();
    }
}
