//! Per-run session state and the summary it reduces to

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::crawling::orchestrator::RequestStats;
use crate::domain::HarvestError;
use crate::infrastructure::proxy_pool::ProxyHealthCounts;

/// Outcome of one seed's traversal
#[derive(Debug, Clone, Serialize)]
pub struct SeedReport {
    pub index: usize,
    pub seed: String,
    pub pages: u32,
    pub emitted: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub stop_reason: String,
    pub error: Option<String>,
}

impl SeedReport {
    #[must_use]
    pub fn new(index: usize, seed: impl Into<String>) -> Self {
        Self {
            index,
            seed: seed.into(),
            pages: 0,
            emitted: 0,
            duplicates: 0,
            dropped: 0,
            stop_reason: String::new(),
            error: None,
        }
    }

    #[must_use]
    pub const fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Counters and reports for a single run; dropped at run end
#[derive(Debug)]
pub struct SessionState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    emitted: AtomicU64,
    recovered: AtomicU64,
    duplicates: AtomicU64,
    normalization_errors: AtomicU64,
    pages_fetched: AtomicU64,
    total_cap_hit: AtomicBool,
    reports: Mutex<Vec<SeedReport>>,
    abort_reason: Mutex<Option<String>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            emitted: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            normalization_errors: AtomicU64::new(0),
            pages_fetched: AtomicU64::new(0),
            total_cap_hit: AtomicBool::new(false),
            reports: Mutex::new(Vec::new()),
            abort_reason: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Claim one slot under the per-run total cap. Returns `false`, and
    /// latches the cap as reached, once `max_total` records were emitted.
    pub fn reserve_emit(&self, max_total: Option<u64>) -> bool {
        let reserved = self
            .emitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                match max_total {
                    Some(max) if current >= max => None,
                    _ => Some(current + 1),
                }
            })
            .is_ok();
        if !reserved {
            self.total_cap_hit.store(true, Ordering::Release);
        }
        reserved
    }

    /// Give back a slot whose record was never written
    pub fn release_emit(&self) {
        self.emitted.fetch_sub(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn total_cap_reached(&self, max_total: Option<u64>) -> bool {
        self.total_cap_hit.load(Ordering::Acquire)
            || max_total.is_some_and(|max| self.emitted.load(Ordering::Acquire) >= max)
    }

    pub fn add_recovered(&self, count: u64) {
        self.recovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_normalization_errors(&self, count: u64) {
        self.normalization_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_page(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Acquire)
    }

    pub fn push_report(&self, report: SeedReport) {
        self.reports
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(report);
    }

    /// First run-fatal error wins; later ones are ignored
    pub fn record_abort(&self, error: &HarvestError) -> bool {
        let mut reason = self
            .abort_reason
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if reason.is_some() {
            return false;
        }
        *reason = Some(error.to_string());
        true
    }

    #[must_use]
    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Snapshot the run into its summary
    pub fn summarize(&self, finish: SummaryInputs) -> RunSummary {
        let mut seeds = self
            .reports
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        seeds.sort_by_key(|report| report.index);
        let abort_reason = self.abort_reason();

        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            output_path: finish.output_path,
            records_emitted: self.emitted(),
            records_recovered: self.recovered.load(Ordering::Relaxed),
            records_in_output: finish.records_in_output,
            duplicates_skipped: self.duplicates.load(Ordering::Relaxed),
            normalization_errors: self.normalization_errors.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            requests: finish.requests,
            rate_limit_permits: finish.rate_limit_permits,
            proxy_health: finish.proxy_health,
            seeds_failed: seeds.iter().filter(|s| s.failed()).count(),
            seeds,
            aborted: abort_reason.is_some(),
            abort_reason,
            cancelled: finish.cancelled,
        }
    }
}

/// Figures only known once workers are done
#[derive(Debug, Clone)]
pub struct SummaryInputs {
    pub output_path: PathBuf,
    pub records_in_output: Option<usize>,
    pub requests: RequestStats,
    pub rate_limit_permits: u64,
    pub proxy_health: ProxyHealthCounts,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub output_path: PathBuf,
    pub records_emitted: u64,
    pub records_recovered: u64,
    /// `None` when finalize failed
    pub records_in_output: Option<usize>,
    pub duplicates_skipped: u64,
    pub normalization_errors: u64,
    pub pages_fetched: u64,
    pub requests: RequestStats,
    pub rate_limit_permits: u64,
    pub proxy_health: ProxyHealthCounts,
    pub seeds_failed: usize,
    pub seeds: Vec<SeedReport>,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub cancelled: bool,
}

impl RunSummary {
    /// Pretty JSON next to the artifact
    pub async fn write_to(&self, path: &Path) -> Result<(), HarvestError> {
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| HarvestError::export_io("serializing run summary", e))?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| HarvestError::export_io(&format!("writing {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> SummaryInputs {
        SummaryInputs {
            output_path: PathBuf::from("out.json"),
            records_in_output: Some(0),
            requests: RequestStats::default(),
            rate_limit_permits: 0,
            proxy_health: ProxyHealthCounts::default(),
            cancelled: false,
        }
    }

    #[test]
    fn total_cap_reservations() {
        let session = SessionState::new();
        assert!(session.reserve_emit(Some(2)));
        assert!(session.reserve_emit(Some(2)));
        assert!(!session.total_cap_reached(Some(3)));
        assert!(!session.reserve_emit(Some(2)));
        assert!(session.total_cap_reached(Some(2)));

        session.release_emit();
        assert_eq!(session.emitted(), 1);
    }

    #[test]
    fn uncapped_reservations_always_succeed() {
        let session = SessionState::new();
        for _ in 0..10 {
            assert!(session.reserve_emit(None));
        }
        assert!(!session.total_cap_reached(None));
    }

    #[test]
    fn first_abort_reason_is_kept() {
        let session = SessionState::new();
        assert!(session.record_abort(&HarvestError::ProxyPoolExhausted { total: 2 }));
        assert!(!session.record_abort(&HarvestError::ExportIo("disk".into())));
        assert!(session.abort_reason().unwrap().contains("Proxy pool exhausted"));
    }

    #[test]
    fn summary_orders_seed_reports() {
        let session = SessionState::new();
        let mut failed = SeedReport::new(1, "user:404");
        failed.error = Some("not found".into());
        session.push_report(failed);
        session.push_report(SeedReport::new(0, "keyword:lofi"));
        session.add_page();
        session.add_duplicate();

        let summary = session.summarize(inputs());
        let order: Vec<usize> = summary.seeds.iter().map(|s| s.index).collect();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(summary.seeds_failed, 1);
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.duplicates_skipped, 1);
        assert!(!summary.aborted);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("rate_limit_permits").is_some());
        assert!(json["abort_reason"].is_null());
    }
}
