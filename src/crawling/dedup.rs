//! Run-scoped deduplication by artist id

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::info;

use crate::domain::{ArtistRecord, HarvestError};

#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<u64>>,
    rejected: AtomicU64,
}

impl Deduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with ids from an earlier run already marked as seen
    #[must_use]
    pub fn with_seed_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            seen: Mutex::new(ids.into_iter().collect()),
            rejected: AtomicU64::new(0),
        }
    }

    /// `true` the first time an id is offered, `false` ever after
    pub fn accept(&self, record: &ArtistRecord) -> bool {
        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(record.id);
        if !fresh {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Mark ids as seen without counting them as duplicates
    pub fn extend(&self, ids: impl IntoIterator<Item = u64>) {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend(ids);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Duplicates turned away so far
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Ids from a prior output artifact (JSON array) or journal (JSON lines).
///
/// Unreadable lines are skipped, a missing file is an error.
pub async fn load_seen_ids(path: &Path) -> Result<HashSet<u64>, HarvestError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| HarvestError::export_io(&format!("reading seen ids from {}", path.display()), e))?;

    let ids = if content.trim_start().starts_with('[') {
        match serde_json::from_str::<Vec<Value>>(&content) {
            Ok(entries) => entries.iter().filter_map(entry_id).collect(),
            Err(e) => {
                return Err(HarvestError::export_io(
                    &format!("parsing artifact {}", path.display()),
                    e,
                ));
            }
        }
    } else {
        content
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|entry| entry_id(&entry))
            .collect::<HashSet<_>>()
    };

    info!("📝 Loaded {} previously seen ids from {}", ids.len(), path.display());
    Ok(ids)
}

fn entry_id(entry: &Value) -> Option<u64> {
    entry.get("id").and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn accepts_each_id_once() {
        let dedup = Deduplicator::new();
        assert!(dedup.accept(&ArtistRecord::with_id(1)));
        assert!(!dedup.accept(&ArtistRecord::with_id(1)));
        assert!(dedup.accept(&ArtistRecord::with_id(2)));
        assert_eq!(dedup.len(), 2);
        assert_eq!(dedup.rejected(), 1);
    }

    #[test]
    fn seeded_ids_are_rejected() {
        let dedup = Deduplicator::with_seed_ids([5, 6]);
        assert!(!dedup.accept(&ArtistRecord::with_id(5)));
        dedup.extend([7]);
        assert!(!dedup.accept(&ArtistRecord::with_id(7)));
        assert!(dedup.accept(&ArtistRecord::with_id(8)));
    }

    #[tokio::test]
    async fn concurrent_offers_admit_exactly_one() {
        let dedup = Arc::new(Deduplicator::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = dedup.clone();
                tokio::spawn(async move { dedup.accept(&ArtistRecord::with_id(42)) })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(dedup.rejected(), 15);
    }

    #[tokio::test]
    async fn loads_ids_from_artifact_and_journal() {
        let dir = TempDir::new().unwrap();

        let artifact = dir.path().join("out.json");
        tokio::fs::write(&artifact, r#"[{"id": 1}, {"id": 2}, {"name": "no id"}]"#)
            .await
            .unwrap();
        let ids = load_seen_ids(&artifact).await.unwrap();
        assert_eq!(ids, HashSet::from([1, 2]));

        let journal = dir.path().join("out.json.journal.jsonl");
        tokio::fs::write(&journal, "{\"id\": 3}\n{\"id\": 4}\n{\"id\": 5, \"torn")
            .await
            .unwrap();
        let ids = load_seen_ids(&journal).await.unwrap();
        assert_eq!(ids, HashSet::from([3, 4]));

        assert!(load_seen_ids(&dir.path().join("missing.json")).await.is_err());
    }
}
