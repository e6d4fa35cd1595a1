//! Streaming export with atomic finalize
//!
//! Accepted records are appended to `<output>.journal.jsonl`, one JSON line
//! each, flushed per record and `fsync`ed every `sync_every` records.
//! [`ExportSink::finalize`] rebuilds the JSON array from the journal, writes
//! it to `<output>.tmp`, syncs, renames it over `<output>` and removes the
//! journal. Until then the previous artifact stays untouched.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{ArtistRecord, HarvestError};
use crate::infrastructure::config::ExportConfig;

const JOURNAL_SUFFIX: &str = ".journal.jsonl";
const TMP_SUFFIX: &str = ".tmp";

/// `<path><suffix>`, keeping the full file name
#[must_use]
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[must_use]
pub fn journal_path(output: &Path) -> PathBuf {
    sibling_path(output, JOURNAL_SUFFIX)
}

/// What survived from an earlier, unfinished run
#[derive(Debug, Default)]
pub struct JournalRecovery {
    pub records: Vec<ArtistRecord>,
    /// Complete lines that did not decode
    pub skipped_lines: usize,
    /// Bytes of an unterminated final line
    pub torn_bytes: usize,
}

/// Read a journal back, dropping a torn final line
pub async fn recover_journal(path: &Path) -> Result<JournalRecovery, HarvestError> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| HarvestError::export_io(&format!("reading journal {}", path.display()), e))?;

    let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
    let mut recovery = JournalRecovery {
        torn_bytes: bytes.len() - complete,
        ..JournalRecovery::default()
    };

    for line in bytes[..complete].split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<ArtistRecord>(line) {
            Ok(record) => recovery.records.push(record),
            Err(_) => recovery.skipped_lines += 1,
        }
    }
    Ok(recovery)
}

#[derive(Debug)]
struct SinkState {
    journal: Option<File>,
    written: u64,
    unsynced: usize,
}

#[derive(Debug)]
pub struct ExportSink {
    output: PathBuf,
    journal_path: PathBuf,
    sync_every: usize,
    state: Mutex<SinkState>,
}

/// Result of a successful finalize
#[derive(Debug, Clone)]
pub struct FinalizeReport {
    pub path: PathBuf,
    pub records: usize,
}

impl ExportSink {
    /// Open the journal for `config.output_path`.
    ///
    /// With `resume`, an existing journal is recovered and its records are
    /// returned so the caller can seed deduplication; otherwise a stale
    /// journal is moved aside and a fresh one started.
    pub async fn open(config: &ExportConfig) -> Result<(Self, JournalRecovery), HarvestError> {
        let output = config.output_path.clone();
        let journal_path = journal_path(&output);

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HarvestError::export_io(&format!("creating {}", parent.display()), e))?;
        }

        let mut recovery = JournalRecovery::default();
        if fs::try_exists(&journal_path).await.unwrap_or(false) {
            if config.resume {
                recovery = recover_journal(&journal_path).await?;
                info!(
                    "📝 Recovered {} records from journal {} ({} bad lines, {} torn bytes)",
                    recovery.records.len(),
                    journal_path.display(),
                    recovery.skipped_lines,
                    recovery.torn_bytes
                );
                if recovery.torn_bytes > 0 || recovery.skipped_lines > 0 {
                    rewrite_journal(&journal_path, &recovery.records).await?;
                }
            } else {
                let aside = sibling_path(
                    &journal_path,
                    &format!(".stale-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")),
                );
                fs::rename(&journal_path, &aside)
                    .await
                    .map_err(|e| HarvestError::export_io("moving stale journal aside", e))?;
                warn!("📝 Stale journal moved to {}", aside.display());
            }
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .await
            .map_err(|e| HarvestError::export_io(&format!("opening journal {}", journal_path.display()), e))?;

        let sink = Self {
            output,
            journal_path,
            sync_every: config.sync_every.max(1),
            state: Mutex::new(SinkState {
                journal: Some(journal),
                written: recovery.records.len() as u64,
                unsynced: 0,
            }),
        };
        Ok((sink, recovery))
    }

    #[must_use]
    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Records in the journal, recovered ones included
    pub async fn written(&self) -> u64 {
        self.state.lock().await.written
    }

    /// Append one record. The line is fully serialized before the lock is
    /// taken, so a failure never leaves a partial line behind.
    pub async fn emit(&self, record: &ArtistRecord) -> Result<(), HarvestError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| HarvestError::export_io(&format!("serializing record {}", record.id), e))?;
        line.push(b'\n');

        let mut state = self.state.lock().await;
        let sync_every = self.sync_every;
        let SinkState { journal, written, unsynced } = &mut *state;
        let file = journal
            .as_mut()
            .ok_or_else(|| HarvestError::ExportIo("sink already finalized".into()))?;

        file.write_all(&line)
            .await
            .map_err(|e| HarvestError::export_io("appending to journal", e))?;
        file.flush()
            .await
            .map_err(|e| HarvestError::export_io("flushing journal", e))?;

        *written += 1;
        *unsynced += 1;
        if *unsynced >= sync_every {
            file.sync_data()
                .await
                .map_err(|e| HarvestError::export_io("syncing journal", e))?;
            *unsynced = 0;
            debug!("📝 Journal synced at {} records", written);
        }
        Ok(())
    }

    /// Atomically replace the output with everything journaled so far
    pub async fn finalize(&self) -> Result<FinalizeReport, HarvestError> {
        let mut state = self.state.lock().await;
        let Some(journal) = state.journal.take() else {
            return Err(HarvestError::ExportIo("sink already finalized".into()));
        };
        journal
            .sync_all()
            .await
            .map_err(|e| HarvestError::export_io("syncing journal", e))?;
        drop(journal);

        let recovery = recover_journal(&self.journal_path).await?;
        if recovery.skipped_lines > 0 || recovery.torn_bytes > 0 {
            warn!(
                "📝 Journal had {} undecodable lines and {} torn bytes at finalize",
                recovery.skipped_lines, recovery.torn_bytes
            );
        }

        let body = serde_json::to_vec_pretty(&recovery.records)
            .map_err(|e| HarvestError::export_io("serializing output", e))?;
        let tmp = sibling_path(&self.output, TMP_SUFFIX);
        write_synced(&tmp, &body).await?;
        fs::rename(&tmp, &self.output)
            .await
            .map_err(|e| HarvestError::export_io(&format!("replacing {}", self.output.display()), e))?;
        fs::remove_file(&self.journal_path)
            .await
            .map_err(|e| HarvestError::export_io("removing journal", e))?;

        info!(
            "💾 Wrote {} records to {}",
            recovery.records.len(),
            self.output.display()
        );
        Ok(FinalizeReport {
            path: self.output.clone(),
            records: recovery.records.len(),
        })
    }
}

async fn write_synced(path: &Path, body: &[u8]) -> Result<(), HarvestError> {
    let context = format!("writing {}", path.display());
    let mut file = File::create(path)
        .await
        .map_err(|e| HarvestError::export_io(&context, e))?;
    file.write_all(body)
        .await
        .map_err(|e| HarvestError::export_io(&context, e))?;
    file.sync_all()
        .await
        .map_err(|e| HarvestError::export_io(&context, e))
}

/// Replace a damaged journal with its recovered records
async fn rewrite_journal(path: &Path, records: &[ArtistRecord]) -> Result<(), HarvestError> {
    let mut body = Vec::new();
    for record in records {
        serde_json::to_writer(&mut body, record)
            .map_err(|e| HarvestError::export_io("serializing recovered record", e))?;
        body.push(b'\n');
    }
    let tmp = sibling_path(path, TMP_SUFFIX);
    write_synced(&tmp, &body).await?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| HarvestError::export_io("replacing journal", e))
}
