// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The store facade: transactional table operations over
//! journal + snapshot, plus the console log area.
//!
//! Mutations append to the journal (durable before return) and then
//! apply to the in-memory tables; a crash between the two replays the
//! entry on the next open. Readers take a short read lock and never
//! observe a half-applied mutation.

use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{error, info};

use vea_core::{AppId, AppKind, ApplicationRecord, DesiredState, RuntimeStateRecord};

use crate::journal::{Journal, JournalEntry, JournalError};
use crate::logs::{ConsoleLogs, LogRecord, LogStream};
use crate::snapshot::{Snapshot, SnapshotError};
use crate::tables::Tables;

/// Errors from store operations. `Corrupt` is fatal: the caller must
/// not attempt silent recovery.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store corrupt: {0}")]
    Corrupt(String),
}

impl From<JournalError> for StoreError {
    fn from(e: JournalError) -> Self {
        match e {
            JournalError::Io(io) => StoreError::Io(io),
            corrupt @ JournalError::Corrupt { .. } => StoreError::Corrupt(corrupt.to_string()),
        }
    }
}

impl From<SnapshotError> for StoreError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Io(io) => StoreError::Io(io),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

/// Filter for [`Store::list_applications`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppFilter {
    pub desired: Option<DesiredState>,
    pub kind: Option<AppKind>,
}

impl AppFilter {
    fn matches(&self, record: &ApplicationRecord) -> bool {
        self.desired.map_or(true, |d| record.desired_state == d)
            && self.kind.map_or(true, |k| record.kind == k)
    }
}

/// Store configuration, derived from the daemon's `data_dir`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub snapshot_path: PathBuf,
    pub journal_path: PathBuf,
    pub log_root: PathBuf,
    pub log_ring_bytes: u64,
    /// Checkpoint after this many journal entries.
    pub checkpoint_every: usize,
}

impl StoreConfig {
    /// Conventional layout under a data directory.
    pub fn under(data_dir: &std::path::Path) -> Self {
        Self {
            snapshot_path: data_dir.join("store.snapshot"),
            journal_path: data_dir.join("store.journal"),
            log_root: data_dir.join("log"),
            log_ring_bytes: 1024 * 1024,
            checkpoint_every: 256,
        }
    }
}

/// The persistent store.
pub struct Store {
    tables: RwLock<Tables>,
    journal: Mutex<Journal>,
    logs: ConsoleLogs,
    config: StoreConfig,
    entries_since_checkpoint: Mutex<usize>,
}

impl Store {
    /// Open the store: load the snapshot, replay the journal past it.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let snapshot = Snapshot::load(&config.snapshot_path)?;
        let (base_seq, mut tables) = match snapshot {
            Some(s) => (s.seq, s.tables),
            None => (0, Tables::default()),
        };

        let (journal, entries) = Journal::open(&config.journal_path, base_seq)?;
        let replayed = entries.len();
        for entry in &entries {
            tables.apply(entry);
        }
        if replayed > 0 {
            info!(replayed, base_seq, "replayed journal entries past snapshot");
        }

        Ok(Self {
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
            logs: ConsoleLogs::new(&config.log_root, config.log_ring_bytes),
            config,
            entries_since_checkpoint: Mutex::new(0),
        })
    }

    /// Append to the journal, then apply. Takes the journal lock for the
    /// whole mutation so concurrent writers serialize; the table write
    /// lock is held only for the in-memory apply.
    fn commit(&self, entry: JournalEntry) -> Result<(), StoreError> {
        {
            let mut journal = self.journal.lock();
            journal.append(&entry)?;
            self.tables.write().apply(&entry);
        }

        let due = {
            let mut count = self.entries_since_checkpoint.lock();
            *count += 1;
            *count >= self.config.checkpoint_every
        };
        if due {
            if let Err(e) = self.checkpoint() {
                // A failed checkpoint is not data loss; the journal holds
                // everything. Surface it loudly and carry on.
                error!(error = %e, "periodic checkpoint failed");
            }
        }
        Ok(())
    }

    // ── Application table ────────────────────────────────────────────────

    pub fn upsert_application(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        self.commit(JournalEntry::UpsertApplication { record: Box::new(record) })
    }

    pub fn delete_application(&self, app_id: &AppId) -> Result<(), StoreError> {
        self.commit(JournalEntry::DeleteApplication { app_id: app_id.clone() })?;
        self.logs.remove_app(app_id.as_str());
        Ok(())
    }

    pub fn get_application(&self, app_id: &AppId) -> Option<ApplicationRecord> {
        self.tables.read().applications.get(app_id.as_str()).cloned()
    }

    pub fn list_applications(&self, filter: AppFilter) -> Vec<ApplicationRecord> {
        let mut apps: Vec<ApplicationRecord> =
            self.tables.read().applications.values().filter(|r| filter.matches(r)).cloned().collect();
        apps.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        apps
    }

    // ── Runtime state table ──────────────────────────────────────────────

    pub fn upsert_runtime_state(&self, state: RuntimeStateRecord) -> Result<(), StoreError> {
        self.commit(JournalEntry::UpsertRuntimeState { state })
    }

    pub fn clear_runtime_state(&self, app_id: &AppId) -> Result<(), StoreError> {
        self.commit(JournalEntry::ClearRuntimeState { app_id: app_id.clone() })
    }

    pub fn get_runtime_state(&self, app_id: &AppId) -> Option<RuntimeStateRecord> {
        self.tables.read().runtime_states.get(app_id.as_str()).cloned()
    }

    // ── Console logs ─────────────────────────────────────────────────────

    /// Append a console line. Failures here never gate lifecycle
    /// progress; the caller logs and continues.
    pub fn append_log(
        &self,
        app_id: &AppId,
        execution_id: &str,
        stream: LogStream,
        line: &str,
    ) -> std::io::Result<LogRecord> {
        self.logs.append(app_id.as_str(), execution_id, stream, line)
    }

    pub fn tail_logs(&self, app_id: &AppId, n: usize) -> Vec<LogRecord> {
        self.logs.tail(app_id.as_str(), n)
    }

    pub fn forget_execution(&self, execution_id: &str) {
        self.logs.forget_execution(execution_id);
    }

    // ── Checkpointing ────────────────────────────────────────────────────

    /// Write a snapshot covering every committed entry and truncate the
    /// journal. Called on shutdown and periodically.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut journal = self.journal.lock();
        let tables = self.tables.read().clone();
        let seq = journal.seq();
        Snapshot::new(seq, tables).save(&self.config.snapshot_path)?;
        journal.reset(seq)?;
        *self.entries_since_checkpoint.lock() = 0;
        info!(seq, "store checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
