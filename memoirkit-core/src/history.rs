//! Persisted backup history.
//!
//! The history is the only pipeline state that outlives a run: aggregate
//! counters, a bounded list of terminal status lines and the partial uploads
//! still waiting for cleanup. The health reporter reads nothing else.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{BackupResult, ErrorCode};
use crate::lock::RunLock;
use crate::platform::SecretStore;
use crate::types::BackupId;
use crate::utils::{decode_cbor, encode_cbor};

/// Secret store entry holding the history.
pub(crate) const HISTORY_KEY: &str = "memoirkit.backup.history";

/// Status lines kept, newest last.
pub const MAX_HISTORY_ENTRIES: usize = 50;

/// Which pipeline produced a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunKind {
    /// A backup run.
    Backup,
    /// A restore run.
    Restore,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    /// The run finished.
    Completed,
    /// The run failed.
    Failed,
}

/// One terminal status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Which pipeline ran.
    pub run_kind: RunKind,
    /// The backup involved, once one was allocated.
    pub backup_id: Option<BackupId>,
    /// How the run ended.
    pub status: RunStatus,
    /// Stable error code of a failed run.
    pub error_code: Option<String>,
    /// When the run ended (unix seconds).
    pub at: u64,
}

impl HistoryEntry {
    /// A completed run.
    #[must_use]
    pub const fn completed(run_kind: RunKind, backup_id: BackupId, at: u64) -> Self {
        Self {
            run_kind,
            backup_id: Some(backup_id),
            status: RunStatus::Completed,
            error_code: None,
            at,
        }
    }

    /// A failed run.
    #[must_use]
    pub fn failed(run_kind: RunKind, backup_id: Option<BackupId>, code: ErrorCode, at: u64) -> Self {
        Self {
            run_kind,
            backup_id,
            status: RunStatus::Failed,
            error_code: Some(code.to_string()),
            at,
        }
    }
}

/// Aggregate backup counters and recent status lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHistory {
    /// Completed backups ever made.
    pub total_backups: u64,
    /// Ciphertext bytes currently held in object storage.
    pub storage_used_bytes: u64,
    /// Time of the last completed backup.
    pub last_backup_at: Option<u64>,
    /// Recent status lines, oldest first.
    pub entries: Vec<HistoryEntry>,
    /// Failed backups whose partial chunks could not be deleted yet.
    #[serde(default)]
    pub pending_cleanup: Vec<BackupId>,
}

impl BackupHistory {
    /// Appends a status line, dropping the oldest beyond the bound.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_HISTORY_ENTRIES {
            let excess = self.entries.len() - MAX_HISTORY_ENTRIES;
            self.entries.drain(..excess);
        }
    }

    /// Records a completed backup.
    pub fn record_backup(&mut self, backup_id: BackupId, ciphertext_bytes: u64, at: u64) {
        self.total_backups = self.total_backups.saturating_add(1);
        self.storage_used_bytes = self.storage_used_bytes.saturating_add(ciphertext_bytes);
        self.last_backup_at = Some(self.last_backup_at.map_or(at, |last| last.max(at)));
        self.push(HistoryEntry::completed(RunKind::Backup, backup_id, at));
    }

    /// Records a deleted backup's storage being released.
    pub const fn release_storage(&mut self, ciphertext_bytes: u64) {
        self.storage_used_bytes = self.storage_used_bytes.saturating_sub(ciphertext_bytes);
    }

    /// Remembers a partial upload for a later cleanup attempt.
    pub fn defer_cleanup(&mut self, backup_id: BackupId) {
        if !self.pending_cleanup.contains(&backup_id) {
            self.pending_cleanup.push(backup_id);
        }
    }

    /// The most recent status line, if any.
    #[must_use]
    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }
}

/// Read-modify-write access to the persisted history.
///
/// Hosts create one store per device and hand it to both pipelines and the
/// health reporter. Updates are serialized through an internal lock, and the
/// store also owns the per-device run locks, so two pipelines built over the
/// same store never run concurrently.
pub struct HistoryStore {
    secrets: Arc<dyn SecretStore>,
    write_lock: Mutex<()>,
    backup_lock: RunLock,
    restore_lock: RunLock,
}

impl HistoryStore {
    /// Creates a store persisting into `secrets`.
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets,
            write_lock: Mutex::new(()),
            backup_lock: RunLock::new(),
            restore_lock: RunLock::new(),
        }
    }

    /// Single-flight lock for backup runs on this device.
    pub(crate) const fn backup_lock(&self) -> &RunLock {
        &self.backup_lock
    }

    /// Single-flight lock for restore runs on this device.
    pub(crate) const fn restore_lock(&self) -> &RunLock {
        &self.restore_lock
    }

    /// Loads the history; an absent history is empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::Storage`] or
    /// [`crate::BackupError::Serialization`] if it cannot be read.
    pub fn load(&self) -> BackupResult<BackupHistory> {
        self.secrets
            .get(HISTORY_KEY)?
            .map_or_else(|| Ok(BackupHistory::default()), |bytes| decode_cbor(&bytes))
    }

    /// Applies `f` to the stored history and persists the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read or written.
    pub fn update<F>(&self, f: F) -> BackupResult<BackupHistory>
    where
        F: FnOnce(&mut BackupHistory),
    {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut history = self.load()?;
        f(&mut history);
        self.secrets.set(HISTORY_KEY, &encode_cbor(&history)?)?;
        Ok(history)
    }

    /// Appends a status line, logging instead of failing.
    ///
    /// Used on failure paths where the run's own error must win.
    pub(crate) fn append_best_effort(&self, entry: HistoryEntry) {
        if let Err(err) = self.update(|history| history.push(entry)) {
            tracing::warn!(error = %err, "failed to append backup history entry");
        }
    }
}
