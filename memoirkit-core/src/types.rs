//! Core type definitions shared by the key vault and both pipelines.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cipher::AlgorithmId;
use crate::config::ComplianceRegion;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of one backup run, a hyphenated UUIDv4.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    /// Allocates a fresh random backup id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackupId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BackupId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackupId({})", self.0)
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one key generation.
///
/// Derived from the backup key as
/// `hex(SHA256("memoirkit:key-id" || backup_key)[..16])`, so it names a key
/// without revealing it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wraps an already-derived key id.
    #[must_use]
    pub const fn new(hex_id: String) -> Self {
        Self(hex_id)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the raw bytes used in associated data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for KeyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Memory Records
// =============================================================================

/// A memoir entry owned by the host's local storage.
///
/// The backup subsystem only interprets `id` and `updated_at`; everything
/// else is carried through a backup untouched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Stable record id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Host reference to the recording (e.g. a media library path).
    pub payload_ref: String,
    /// Last modification time, in the host clock's units. Only ordering matters.
    pub updated_at: u64,
    /// User tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the user archived the memory.
    #[serde(default)]
    pub archived: bool,
    /// Recording bytes resolved by the local store for `payload_ref`.
    #[serde(default, with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl fmt::Debug for MemoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecord")
            .field("id", &self.id)
            .field("updated_at", &self.updated_at)
            .field("archived", &self.archived)
            .field("tags", &self.tags)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Manifest
// =============================================================================

/// Current schema version for manifests and backup payloads.
pub const BACKUP_SCHEMA_VERSION: u32 = 1;

/// Immutable description of one completed backup.
///
/// Published only after the uploaded chunks pass verification, so every
/// listed manifest describes a restorable backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// The backup this manifest describes.
    pub backup_id: BackupId,
    /// Payload schema version.
    pub schema_version: u32,
    /// Creation time (unix seconds).
    pub created_at: u64,
    /// Number of records in the backup.
    pub item_count: u32,
    /// Serialized plaintext size.
    pub plaintext_bytes: u64,
    /// Total size of all uploaded chunk frames.
    pub ciphertext_bytes: u64,
    /// Hex SHA-256 over the ordered concatenation of all chunk frames.
    pub checksum: String,
    /// Key generation that encrypted the chunks.
    pub key_id: KeyId,
    /// Compliance region the backup was stored under.
    pub region: ComplianceRegion,
    /// Number of uploaded chunks.
    pub chunk_count: u32,
    /// AEAD algorithm used for every chunk.
    pub algorithm_id: AlgorithmId,
}

/// Serialized body of a backup: the records, versioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BackupPayload {
    pub(crate) schema_version: u32,
    pub(crate) records: Vec<MemoryRecord>,
}

// =============================================================================
// Run State
// =============================================================================

/// Backup run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BackupStage {
    /// Preflight and gathering.
    Preparing,
    /// Sealing chunks.
    Encrypting,
    /// Sending chunks to object storage.
    Uploading,
    /// Downloading and re-checking the uploaded chunks.
    Verifying,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

/// Restore run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RestoreStage {
    /// Fetching the manifest and chunks.
    Downloading,
    /// Opening chunks.
    Decrypting,
    /// Writing records into local storage.
    Merging,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

/// Progress notification delivered on every chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress<S> {
    /// Current state of the run.
    pub status: S,
    /// Overall completion, 0..=100. Reaches 100 only on success.
    pub percent: u8,
    /// Bytes handled so far in the current stage.
    pub bytes_processed: u64,
    /// Total bytes the current stage will handle.
    pub total_bytes: u64,
}

/// Progress of a backup run.
pub type BackupProgress = Progress<BackupStage>;

/// Progress of a restore run.
pub type RestoreProgress = Progress<RestoreStage>;

/// Maps stage-local progress into an overall percentage window.
///
/// `start..end` is the slice of 0..100 the stage owns.
pub(crate) fn stage_percent(start: u8, end: u8, done: u64, total: u64) -> u8 {
    if total == 0 {
        return end;
    }
    let span = u64::from(end.saturating_sub(start));
    let offset = (span * done.min(total)) / total;
    start.saturating_add(u8::try_from(offset).unwrap_or(u8::MAX))
}
