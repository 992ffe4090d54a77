//! Remote chunked object storage.

use async_trait::async_trait;
use strum::Display;
use thiserror::Error;

use crate::config::ComplianceRegion;
use crate::error::BackupError;
use crate::types::{BackupId, BackupManifest};

/// Result type for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    /// Worth retrying (timeouts, 5xx, throttling).
    Transient,
    /// Connectivity was lost.
    Disconnected,
    /// The object does not exist.
    NotFound,
    /// Anything else; not retried.
    Other,
}

/// Error returned by an [`ObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} transport error: {message}")]
pub struct TransportError {
    /// Failure class.
    pub kind: TransportErrorKind,
    /// Transport-supplied detail.
    pub message: String,
}

impl TransportError {
    /// Creates an error of the given kind.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Transient, message)
    }

    /// Creates a disconnected error.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Disconnected, message)
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    /// Creates an unclassified error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    /// Whether the call should be retried with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == TransportErrorKind::Transient
    }

    /// Maps a failed chunk upload into the pipeline error.
    pub(crate) fn into_upload_error(self, index: u32) -> BackupError {
        match self.kind {
            TransportErrorKind::Disconnected => BackupError::NoNetwork,
            _ => BackupError::UploadFailed {
                index,
                reason: self.to_string(),
            },
        }
    }

    /// Maps a failed download or listing into the pipeline error.
    pub(crate) fn into_download_error(self) -> BackupError {
        match self.kind {
            TransportErrorKind::Disconnected => BackupError::NoNetwork,
            _ => BackupError::DownloadFailed {
                reason: self.to_string(),
            },
        }
    }
}

/// Chunked object storage holding encrypted backups.
///
/// The store only ever sees encrypted chunk frames and manifests, which carry
/// sizes, key ids and checksums but no plaintext.
///
/// # Implementation Notes
///
/// - Chunks are addressed by `(backup_id, index)`; a put overwrites.
/// - `list_backups` returns only backups whose manifest has been published.
///   Chunks without a manifest are partial uploads and must not be listed.
/// - `delete_backup` removes the manifest and every chunk, and succeeds if
///   nothing exists.
/// - Map connectivity loss to [`TransportErrorKind::Disconnected`] and
///   retryable server conditions to [`TransportErrorKind::Transient`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads one chunk frame.
    async fn put_chunk(&self, backup_id: &BackupId, index: u32, frame: Vec<u8>)
        -> TransportResult<()>;

    /// Downloads one chunk frame.
    async fn get_chunk(&self, backup_id: &BackupId, index: u32) -> TransportResult<Vec<u8>>;

    /// Publishes the manifest of a verified backup.
    async fn put_manifest(&self, manifest: &BackupManifest) -> TransportResult<()>;

    /// Fetches a manifest; `Ok(None)` if the backup was never published.
    async fn get_manifest(&self, backup_id: &BackupId) -> TransportResult<Option<BackupManifest>>;

    /// Lists published manifests stored under `region`.
    async fn list_backups(&self, region: ComplianceRegion) -> TransportResult<Vec<BackupManifest>>;

    /// Deletes a backup's manifest and chunks.
    async fn delete_backup(&self, backup_id: &BackupId) -> TransportResult<()>;
}
