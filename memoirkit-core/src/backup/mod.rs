//! The backup pipeline.
//!
//! ```text
//! Preparing ──▶ Encrypting ──▶ Uploading ──▶ Verifying ──▶ Completed
//!     │              │             │              │
//!     └──────────────┴─────────────┴──────────────┴──────▶ Failed
//! ```
//!
//! A manifest is published only after every uploaded chunk has been
//! downloaded back and its checksum recomputed, so anything listed by
//! [`BackupPipeline::list_backups`] is restorable.

pub mod preflight;

use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::{stream, StreamExt, TryStreamExt};
use zeroize::Zeroizing;

use crate::cipher::{self, digests_match, encode_frame, RunningChecksum, FRAME_OVERHEAD};
use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::history::{HistoryEntry, HistoryStore, RunKind};
use crate::keys::{KeyMaterial, KeyVault};
use crate::platform::{DeviceStatus, LocalStore, ObjectStore, TransportError, TransportErrorKind};
use crate::progress::ProgressSink;
use crate::types::{
    BackupId, BackupManifest, BackupPayload, BackupProgress, BackupStage, BACKUP_SCHEMA_VERSION,
};
use crate::utils::{days_to_secs, encode_cbor, now_unix_secs};

const PREPARING: (u8, u8) = (0, 5);
const ENCRYPTING: (u8, u8) = (5, 40);
const UPLOADING: (u8, u8) = (40, 80);
const VERIFYING: (u8, u8) = (80, 99);

/// Associated data binding a chunk to its backup and position.
pub(crate) fn chunk_context(backup_id: &BackupId, index: u32) -> Vec<u8> {
    let mut context = Vec::with_capacity(backup_id.as_str().len() + 4);
    context.extend_from_slice(backup_id.as_str().as_bytes());
    context.extend_from_slice(&index.to_be_bytes());
    context
}

/// Sealed chunk frames of one backup, in upload order.
struct SealedBackup {
    frames: Vec<Vec<u8>>,
    checksum: String,
    plaintext_bytes: u64,
    ciphertext_bytes: u64,
}

/// Runs backups and manages published backups.
pub struct BackupPipeline {
    config: BackupConfig,
    vault: Arc<KeyVault>,
    library: Arc<dyn LocalStore>,
    device: Arc<dyn DeviceStatus>,
    objects: Arc<dyn ObjectStore>,
    history: Arc<HistoryStore>,
}

impl BackupPipeline {
    /// Wires a pipeline.
    ///
    /// Pipelines built over the same `history` share one run lock, so a
    /// scheduler and a manual trigger on one device never overlap.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: BackupConfig,
        vault: Arc<KeyVault>,
        library: Arc<dyn LocalStore>,
        device: Arc<dyn DeviceStatus>,
        objects: Arc<dyn ObjectStore>,
        history: Arc<HistoryStore>,
    ) -> BackupResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            vault,
            library,
            device,
            objects,
            history,
        })
    }

    /// The configuration this pipeline runs with.
    #[must_use]
    pub const fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Runs one backup.
    ///
    /// `manual` runs skip the wifi and battery gates. `on_progress` is called
    /// on every stage change and chunk boundary; on success the last call
    /// reports [`BackupStage::Completed`] at 100%.
    ///
    /// # Errors
    ///
    /// - [`BackupError::BackupInProgress`] if another run is in flight on
    ///   this device
    /// - a preflight error, [`BackupError::NotInitialized`] or
    ///   [`BackupError::NoData`], all without side effects
    /// - [`BackupError::NoNetwork`] or [`BackupError::UploadFailed`] if the
    ///   upload fails after retries
    /// - [`BackupError::VerificationFailed`] if the stored chunks do not match
    ///
    /// Upload and verification failures delete the partial backup and never
    /// publish a manifest. A partial backup that cannot be deleted (usually
    /// because the link is down) is recorded in the history and removed by
    /// the next run or [`BackupPipeline::prune_expired`].
    pub async fn run<F>(&self, manual: bool, on_progress: F) -> BackupResult<BackupId>
    where
        F: Fn(BackupProgress) + Send + Sync,
    {
        let Some(_guard) = self.history.backup_lock().try_acquire() else {
            return Err(BackupError::BackupInProgress);
        };
        let progress = ProgressSink::new(&on_progress);

        preflight::check(&self.config, self.device.as_ref(), manual)?;
        let key = self.vault.current_key().await?;
        progress.stage(BackupStage::Preparing, PREPARING, 0, 0);

        let filter = self.config.item_filter();
        let records: Vec<_> = self
            .library
            .list_items(&filter)?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        if records.is_empty() {
            return Err(BackupError::NoData);
        }
        self.sweep_pending_cleanup().await;
        let item_count = u32::try_from(records.len())
            .map_err(|_| BackupError::serialization("too many records for one backup"))?;
        let backup_id = BackupId::generate();
        tracing::info!(%backup_id, item_count, manual, "backup started");

        let plaintext = Zeroizing::new(encode_cbor(&BackupPayload {
            schema_version: BACKUP_SCHEMA_VERSION,
            records,
        })?);

        match self
            .transfer(&key, &backup_id, item_count, &plaintext, &progress)
            .await
        {
            Ok(manifest) => {
                let at = now_unix_secs();
                if let Err(err) = self.history.update(|history| {
                    history.record_backup(manifest.backup_id.clone(), manifest.ciphertext_bytes, at);
                }) {
                    tracing::warn!(error = %err, "backup published but history update failed");
                }
                progress.emit(
                    BackupStage::Completed,
                    100,
                    manifest.ciphertext_bytes,
                    manifest.ciphertext_bytes,
                );
                tracing::info!(
                    %backup_id,
                    chunks = manifest.chunk_count,
                    bytes = manifest.ciphertext_bytes,
                    "backup completed"
                );
                Ok(backup_id)
            }
            Err(err) => {
                tracing::warn!(%backup_id, error = %err, code = %err.code(), "backup failed");
                self.history.append_best_effort(HistoryEntry::failed(
                    RunKind::Backup,
                    Some(backup_id),
                    err.code(),
                    now_unix_secs(),
                ));
                progress.fail(BackupStage::Failed);
                Err(err)
            }
        }
    }

    /// Encrypts, uploads, verifies and publishes one backup.
    async fn transfer(
        &self,
        key: &KeyMaterial,
        backup_id: &BackupId,
        item_count: u32,
        plaintext: &[u8],
        progress: &ProgressSink<'_, BackupStage>,
    ) -> BackupResult<BackupManifest> {
        let created_at = now_unix_secs();
        let sealed = self.seal_chunks(key, backup_id, plaintext, progress)?;

        if let Err(err) = self.upload(backup_id, &sealed, progress).await {
            self.discard(backup_id).await;
            return Err(err);
        }
        if let Err(err) = self.verify(backup_id, &sealed, progress).await {
            self.discard(backup_id).await;
            return Err(err);
        }

        let manifest = BackupManifest {
            backup_id: backup_id.clone(),
            schema_version: BACKUP_SCHEMA_VERSION,
            created_at,
            item_count,
            plaintext_bytes: sealed.plaintext_bytes,
            ciphertext_bytes: sealed.ciphertext_bytes,
            checksum: sealed.checksum,
            key_id: key.key_id().clone(),
            region: self.config.compliance_region,
            chunk_count: u32::try_from(sealed.frames.len())
                .map_err(|_| BackupError::serialization("too many chunks"))?,
            algorithm_id: cipher::AlgorithmId::Aes256Gcm,
        };
        if let Err(err) = self.objects.put_manifest(&manifest).await {
            self.discard(backup_id).await;
            return Err(err.into_upload_error(manifest.chunk_count));
        }
        Ok(manifest)
    }

    fn seal_chunks(
        &self,
        key: &KeyMaterial,
        backup_id: &BackupId,
        plaintext: &[u8],
        progress: &ProgressSink<'_, BackupStage>,
    ) -> BackupResult<SealedBackup> {
        let window = self.config.chunk_size_bytes - FRAME_OVERHEAD;
        let total = plaintext.len() as u64;
        let mut frames = Vec::with_capacity(plaintext.len().div_ceil(window));
        let mut checksum = RunningChecksum::new();
        let mut processed = 0u64;
        let mut ciphertext_bytes = 0u64;

        for (index, piece) in (0u32..).zip(plaintext.chunks(window)) {
            let blob = cipher::seal(key, piece, &chunk_context(backup_id, index))?;
            let frame = encode_frame(&blob);
            checksum.update(&frame);
            processed += piece.len() as u64;
            ciphertext_bytes += frame.len() as u64;
            frames.push(frame);
            progress.stage(BackupStage::Encrypting, ENCRYPTING, processed, total);
        }

        Ok(SealedBackup {
            frames,
            checksum: checksum.finalize_hex(),
            plaintext_bytes: total,
            ciphertext_bytes,
        })
    }

    async fn upload(
        &self,
        backup_id: &BackupId,
        sealed: &SealedBackup,
        progress: &ProgressSink<'_, BackupStage>,
    ) -> BackupResult<()> {
        let total = sealed.ciphertext_bytes;
        progress.stage(BackupStage::Uploading, UPLOADING, 0, total);

        let mut uploads = stream::iter((0u32..).zip(sealed.frames.iter()))
            .map(|(index, frame)| self.upload_chunk(backup_id, index, frame))
            .buffered(self.config.transfer_concurrency);

        let mut sent = 0u64;
        while let Some(bytes) = uploads.try_next().await? {
            sent += bytes;
            progress.stage(BackupStage::Uploading, UPLOADING, sent, total);
        }
        Ok(())
    }

    async fn upload_chunk(&self, backup_id: &BackupId, index: u32, frame: &[u8]) -> BackupResult<u64> {
        (|| async { self.objects.put_chunk(backup_id, index, frame.to_vec()).await })
            .retry(self.backoff())
            .when(TransportError::is_retryable)
            .notify(|err: &TransportError, delay: Duration| {
                tracing::debug!(%backup_id, index, error = %err, ?delay, "retrying chunk upload");
            })
            .await
            .map_err(|err| err.into_upload_error(index))?;
        Ok(frame.len() as u64)
    }

    async fn verify(
        &self,
        backup_id: &BackupId,
        sealed: &SealedBackup,
        progress: &ProgressSink<'_, BackupStage>,
    ) -> BackupResult<()> {
        let total = sealed.ciphertext_bytes;
        progress.stage(BackupStage::Verifying, VERIFYING, 0, total);

        let chunk_count = u32::try_from(sealed.frames.len())
            .map_err(|_| BackupError::serialization("too many chunks"))?;
        let mut downloads = stream::iter(0..chunk_count)
            .map(|index| self.objects.get_chunk(backup_id, index))
            .buffered(self.config.transfer_concurrency);

        let mut checksum = RunningChecksum::new();
        let mut received = 0u64;
        while let Some(result) = downloads.next().await {
            let frame = result.map_err(|err| match err.kind {
                TransportErrorKind::NotFound => BackupError::VerificationFailed {
                    backup_id: backup_id.to_string(),
                },
                _ => err.into_download_error(),
            })?;
            checksum.update(&frame);
            received += frame.len() as u64;
            progress.stage(BackupStage::Verifying, VERIFYING, received, total);
        }

        if received != total || !digests_match(&checksum.finalize_hex(), &sealed.checksum) {
            tracing::warn!(%backup_id, "uploaded chunks do not match local checksum");
            return Err(BackupError::VerificationFailed {
                backup_id: backup_id.to_string(),
            });
        }
        Ok(())
    }

    /// Removes a partial or unverified backup, deferring it on failure.
    async fn discard(&self, backup_id: &BackupId) {
        let Err(err) = self.objects.delete_backup(backup_id).await else {
            return;
        };
        tracing::warn!(%backup_id, error = %err, "could not remove partial backup, deferring cleanup");
        if let Err(err) = self
            .history
            .update(|history| history.defer_cleanup(backup_id.clone()))
        {
            tracing::warn!(%backup_id, error = %err, "failed to record deferred cleanup");
        }
    }

    /// Retries deleting partial backups left behind by earlier failed runs.
    async fn sweep_pending_cleanup(&self) {
        let pending = match self.history.load() {
            Ok(history) => history.pending_cleanup,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read pending cleanup");
                return;
            }
        };
        let mut removed = Vec::new();
        for backup_id in pending {
            match self.objects.delete_backup(&backup_id).await {
                Ok(()) => removed.push(backup_id),
                Err(err) => {
                    tracing::debug!(%backup_id, error = %err, "partial backup still not removable");
                }
            }
        }
        if removed.is_empty() {
            return;
        }
        match self
            .history
            .update(|history| history.pending_cleanup.retain(|id| !removed.contains(id)))
        {
            Ok(_) => tracing::info!(count = removed.len(), "partial backups removed"),
            Err(err) => tracing::warn!(error = %err, "failed to clear pending cleanup"),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.config.retry_min_delay_ms))
            .with_max_delay(Duration::from_millis(self.config.retry_max_delay_ms))
            .with_max_times(self.config.upload_max_retries)
    }

    // -------------------------------------------------------------------------
    // Published backups
    // -------------------------------------------------------------------------

    /// Lists published backups in the configured region, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::NoNetwork`] or [`BackupError::DownloadFailed`]
    /// if the listing fails.
    pub async fn list_backups(&self) -> BackupResult<Vec<BackupManifest>> {
        let mut manifests = self
            .objects
            .list_backups(self.config.compliance_region)
            .await
            .map_err(TransportError::into_download_error)?;
        manifests.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.backup_id.cmp(&a.backup_id))
        });
        Ok(manifests)
    }

    /// Deletes a published backup and releases its storage in the history.
    ///
    /// # Errors
    ///
    /// - [`BackupError::BackupNotFound`] if no manifest exists
    /// - [`BackupError::NoNetwork`] or [`BackupError::DownloadFailed`] on
    ///   transport failures
    pub async fn delete_backup(&self, backup_id: &BackupId) -> BackupResult<()> {
        let manifest = self
            .objects
            .get_manifest(backup_id)
            .await
            .map_err(TransportError::into_download_error)?
            .ok_or_else(|| BackupError::BackupNotFound {
                backup_id: backup_id.to_string(),
            })?;
        self.objects
            .delete_backup(backup_id)
            .await
            .map_err(TransportError::into_download_error)?;
        self.history
            .update(|history| history.release_storage(manifest.ciphertext_bytes))?;
        tracing::info!(%backup_id, "backup deleted");
        Ok(())
    }

    /// Deletes backups older than `maxBackupRetentionDays` at `now`.
    ///
    /// The newest backup is always kept, however old. Partial backups left
    /// by failed runs are removed first; they are never published, so they
    /// are not part of the returned ids.
    ///
    /// # Errors
    ///
    /// Propagates listing and deletion failures.
    pub async fn prune_expired(&self, now: u64) -> BackupResult<Vec<BackupId>> {
        self.sweep_pending_cleanup().await;
        let retention = days_to_secs(self.config.max_backup_retention_days);
        let manifests = self.list_backups().await?;
        let mut pruned = Vec::new();
        for manifest in manifests.iter().skip(1) {
            if manifest.created_at.saturating_add(retention) < now {
                self.delete_backup(&manifest.backup_id).await?;
                pruned.push(manifest.backup_id.clone());
            }
        }
        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "expired backups pruned");
        }
        Ok(pruned)
    }
}
