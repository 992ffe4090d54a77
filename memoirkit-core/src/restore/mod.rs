//! The restore pipeline.
//!
//! ```text
//! Downloading ──▶ Decrypting ──▶ Merging ──▶ Completed
//!      │               │            │
//!      └───────────────┴────────────┴──────▶ Failed
//! ```
//!
//! Every chunk is downloaded, checksummed and decrypted before the first
//! record is written, so a corrupt or undecryptable backup never leaves the
//! library half-restored. Merging is last-write-wins per record: a local
//! record at least as new as the backed-up one is kept.

use std::sync::Arc;

use futures::{stream, StreamExt};
use zeroize::Zeroizing;

use crate::backup::chunk_context;
use crate::cipher::{self, decode_frame, digests_match, RunningChecksum};
use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::history::{HistoryEntry, HistoryStore, RunKind};
use crate::keys::{KeyMaterial, KeyVault};
use crate::platform::{LocalStore, ObjectStore, TransportError, TransportErrorKind};
use crate::progress::ProgressSink;
use crate::types::{
    BackupId, BackupManifest, BackupPayload, MemoryRecord, RestoreProgress, RestoreStage,
    BACKUP_SCHEMA_VERSION,
};
use crate::utils::{decode_cbor, now_unix_secs};

const DOWNLOADING: (u8, u8) = (0, 40);
const DECRYPTING: (u8, u8) = (40, 70);
const MERGING: (u8, u8) = (70, 99);

/// Outcome of a restore run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Records written into the library.
    pub restored_count: usize,
    /// Records kept because the local copy was at least as new.
    pub skipped_count: usize,
    /// Records the library refused to write.
    pub failed_count: usize,
    /// Records in the backup.
    pub total_count: usize,
}

/// Restores published backups into the local library.
pub struct RestorePipeline {
    config: BackupConfig,
    vault: Arc<KeyVault>,
    library: Arc<dyn LocalStore>,
    objects: Arc<dyn ObjectStore>,
    history: Arc<HistoryStore>,
}

impl RestorePipeline {
    /// Wires a pipeline.
    ///
    /// Pipelines built over the same `history` share one run lock.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: BackupConfig,
        vault: Arc<KeyVault>,
        library: Arc<dyn LocalStore>,
        objects: Arc<dyn ObjectStore>,
        history: Arc<HistoryStore>,
    ) -> BackupResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            vault,
            library,
            objects,
            history,
        })
    }

    /// Restores `backup_id` into the local library.
    ///
    /// # Errors
    ///
    /// - [`BackupError::RestoreInProgress`] if another restore is in flight
    ///   on this device
    /// - [`BackupError::NotInitialized`] before the key vault is unlocked
    /// - [`BackupError::BackupNotFound`] if no manifest was published
    /// - [`BackupError::VerificationFailed`] if the stored chunks do not
    ///   match the manifest checksum
    /// - [`BackupError::KeyNotFound`] if the backup's key is neither current
    ///   nor historical
    /// - [`BackupError::DecryptionFailed`] if any chunk fails to open; no
    ///   record has been written at that point
    ///
    /// Individual record write failures are counted in
    /// [`RestoreSummary::failed_count`] and never abort the run.
    pub async fn run<F>(&self, backup_id: &BackupId, on_progress: F) -> BackupResult<RestoreSummary>
    where
        F: Fn(RestoreProgress) + Send + Sync,
    {
        let Some(_guard) = self.history.restore_lock().try_acquire() else {
            return Err(BackupError::RestoreInProgress);
        };
        if !self.vault.is_initialized().await {
            return Err(BackupError::NotInitialized);
        }
        let progress = ProgressSink::new(&on_progress);
        tracing::info!(%backup_id, "restore started");

        match self.execute(backup_id, &progress).await {
            Ok(summary) => {
                self.history.append_best_effort(HistoryEntry::completed(
                    RunKind::Restore,
                    backup_id.clone(),
                    now_unix_secs(),
                ));
                let total = summary.total_count as u64;
                progress.emit(RestoreStage::Completed, 100, total, total);
                tracing::info!(
                    %backup_id,
                    restored = summary.restored_count,
                    skipped = summary.skipped_count,
                    failed = summary.failed_count,
                    "restore completed"
                );
                Ok(summary)
            }
            Err(err) => {
                tracing::warn!(%backup_id, error = %err, code = %err.code(), "restore failed");
                self.history.append_best_effort(HistoryEntry::failed(
                    RunKind::Restore,
                    Some(backup_id.clone()),
                    err.code(),
                    now_unix_secs(),
                ));
                progress.fail(RestoreStage::Failed);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        backup_id: &BackupId,
        progress: &ProgressSink<'_, RestoreStage>,
    ) -> BackupResult<RestoreSummary> {
        progress.emit(RestoreStage::Downloading, DOWNLOADING.0, 0, 0);
        let manifest = self
            .objects
            .get_manifest(backup_id)
            .await
            .map_err(TransportError::into_download_error)?
            .ok_or_else(|| BackupError::BackupNotFound {
                backup_id: backup_id.to_string(),
            })?;
        if manifest.schema_version != BACKUP_SCHEMA_VERSION {
            return Err(BackupError::serialization(format!(
                "unsupported backup schema version {}",
                manifest.schema_version
            )));
        }

        let frames = self.download(&manifest, progress).await?;
        let key = self.vault.resolve_key(&manifest.key_id).await?;

        let plaintext = Zeroizing::new(decrypt_frames(&manifest, &key, &frames, progress)?);
        let payload: BackupPayload = decode_cbor(&plaintext)?;
        if payload.schema_version != BACKUP_SCHEMA_VERSION {
            return Err(BackupError::serialization(format!(
                "unsupported payload schema version {}",
                payload.schema_version
            )));
        }
        if payload.records.len() != manifest.item_count as usize {
            tracing::warn!(
                %backup_id,
                expected = manifest.item_count,
                actual = payload.records.len(),
                "backup item count differs from manifest"
            );
        }

        Ok(self.merge(payload.records, progress))
    }

    /// Downloads every chunk in order and checks the manifest checksum.
    async fn download(
        &self,
        manifest: &BackupManifest,
        progress: &ProgressSink<'_, RestoreStage>,
    ) -> BackupResult<Vec<Vec<u8>>> {
        let backup_id = &manifest.backup_id;
        let total = manifest.ciphertext_bytes;
        let mut downloads = stream::iter(0..manifest.chunk_count)
            .map(|index| self.objects.get_chunk(backup_id, index))
            .buffered(self.config.transfer_concurrency);

        let mut frames = Vec::with_capacity(manifest.chunk_count as usize);
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
            progress.stage(RestoreStage::Downloading, DOWNLOADING, received, total);
            frames.push(frame);
        }

        if !digests_match(&checksum.finalize_hex(), &manifest.checksum) {
            tracing::warn!(%backup_id, "downloaded chunks do not match manifest checksum");
            return Err(BackupError::VerificationFailed {
                backup_id: backup_id.to_string(),
            });
        }
        Ok(frames)
    }

    /// Writes records with last-write-wins against the local copy.
    fn merge(
        &self,
        records: Vec<MemoryRecord>,
        progress: &ProgressSink<'_, RestoreStage>,
    ) -> RestoreSummary {
        let mut summary = RestoreSummary {
            total_count: records.len(),
            ..RestoreSummary::default()
        };
        let total = records.len() as u64;

        for (done, record) in (1u64..).zip(records) {
            match self.library.get_item(&record.id) {
                Ok(Some(local)) if local.updated_at >= record.updated_at => {
                    summary.skipped_count += 1;
                }
                Ok(_) => match self.library.put_item(&record) {
                    Ok(()) => summary.restored_count += 1,
                    Err(err) => {
                        tracing::warn!(record_id = %record.id, error = %err, "record restore failed");
                        summary.failed_count += 1;
                    }
                },
                Err(err) => {
                    tracing::warn!(record_id = %record.id, error = %err, "local record lookup failed");
                    summary.failed_count += 1;
                }
            }
            progress.stage(RestoreStage::Merging, MERGING, done, total);
        }
        summary
    }
}

/// Opens every frame in order, before anything is written.
fn decrypt_frames(
    manifest: &BackupManifest,
    key: &KeyMaterial,
    frames: &[Vec<u8>],
    progress: &ProgressSink<'_, RestoreStage>,
) -> BackupResult<Vec<u8>> {
    let mut plaintext = Vec::with_capacity(usize::try_from(manifest.plaintext_bytes).unwrap_or(0));
    let total = frames.len() as u64;
    for ((index, frame), done) in (0u32..).zip(frames).zip(1u64..) {
        let blob = decode_frame(frame, &manifest.key_id, manifest.algorithm_id, manifest.created_at)?;
        let piece = Zeroizing::new(cipher::open(
            key,
            &blob,
            &chunk_context(&manifest.backup_id, index),
        )?);
        plaintext.extend_from_slice(&piece);
        progress.stage(RestoreStage::Decrypting, DECRYPTING, done, total);
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::backup::BackupPipeline;
    use crate::platform::MemoryPlatform;

    struct Harness {
        platform: MemoryPlatform,
        backup: BackupPipeline,
        restore: RestorePipeline,
    }

    async fn harness() -> Harness {
        let platform = MemoryPlatform::new();
        let vault = Arc::new(KeyVault::new(platform.secrets.clone()));
        vault
            .initialize(&SecretString::from("CorrectHorse1".to_string()))
            .await
            .unwrap();
        let history = Arc::new(HistoryStore::new(platform.secrets.clone()));
        let config = BackupConfig {
            chunk_size_bytes: 2 * 1024,
            ..BackupConfig::default()
        };
        let backup = BackupPipeline::new(
            config.clone(),
            vault.clone(),
            platform.library.clone(),
            platform.device.clone(),
            platform.objects.clone(),
            history.clone(),
        )
        .unwrap();
        let restore = RestorePipeline::new(
            config,
            vault,
            platform.library.clone(),
            platform.objects.clone(),
            history,
        )
        .unwrap();
        Harness {
            platform,
            backup,
            restore,
        }
    }

    fn record(id: &str, updated_at: u64) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            title: format!("memory {id}"),
            payload_ref: format!("media/{id}.m4a"),
            updated_at,
            tags: vec!["family".to_string()],
            archived: false,
            payload: vec![7; 3_000],
        }
    }

    #[tokio::test]
    async fn test_restore_into_empty_library() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        h.platform.library.insert(record("b", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();

        h.platform.library.clear();
        let summary = h.restore.run(&backup_id, |_| {}).await.unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                restored_count: 2,
                skipped_count: 0,
                failed_count: 0,
                total_count: 2,
            }
        );
        assert_eq!(h.platform.library.records(), vec![record("a", 10), record("b", 10)]);
    }

    #[tokio::test]
    async fn test_newer_local_record_is_kept() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        h.platform.library.insert(record("b", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();

        let mut edited = record("a", 11);
        edited.title = "edited locally".to_string();
        h.platform.library.insert(edited);
        h.platform.library.insert(record("b", 5));

        let summary = h.restore.run(&backup_id, |_| {}).await.unwrap();
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.restored_count, 1);
        let kept = h.platform.library.get_item("a").unwrap().unwrap();
        assert_eq!(kept.title, "edited locally");
        assert_eq!(h.platform.library.get_item("b").unwrap().unwrap().updated_at, 10);
    }

    #[tokio::test]
    async fn test_equal_timestamps_are_skipped() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();
        let summary = h.restore.run(&backup_id, |_| {}).await.unwrap();
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.restored_count, 0);
    }

    #[tokio::test]
    async fn test_write_failures_are_counted() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        h.platform.library.insert(record("b", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();

        h.platform.library.clear();
        h.platform.library.reject_writes_for("b");
        let summary = h.restore.run(&backup_id, |_| {}).await.unwrap();
        assert_eq!(summary.restored_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.total_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_backup() {
        let h = harness().await;
        assert!(matches!(
            h.restore.run(&BackupId::from("missing"), |_| {}).await,
            Err(BackupError::BackupNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_tampered_chunk_fails_verification() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();

        h.platform.objects.tamper_chunk(&backup_id, 0);
        h.platform.library.clear();
        assert!(matches!(
            h.restore.run(&backup_id, |_| {}).await,
            Err(BackupError::VerificationFailed { .. })
        ));
        assert!(h.platform.library.is_empty());
    }

    #[tokio::test]
    async fn test_decryption_failure_writes_nothing() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        h.platform.library.insert(record("b", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();

        // Tamper the last chunk and re-sign the manifest so only the AEAD can
        // catch it.
        let mut manifest = h.platform.objects.get_manifest(&backup_id).await.unwrap().unwrap();
        h.platform.objects.tamper_chunk(&backup_id, manifest.chunk_count - 1);
        let mut all = Vec::new();
        for index in 0..manifest.chunk_count {
            all.extend(h.platform.objects.get_chunk(&backup_id, index).await.unwrap());
        }
        manifest.checksum = cipher::checksum(&all);
        h.platform.objects.overwrite_manifest(manifest);

        h.platform.library.clear();
        assert!(matches!(
            h.restore.run(&backup_id, |_| {}).await,
            Err(BackupError::DecryptionFailed { .. })
        ));
        assert!(h.platform.library.is_empty());
    }

    #[tokio::test]
    async fn test_swapped_chunks_fail_decryption() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        h.platform.library.insert(record("b", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();

        let mut manifest = h.platform.objects.get_manifest(&backup_id).await.unwrap().unwrap();
        assert!(manifest.chunk_count >= 2);
        let first = h.platform.objects.get_chunk(&backup_id, 0).await.unwrap();
        let second = h.platform.objects.get_chunk(&backup_id, 1).await.unwrap();
        h.platform.objects.put_chunk(&backup_id, 0, second).await.unwrap();
        h.platform.objects.put_chunk(&backup_id, 1, first).await.unwrap();
        let mut all = Vec::new();
        for index in 0..manifest.chunk_count {
            all.extend(h.platform.objects.get_chunk(&backup_id, index).await.unwrap());
        }
        manifest.checksum = cipher::checksum(&all);
        h.platform.objects.overwrite_manifest(manifest);

        assert!(matches!(
            h.restore.run(&backup_id, |_| {}).await,
            Err(BackupError::DecryptionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_restore_history_is_recorded() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();
        h.restore.run(&backup_id, |_| {}).await.unwrap();

        let history = HistoryStore::new(h.platform.secrets.clone()).load().unwrap();
        let last = history.last_entry().unwrap();
        assert_eq!(last.run_kind, RunKind::Restore);
        assert_eq!(last.backup_id.as_ref(), Some(&backup_id));
        assert_eq!(history.total_backups, 1);
    }

    #[tokio::test]
    async fn test_concurrent_restore_is_rejected() {
        let h = harness().await;
        h.platform.library.insert(record("a", 10));
        let backup_id = h.backup.run(true, |_| {}).await.unwrap();
        h.platform.objects.set_get_delay(Some(Duration::from_millis(30)));

        let (first, second) = tokio::join!(
            h.restore.run(&backup_id, |_| {}),
            h.restore.run(&backup_id, |_| {})
        );
        let rejected = [&first, &second]
            .into_iter()
            .filter(|result| matches!(result, Err(BackupError::RestoreInProgress)))
            .count();
        assert_eq!(rejected, 1);
        assert!(first.is_ok() || second.is_ok());
        assert!(h.restore.run(&backup_id, |_| {}).await.is_ok());
    }
}
