//! Backup configuration surface.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::cipher::FRAME_OVERHEAD;
use crate::error::{BackupError, BackupResult};
use crate::platform::ItemFilter;

/// Default size of one uploaded chunk frame (1 MiB).
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 1024 * 1024;

/// Data-residency region backups are stored under.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComplianceRegion {
    /// United States.
    #[default]
    Us,
    /// European Union.
    Eu,
    /// United Kingdom.
    Uk,
    /// Canada.
    Ca,
    /// Australia.
    Au,
}

/// Options recognized by the backup subsystem.
///
/// Deserializes from camelCase JSON; every field is optional and falls back
/// to [`BackupConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupConfig {
    /// Master switch for backups.
    pub backup_enabled: bool,
    /// Automatic backups only run on wifi.
    pub wifi_only_backup: bool,
    /// Enables the battery gate for automatic backups.
    pub low_power_mode: bool,
    /// Minimum battery level (0..=1) for automatic backups in low power mode.
    pub low_battery_threshold: f32,
    /// Upper bound for one uploaded chunk frame.
    pub chunk_size_bytes: usize,
    /// Backups older than this are pruned by [`crate::BackupPipeline::prune_expired`].
    pub max_backup_retention_days: u32,
    /// Age after which the key vault reports a rotation as due.
    pub key_rotation_days: u32,
    /// Region backups are stored under and listed from.
    pub compliance_region: ComplianceRegion,
    /// Include archived memories in backups.
    pub include_archived: bool,
    /// Only back up memories carrying at least one of these tags. `None` means all.
    pub include_tags: Option<Vec<String>>,
    /// Backup storage quota used for health reporting.
    pub storage_quota_bytes: u64,
    /// Concurrent chunk transfers per run.
    pub transfer_concurrency: usize,
    /// Retries per chunk upload on transient transport errors.
    pub upload_max_retries: usize,
    /// First retry delay.
    pub retry_min_delay_ms: u64,
    /// Retry delay cap.
    pub retry_max_delay_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            wifi_only_backup: false,
            low_power_mode: false,
            low_battery_threshold: 0.2,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_backup_retention_days: 90,
            key_rotation_days: 180,
            compliance_region: ComplianceRegion::default(),
            include_archived: true,
            include_tags: None,
            storage_quota_bytes: 5 * 1024 * 1024 * 1024,
            transfer_concurrency: 2,
            upload_max_retries: 3,
            retry_min_delay_ms: 200,
            retry_max_delay_ms: 2_000,
        }
    }
}

impl BackupConfig {
    /// Checks the numeric constraints the pipelines rely on.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidConfig`] naming the first violated constraint.
    pub fn validate(&self) -> BackupResult<()> {
        if self.chunk_size_bytes <= FRAME_OVERHEAD {
            return Err(BackupError::invalid_config(format!(
                "chunkSizeBytes must exceed the {FRAME_OVERHEAD}-byte frame overhead"
            )));
        }
        if self.transfer_concurrency == 0 {
            return Err(BackupError::invalid_config(
                "transferConcurrency must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.low_battery_threshold) {
            return Err(BackupError::invalid_config(
                "lowBatteryThreshold must be within 0..=1",
            ));
        }
        if self.retry_min_delay_ms > self.retry_max_delay_ms {
            return Err(BackupError::invalid_config(
                "retryMinDelayMs must not exceed retryMaxDelayMs",
            ));
        }
        Ok(())
    }

    /// Builds the record filter handed to the local store.
    #[must_use]
    pub fn item_filter(&self) -> ItemFilter {
        ItemFilter {
            include_archived: self.include_archived,
            tags: self.include_tags.clone(),
        }
    }
}
