//! Backup health scoring.
//!
//! The score starts at 100 and loses a fixed number of points per finding.
//! Every deduction contributes exactly one issue and one recommendation:
//!
//! | Finding                             | Points |
//! |-------------------------------------|--------|
//! | Backups disabled                    | 30     |
//! | Never backed up                     | 25     |
//! | Last backup older than 7 days       | 15     |
//! | Storage above 90% of quota          | 20     |
//! | Storage above 75% of quota          | 10     |

use std::sync::Arc;

use crate::config::BackupConfig;
use crate::error::BackupResult;
use crate::history::{BackupHistory, HistoryStore};
use crate::utils::{days_to_secs, now_unix_secs};

/// Age after which the last backup counts as stale.
const STALE_AFTER_DAYS: u32 = 7;

struct Deduction {
    points: u8,
    issue: &'static str,
    recommendation: &'static str,
}

const DISABLED: Deduction = Deduction {
    points: 30,
    issue: "Backups are turned off",
    recommendation: "Turn on backups so your memories are kept safe",
};

const NEVER_BACKED_UP: Deduction = Deduction {
    points: 25,
    issue: "No backup has been made yet",
    recommendation: "Run a backup now",
};

const STALE: Deduction = Deduction {
    points: 15,
    issue: "The last backup is more than a week old",
    recommendation: "Connect to wifi and run a backup",
};

const STORAGE_CRITICAL: Deduction = Deduction {
    points: 20,
    issue: "Backup storage is more than 90% full",
    recommendation: "Delete old backups or increase your storage plan",
};

const STORAGE_HIGH: Deduction = Deduction {
    points: 10,
    issue: "Backup storage is more than 75% full",
    recommendation: "Consider deleting old backups",
};

/// Result of a health assessment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// 0..=100, higher is healthier.
    pub score: u8,
    /// One line per deduction.
    pub issues: Vec<String>,
    /// One line per deduction, paired with `issues` by index.
    pub recommendations: Vec<String>,
    /// Time of the last completed backup.
    pub last_backup_at: Option<u64>,
    /// Ciphertext bytes held in object storage.
    pub storage_used_bytes: u64,
}

/// Scores backup health from persisted history and configuration.
///
/// Never consults the live pipelines.
pub struct HealthReporter {
    config: BackupConfig,
    history: Arc<HistoryStore>,
}

impl HealthReporter {
    /// Creates a reporter.
    #[must_use]
    pub const fn new(config: BackupConfig, history: Arc<HistoryStore>) -> Self {
        Self { config, history }
    }

    /// Assesses health now.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be loaded.
    pub fn assess(&self) -> BackupResult<HealthReport> {
        self.assess_at(now_unix_secs())
    }

    /// Assesses health as of `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be loaded.
    pub fn assess_at(&self, now: u64) -> BackupResult<HealthReport> {
        let history = self.history.load()?;
        Ok(evaluate(&self.config, &history, now))
    }
}

/// Pure scoring function behind [`HealthReporter::assess_at`].
#[must_use]
pub fn evaluate(config: &BackupConfig, history: &BackupHistory, now: u64) -> HealthReport {
    let mut deductions = Vec::new();

    if !config.backup_enabled {
        deductions.push(&DISABLED);
    }
    match history.last_backup_at {
        None => deductions.push(&NEVER_BACKED_UP),
        Some(at) if now.saturating_sub(at) > days_to_secs(STALE_AFTER_DAYS) => {
            deductions.push(&STALE);
        }
        Some(_) => {}
    }
    if config.storage_quota_bytes > 0 {
        let used = u128::from(history.storage_used_bytes) * 100;
        let quota = u128::from(config.storage_quota_bytes);
        if used > quota * 90 {
            deductions.push(&STORAGE_CRITICAL);
        } else if used > quota * 75 {
            deductions.push(&STORAGE_HIGH);
        }
    }

    let lost: u8 = deductions.iter().map(|d| d.points).fold(0, u8::saturating_add);
    HealthReport {
        score: 100u8.saturating_sub(lost),
        issues: deductions.iter().map(|d| d.issue.to_string()).collect(),
        recommendations: deductions
            .iter()
            .map(|d| d.recommendation.to_string())
            .collect(),
        last_backup_at: history.last_backup_at,
        storage_used_bytes: history.storage_used_bytes,
    }
}
