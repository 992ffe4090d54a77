//! Common test utilities shared across integration tests.

#![allow(missing_docs)]

use std::sync::{Arc, Mutex};

use memoirkit_core::platform::MemoryPlatform;
use memoirkit_core::{
    BackupConfig, BackupPipeline, BackupProgress, HistoryStore, KeyVault, MemoryRecord,
    RestorePipeline,
};
use secrecy::SecretString;

pub const PASSWORD: &str = "CorrectHorse1";

pub fn password(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

pub fn record(id: &str, bytes: usize, updated_at: u64) -> MemoryRecord {
    MemoryRecord {
        id: id.to_string(),
        title: format!("Memory {id}"),
        payload_ref: format!("media/{id}.m4a"),
        updated_at,
        tags: vec!["family".to_string()],
        archived: false,
        payload: (0..bytes).map(|i| u8::try_from(i % 251).unwrap()).collect(),
    }
}

/// Small chunks and fast retries so a few KB exercise multi-chunk paths.
pub fn test_config() -> BackupConfig {
    BackupConfig {
        chunk_size_bytes: 8 * 1024,
        retry_min_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..BackupConfig::default()
    }
}

/// One device: the in-memory platform plus every component wired over it.
pub struct Device {
    pub platform: MemoryPlatform,
    pub vault: Arc<KeyVault>,
    pub history: Arc<HistoryStore>,
    pub backup: Arc<BackupPipeline>,
    pub restore: Arc<RestorePipeline>,
}

impl Device {
    pub async fn unlocked(platform: MemoryPlatform, config: BackupConfig) -> Self {
        let device = Self::locked(platform, config);
        device.vault.initialize(&password(PASSWORD)).await.expect("unlock vault");
        device
    }

    pub fn locked(platform: MemoryPlatform, config: BackupConfig) -> Self {
        let vault = Arc::new(KeyVault::new(platform.secrets.clone()));
        let history = Arc::new(HistoryStore::new(platform.secrets.clone()));
        let backup = BackupPipeline::new(
            config.clone(),
            vault.clone(),
            platform.library.clone(),
            platform.device.clone(),
            platform.objects.clone(),
            history.clone(),
        )
        .expect("backup pipeline");
        let restore = RestorePipeline::new(
            config,
            vault.clone(),
            platform.library.clone(),
            platform.objects.clone(),
            history.clone(),
        )
        .expect("restore pipeline");
        Self {
            platform,
            vault,
            history,
            backup: Arc::new(backup),
            restore: Arc::new(restore),
        }
    }
}

/// Collects progress callbacks for later assertions.
#[allow(dead_code, reason = "used in tests")]
#[derive(Default)]
pub struct ProgressLog {
    seen: Mutex<Vec<BackupProgress>>,
}

#[allow(dead_code, reason = "used in tests")]
impl ProgressLog {
    pub fn push(&self, progress: BackupProgress) {
        self.seen.lock().unwrap().push(progress);
    }

    pub fn snapshot(&self) -> Vec<BackupProgress> {
        self.seen.lock().unwrap().clone()
    }
}
