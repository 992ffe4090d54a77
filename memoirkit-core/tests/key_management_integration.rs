//! Integration tests for key management.

mod common;

use std::sync::Arc;

use common::{password, record, test_config, Device, PASSWORD};
use memoirkit_core::platform::MemoryPlatform;
use memoirkit_core::{
    BackupConfig, BackupError, HealthReporter, HistoryStore, KeyEscrow, KeyVault,
};

#[tokio::test]
async fn test_escrow_restores_onto_fresh_device() {
    let platform = MemoryPlatform::new();
    let phone = Device::unlocked(platform.fresh_device(), test_config()).await;
    phone.platform.library.insert(record("m1", 3_000, 1_000));
    let before_rotation = phone.backup.run(true, |_| {}).await.unwrap();
    phone.vault.rotate_keys(&password(PASSWORD)).await.unwrap();
    phone.platform.library.insert(record("m2", 3_000, 1_000));
    let after_rotation = phone.backup.run(true, |_| {}).await.unwrap();

    let exported = phone
        .vault
        .export_keys(&password("escrow-passphrase"))
        .await
        .unwrap()
        .to_base64()
        .unwrap();

    let tablet = Device::locked(platform.fresh_device(), test_config());
    let escrow = KeyEscrow::from_base64(&exported).unwrap();
    let wrong = tablet.vault.import_keys(&escrow, &password("guess")).await;
    assert!(matches!(wrong, Err(BackupError::DecryptionFailed { .. })));
    assert!(!tablet.vault.is_initialized().await);

    let imported = tablet
        .vault
        .import_keys(&escrow, &password("escrow-passphrase"))
        .await
        .unwrap();
    assert_eq!(Some(imported.key_id().clone()), phone.vault.current_key_id().await);

    let old = tablet.restore.run(&before_rotation, |_| {}).await.unwrap();
    assert_eq!(old.restored_count, 1);
    let new = tablet.restore.run(&after_rotation, |_| {}).await.unwrap();
    assert_eq!(new.restored_count, 1);
    assert_eq!(new.skipped_count, 1);
    assert_eq!(tablet.platform.library.len(), 2);
}

#[tokio::test]
async fn test_vault_reopens_with_same_password_only() {
    let platform = MemoryPlatform::new();
    let first = KeyVault::new(platform.secrets.clone());
    let key = first.initialize(&password(PASSWORD)).await.unwrap();

    let reopened = KeyVault::new(platform.secrets.clone());
    let err = reopened.initialize(&password("correcthorse1")).await.unwrap_err();
    assert!(matches!(err, BackupError::InvalidPassword));
    assert!(!reopened.is_initialized().await);

    let again = reopened.initialize(&password(PASSWORD)).await.unwrap();
    assert_eq!(again.key_id(), key.key_id());
}

#[tokio::test]
async fn test_cleared_keys_cannot_restore() {
    let device = Device::unlocked(MemoryPlatform::new(), test_config()).await;
    device.platform.library.insert(record("m1", 1_000, 1_000));
    let backup_id = device.backup.run(true, |_| {}).await.unwrap();

    device.vault.clear_keys().await.unwrap();
    assert!(!device.vault.is_initialized().await);
    let err = device.restore.run(&backup_id, |_| {}).await.unwrap_err();
    assert!(matches!(err, BackupError::NotInitialized));

    // A new vault over the wiped store derives a different key.
    device.vault.initialize(&password(PASSWORD)).await.unwrap();
    let err = device.restore.run(&backup_id, |_| {}).await.unwrap_err();
    assert!(matches!(err, BackupError::KeyNotFound { .. }));
}

#[tokio::test]
async fn test_health_tracks_backups() {
    let device = Device::unlocked(MemoryPlatform::new(), test_config()).await;
    let reporter = HealthReporter::new(test_config(), device.history.clone());

    let initial = reporter.assess().unwrap();
    assert_eq!(initial.score, 75);
    assert_eq!(initial.issues.len(), 1);

    device.platform.library.insert(record("m1", 1_000, 1_000));
    device.backup.run(true, |_| {}).await.unwrap();
    let healthy = reporter.assess().unwrap();
    assert_eq!(healthy.score, 100);
    assert!(healthy.storage_used_bytes > 0);

    let week_later = healthy.last_backup_at.unwrap() + 8 * 86_400;
    assert_eq!(reporter.assess_at(week_later).unwrap().score, 85);
}

#[tokio::test]
async fn test_health_flags_disabled_backups_and_full_storage() {
    let platform = MemoryPlatform::new();
    let history = Arc::new(HistoryStore::new(platform.secrets.clone()));
    history
        .update(|h| h.record_backup("b1".into(), 950, 1_000))
        .unwrap();

    let config = BackupConfig {
        backup_enabled: false,
        storage_quota_bytes: 1_000,
        ..BackupConfig::default()
    };
    let report = HealthReporter::new(config, history).assess_at(1_000).unwrap();
    assert_eq!(report.score, 50);
    assert_eq!(report.issues.len(), 2);
    assert_eq!(report.recommendations.len(), 2);
}

#[test]
fn test_recovery_passwords_are_fresh() {
    let a = KeyVault::generate_recovery_password(false);
    let b = KeyVault::generate_recovery_password(false);
    assert_eq!(a.len(), 24);
    assert_ne!(a, b);
    assert!(!KeyVault::generate_recovery_password(true).is_empty());
}
