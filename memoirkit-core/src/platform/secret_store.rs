//! Secure key-value storage trait.

use crate::error::BackupResult;

/// Secure storage for small secrets and metadata.
///
/// Values are opaque bytes. The key vault stores key metadata and historical
/// keys here; the pipelines store the backup history.
///
/// # Implementation Notes
///
/// `set` MUST replace the previous value atomically: a reader sees either the
/// complete old value or the complete new one. Implementations should keep
/// values inside hardware-backed storage (Keychain, Android Keystore) where
/// the platform allows.
///
/// # Naming Convention
///
/// - `memoirkit.key.metadata` — Current key salts and verifier
/// - `memoirkit.key.history` — Historical key ring
/// - `memoirkit.backup.history` — Backup history and counters
pub trait SecretStore: Send + Sync {
    /// Reads a value.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if it does not
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::Storage`] if the read fails.
    fn get(&self, key: &str) -> BackupResult<Option<Vec<u8>>>;

    /// Atomically writes a value, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackupError::Storage`] if the write fails.
    fn set(&self, key: &str, value: &[u8]) -> BackupResult<()>;

    /// Deletes a value.
    ///
    /// # Errors
    ///
    /// Returns `Ok(())` even if the key doesn't exist.
    /// Only returns an error for actual storage failures.
    fn delete(&self, key: &str) -> BackupResult<()>;
}
