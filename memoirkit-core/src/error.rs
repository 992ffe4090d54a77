//! Error types for the backup subsystem.

use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Result type for backup subsystem operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Stable, machine-readable error codes surfaced to host applications.
///
/// The string form (`INVALID_PASSWORD`, `NO_NETWORK`, ...) is part of the
/// public contract and must not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Password did not unlock the stored key material.
    InvalidPassword,
    /// Key vault initialization failed for a reason other than the password.
    InitFailed,
    /// The key vault has not been initialized.
    NotInitialized,
    /// No current or historical key matches the requested key id.
    KeyNotFound,
    /// AEAD encryption failed.
    EncryptionFailed,
    /// AEAD authentication or decryption failed.
    DecryptionFailed,
    /// A backup failed its integrity check.
    VerificationFailed,
    /// No network connectivity.
    NoNetwork,
    /// Automatic backups are restricted to wifi.
    WifiRequired,
    /// Battery is below the configured threshold.
    LowBattery,
    /// Backups are disabled in the configuration.
    BackupDisabled,
    /// No eligible records to back up.
    NoData,
    /// Another backup run is in flight.
    BackupInProgress,
    /// Another restore run is in flight.
    RestoreInProgress,
    /// The requested backup does not exist.
    BackupNotFound,
    /// A chunk could not be uploaded.
    UploadFailed,
    /// A chunk or manifest could not be downloaded.
    DownloadFailed,
    /// A platform store (secret or local) failed.
    Storage,
    /// Encoding or decoding failed.
    Serialization,
    /// The configuration is invalid.
    InvalidConfig,
}

/// Errors raised by the backup subsystem.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Password did not unlock the stored key material.
    #[error("invalid password")]
    InvalidPassword,

    /// Key vault initialization failed.
    #[error("key vault initialization failed: {reason}")]
    InitFailed {
        /// What went wrong.
        reason: String,
    },

    /// The key vault has not been initialized.
    #[error("key vault not initialized")]
    NotInitialized,

    /// No key with this id is current or historical.
    #[error("key not found: {key_id}")]
    KeyNotFound {
        /// The unresolved key id.
        key_id: String,
    },

    /// AEAD encryption failed.
    #[error("encryption failed: {context}")]
    EncryptionFailed {
        /// What was being encrypted.
        context: String,
    },

    /// AEAD authentication failed, or the wrong key was supplied.
    #[error("decryption failed: {context}")]
    DecryptionFailed {
        /// What was being decrypted.
        context: String,
    },

    /// Checksum of the stored backup does not match its manifest.
    #[error("backup verification failed: {backup_id}")]
    VerificationFailed {
        /// The backup that failed verification.
        backup_id: String,
    },

    /// No network connectivity.
    #[error("no network connection")]
    NoNetwork,

    /// Automatic backups require wifi.
    #[error("wifi connection required")]
    WifiRequired,

    /// Battery is below the configured threshold.
    #[error("battery too low: {level:.2} < {threshold:.2}")]
    LowBattery {
        /// Current battery level (0..1).
        level: f32,
        /// Configured minimum (0..1).
        threshold: f32,
    },

    /// Backups are disabled.
    #[error("backup disabled")]
    BackupDisabled,

    /// No eligible records.
    #[error("no data to back up")]
    NoData,

    /// A backup run is already in flight.
    #[error("backup already in progress")]
    BackupInProgress,

    /// A restore run is already in flight.
    #[error("restore already in progress")]
    RestoreInProgress,

    /// The backup does not exist in object storage.
    #[error("backup not found: {backup_id}")]
    BackupNotFound {
        /// The missing backup.
        backup_id: String,
    },

    /// A chunk upload failed after retries.
    #[error("upload of chunk {index} failed: {reason}")]
    UploadFailed {
        /// Chunk index.
        index: u32,
        /// Transport error message.
        reason: String,
    },

    /// A download failed.
    #[error("download failed: {reason}")]
    DownloadFailed {
        /// Transport error message.
        reason: String,
    },

    /// A platform store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// Which constraint was violated.
        reason: String,
    },
}

impl BackupError {
    /// Returns the stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPassword => ErrorCode::InvalidPassword,
            Self::InitFailed { .. } => ErrorCode::InitFailed,
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::KeyNotFound { .. } => ErrorCode::KeyNotFound,
            Self::EncryptionFailed { .. } => ErrorCode::EncryptionFailed,
            Self::DecryptionFailed { .. } => ErrorCode::DecryptionFailed,
            Self::VerificationFailed { .. } => ErrorCode::VerificationFailed,
            Self::NoNetwork => ErrorCode::NoNetwork,
            Self::WifiRequired => ErrorCode::WifiRequired,
            Self::LowBattery { .. } => ErrorCode::LowBattery,
            Self::BackupDisabled => ErrorCode::BackupDisabled,
            Self::NoData => ErrorCode::NoData,
            Self::BackupInProgress => ErrorCode::BackupInProgress,
            Self::RestoreInProgress => ErrorCode::RestoreInProgress,
            Self::BackupNotFound { .. } => ErrorCode::BackupNotFound,
            Self::UploadFailed { .. } => ErrorCode::UploadFailed,
            Self::DownloadFailed { .. } => ErrorCode::DownloadFailed,
            Self::Storage(_) => ErrorCode::Storage,
            Self::Serialization(_) => ErrorCode::Serialization,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
        }
    }

    /// Creates a storage error.
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a serialization error.
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization(message.into())
    }

    /// Creates an encryption failed error.
    pub fn encryption<S: Into<String>>(context: S) -> Self {
        Self::EncryptionFailed {
            context: context.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption<S: Into<String>>(context: S) -> Self {
        Self::DecryptionFailed {
            context: context.into(),
        }
    }

    /// Creates an initialization failed error.
    pub fn init_failed<S: Into<String>>(reason: S) -> Self {
        Self::InitFailed {
            reason: reason.into(),
        }
    }

    /// Creates an invalid config error.
    pub fn invalid_config<S: Into<String>>(reason: S) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
