//! `MemoirKit` backup and restore.
//!
//! Zero-knowledge encrypted backup for an on-device memoir library. Records
//! are serialized, sealed with AES-256-GCM under a password-derived key,
//! split into chunks and uploaded to an untrusted object store. The store
//! never sees a key or a byte of plaintext.
//!
//! The crate is organized around a few long-lived components sharing the
//! host-provided [`platform`] adapters:
//!
//! - [`KeyVault`] derives, persists, rotates and escrows backup keys.
//! - [`BackupPipeline`] runs preflight, encrypt, upload and verify.
//! - [`RestorePipeline`] downloads, authenticates, decrypts and merges.
//! - [`HealthReporter`] scores backup health from the persisted history.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use memoirkit_core::platform::MemoryPlatform;
//! use memoirkit_core::{BackupConfig, BackupPipeline, HistoryStore, KeyVault};
//! use secrecy::SecretString;
//!
//! # async fn run() -> memoirkit_core::BackupResult<()> {
//! let platform = MemoryPlatform::new();
//! let vault = Arc::new(KeyVault::new(platform.secrets.clone()));
//! vault
//!     .initialize(&SecretString::from("CorrectHorse1".to_string()))
//!     .await?;
//!
//! let history = Arc::new(HistoryStore::new(platform.secrets.clone()));
//! let pipeline = BackupPipeline::new(
//!     BackupConfig::default(),
//!     vault,
//!     platform.library.clone(),
//!     platform.device.clone(),
//!     platform.objects.clone(),
//!     history,
//! )?;
//! let backup_id = pipeline.run(true, |progress| println!("{progress:?}")).await?;
//! println!("created backup {backup_id}");
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::*;

mod types;
pub use types::*;

mod config;
pub use config::*;

pub mod cipher;
pub use cipher::{AlgorithmId, EncryptedBlob};

pub mod keys;
pub use keys::{KeyEscrow, KeyMaterial, KeyVault};

pub mod platform;

pub mod history;
pub use history::{BackupHistory, HistoryStore};

pub mod backup;
pub use backup::BackupPipeline;

pub mod restore;
pub use restore::{RestorePipeline, RestoreSummary};

mod health;
pub use health::{evaluate as evaluate_health, HealthReport, HealthReporter};

pub mod logger;

// private modules
mod lock;
mod progress;
mod utils;
