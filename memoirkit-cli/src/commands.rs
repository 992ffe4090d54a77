//! Command handlers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{bail, eyre, Context as _, Result};
use memoirkit_core::{
    BackupConfig, BackupId, BackupManifest, BackupPipeline, HealthReporter, HistoryStore,
    KeyEscrow, KeyVault, MemoryRecord, RestorePipeline,
};
use secrecy::SecretString;
use serde_json::json;

use crate::cli::{Cli, Command};
use crate::stores::{DirLibrary, DirObjectStore, DirSecretStore, FlagDevice};

const CONFIG_FILE: &str = "config.json";

/// Everything a command needs, wired over one data directory.
pub struct App {
    home: PathBuf,
    config: BackupConfig,
    password: Option<SecretString>,
    json: bool,
    vault: Arc<KeyVault>,
    history: Arc<HistoryStore>,
    library: Arc<DirLibrary>,
    objects: Arc<DirObjectStore>,
    device: Arc<FlagDevice>,
}

impl App {
    pub fn new(cli: &Cli) -> Result<Self> {
        let home = match &cli.home {
            Some(home) => home.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| eyre!("no data directory; pass --home"))?
                .join("memoirkit"),
        };
        let config = load_config(&home)?;
        let secrets = Arc::new(DirSecretStore::new(home.join("secrets")));

        Ok(Self {
            config,
            password: cli.password.clone().map(SecretString::from),
            json: cli.json,
            vault: Arc::new(KeyVault::new(secrets.clone())),
            history: Arc::new(HistoryStore::new(secrets)),
            library: Arc::new(DirLibrary::new(home.join("library"))),
            objects: Arc::new(DirObjectStore::new(home.join("objects"))),
            device: Arc::new(FlagDevice::new(cli.network, cli.battery)),
            home,
        })
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Init => self.init().await,
            Command::AddMemory {
                id,
                title,
                file,
                tag,
                archived,
            } => self.add_memory(id, title, file.as_deref(), tag, archived),
            Command::Backup { manual } => self.backup(manual).await,
            Command::Restore { backup_id } => self.restore(backup_id).await,
            Command::List => self.list().await,
            Command::Delete { backup_id } => {
                self.backup_pipeline()?
                    .delete_backup(&BackupId::from(backup_id))
                    .await?;
                Ok(())
            }
            Command::Prune => self.prune().await,
            Command::Health => self.health(),
            Command::Rotate => self.rotate().await,
            Command::ExportKeys {
                out,
                export_password,
            } => self.export_keys(&out, export_password).await,
            Command::ImportKeys {
                file,
                export_password,
            } => self.import_keys(&file, export_password).await,
            Command::ClearKeys { yes } => self.clear_keys(yes).await,
            Command::RecoveryPassword { pronounceable } => {
                println!("{}", KeyVault::generate_recovery_password(pronounceable));
                Ok(())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Keys
    // -------------------------------------------------------------------------

    fn password(&self) -> Result<&SecretString> {
        self.password
            .as_ref()
            .ok_or_else(|| eyre!("a password is required; pass --password or set MEMOIRKIT_PASSWORD"))
    }

    async fn unlock(&self) -> Result<()> {
        self.vault
            .initialize(self.password()?)
            .await
            .wrap_err("could not unlock the key vault")?;
        Ok(())
    }

    async fn init(&self) -> Result<()> {
        let key = self.vault.initialize(self.password()?).await?;
        let config_path = self.home.join(CONFIG_FILE);
        if !config_path.exists() {
            fs::create_dir_all(&self.home)?;
            fs::write(&config_path, serde_json::to_vec_pretty(&self.config)?)?;
        }
        self.print(
            &json!({ "keyId": key.key_id().as_str(), "home": self.home }),
            &format!("vault ready, key {}", key.key_id()),
        );
        Ok(())
    }

    async fn rotate(&self) -> Result<()> {
        self.unlock().await?;
        let key = self.vault.rotate_keys(self.password()?).await?;
        let retired = self.vault.historical_key_ids().await.len();
        self.print(
            &json!({ "keyId": key.key_id().as_str(), "retiredKeys": retired }),
            &format!("rotated to key {} ({retired} retired)", key.key_id()),
        );
        Ok(())
    }

    async fn export_keys(&self, out: &Path, export_password: String) -> Result<()> {
        self.unlock().await?;
        let escrow = self
            .vault
            .export_keys(&SecretString::from(export_password))
            .await?;
        fs::write(out, escrow.to_base64()?)
            .wrap_err_with(|| format!("writing {}", out.display()))?;
        tracing::info!(path = %out.display(), "keys exported");
        Ok(())
    }

    async fn import_keys(&self, file: &Path, export_password: String) -> Result<()> {
        let text = fs::read_to_string(file).wrap_err_with(|| format!("reading {}", file.display()))?;
        let escrow = KeyEscrow::from_base64(text.trim())?;
        let key = self
            .vault
            .import_keys(&escrow, &SecretString::from(export_password))
            .await?;
        self.print(
            &json!({ "keyId": key.key_id().as_str() }),
            &format!("imported key {}", key.key_id()),
        );
        Ok(())
    }

    async fn clear_keys(&self, yes: bool) -> Result<()> {
        if !yes {
            bail!("refusing to delete keys without --yes; existing backups would become unrecoverable");
        }
        self.vault.clear_keys().await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Library
    // -------------------------------------------------------------------------

    fn add_memory(
        &self,
        id: String,
        title: String,
        file: Option<&Path>,
        tags: Vec<String>,
        archived: bool,
    ) -> Result<()> {
        use memoirkit_core::platform::LocalStore as _;

        let payload = match file {
            Some(path) => fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?,
            None => Vec::new(),
        };
        let updated_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs();
        let record = MemoryRecord {
            payload_ref: file.map(|p| p.display().to_string()).unwrap_or_default(),
            id,
            title,
            updated_at,
            tags,
            archived,
            payload,
        };
        self.library.put_item(&record)?;
        tracing::info!(id = %record.id, bytes = record.payload.len(), "memory added");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Backups
    // -------------------------------------------------------------------------

    fn backup_pipeline(&self) -> Result<BackupPipeline> {
        Ok(BackupPipeline::new(
            self.config.clone(),
            self.vault.clone(),
            self.library.clone(),
            self.device.clone(),
            self.objects.clone(),
            self.history.clone(),
        )?)
    }

    async fn backup(&self, manual: bool) -> Result<()> {
        self.unlock().await?;
        let pipeline = self.backup_pipeline()?;
        let backup_id = pipeline
            .run(manual, |p| {
                tracing::debug!(stage = %p.status, percent = p.percent, "backup progress");
            })
            .await?;
        self.print(
            &json!({ "backupId": backup_id.as_str() }),
            &format!("backup {backup_id} completed"),
        );
        Ok(())
    }

    async fn restore(&self, backup_id: Option<String>) -> Result<()> {
        self.unlock().await?;
        let backup_id = match backup_id {
            Some(id) => BackupId::from(id),
            None => self
                .backup_pipeline()?
                .list_backups()
                .await?
                .into_iter()
                .next()
                .map(|manifest| manifest.backup_id)
                .ok_or_else(|| eyre!("no backups to restore"))?,
        };

        let pipeline = RestorePipeline::new(
            self.config.clone(),
            self.vault.clone(),
            self.library.clone(),
            self.objects.clone(),
            self.history.clone(),
        )?;
        let summary = pipeline
            .run(&backup_id, |p| {
                tracing::debug!(stage = %p.status, percent = p.percent, "restore progress");
            })
            .await?;
        self.print(
            &json!({
                "backupId": backup_id.as_str(),
                "restored": summary.restored_count,
                "skipped": summary.skipped_count,
                "failed": summary.failed_count,
                "total": summary.total_count,
            }),
            &format!(
                "restored {} of {} records ({} skipped, {} failed)",
                summary.restored_count,
                summary.total_count,
                summary.skipped_count,
                summary.failed_count
            ),
        );
        Ok(())
    }

    async fn list(&self) -> Result<()> {
        let manifests = self.backup_pipeline()?.list_backups().await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&manifests)?);
            return Ok(());
        }
        if manifests.is_empty() {
            println!("no backups");
        }
        for manifest in &manifests {
            println!("{}", describe(manifest));
        }
        Ok(())
    }

    async fn prune(&self) -> Result<()> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs();
        let pruned = self.backup_pipeline()?.prune_expired(now).await?;
        self.print(
            &json!({ "pruned": pruned.iter().map(BackupId::as_str).collect::<Vec<_>>() }),
            &format!("pruned {} backups", pruned.len()),
        );
        Ok(())
    }

    fn health(&self) -> Result<()> {
        let report = HealthReporter::new(self.config.clone(), self.history.clone()).assess()?;
        if self.json {
            println!(
                "{}",
                json!({
                    "score": report.score,
                    "issues": report.issues,
                    "recommendations": report.recommendations,
                    "lastBackupAt": report.last_backup_at,
                    "storageUsedBytes": report.storage_used_bytes,
                })
            );
            return Ok(());
        }
        println!("health score: {}/100", report.score);
        for (issue, recommendation) in report.issues.iter().zip(&report.recommendations) {
            println!("  - {issue}: {recommendation}");
        }
        Ok(())
    }

    fn print(&self, value: &serde_json::Value, text: &str) {
        if self.json {
            println!("{value}");
        } else {
            println!("{text}");
        }
    }
}

fn describe(manifest: &BackupManifest) -> String {
    format!(
        "{}  created {}  {} items  {} bytes  {} chunks  key {}",
        manifest.backup_id,
        manifest.created_at,
        manifest.item_count,
        manifest.ciphertext_bytes,
        manifest.chunk_count,
        manifest.key_id,
    )
}

fn load_config(home: &Path) -> Result<BackupConfig> {
    let path = home.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(BackupConfig::default());
    }
    let bytes = fs::read(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let config: BackupConfig = serde_json::from_slice(&bytes)
        .wrap_err_with(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
