//! Directory-backed platform adapters.
//!
//! ```text
//! <home>/
//!   config.json
//!   secrets/<key>
//!   library/<hex(id)>.json
//!   objects/<backup_id>/manifest.json
//!   objects/<backup_id>/<index>.chunk
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use memoirkit_core::platform::{
    ConnectionType, DeviceStatus, ItemFilter, LocalStore, ObjectStore, SecretStore,
    TransportError, TransportResult,
};
use memoirkit_core::{
    BackupError, BackupId, BackupManifest, BackupResult, ComplianceRegion, MemoryRecord,
};

const MANIFEST_FILE: &str = "manifest.json";
const CHUNK_EXTENSION: &str = "chunk";

/// Writes `bytes` to a sibling temp file and renames it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

fn storage_error(context: &str, err: &io::Error) -> BackupError {
    BackupError::storage(format!("{context}: {err}"))
}

// =============================================================================
// Secrets
// =============================================================================

/// Secret store keeping one file per key.
///
/// Files are plain bytes on disk; this adapter exists for development only.
pub struct DirSecretStore {
    root: PathBuf,
}

impl DirSecretStore {
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, key: &str) -> BackupResult<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(BackupError::storage(format!("invalid secret key {key:?}")));
        }
        Ok(self.root.join(key))
    }
}

impl SecretStore for DirSecretStore {
    fn get(&self, key: &str) -> BackupResult<Option<Vec<u8>>> {
        match fs::read(self.path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(storage_error("read secret", &err)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> BackupResult<()> {
        write_atomic(&self.path(key)?, value).map_err(|err| storage_error("write secret", &err))
    }

    fn delete(&self, key: &str) -> BackupResult<()> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_error("delete secret", &err)),
        }
    }
}

// =============================================================================
// Library
// =============================================================================

/// Local memoir library stored as one JSON file per record.
pub struct DirLibrary {
    root: PathBuf,
}

impl DirLibrary {
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", hex::encode(id)))
    }

    fn read(path: &Path) -> BackupResult<MemoryRecord> {
        let bytes = fs::read(path).map_err(|err| storage_error("read record", &err))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| BackupError::serialization(format!("record {}: {err}", path.display())))
    }
}

impl LocalStore for DirLibrary {
    fn list_items(&self, filter: &ItemFilter) -> BackupResult<Vec<MemoryRecord>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(storage_error("list library", &err)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| storage_error("list library", &err))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let record = Self::read(&path)?;
                if filter.matches(&record) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn get_item(&self, id: &str) -> BackupResult<Option<MemoryRecord>> {
        let path = self.path(id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn put_item(&self, record: &MemoryRecord) -> BackupResult<()> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|err| BackupError::serialization(err.to_string()))?;
        write_atomic(&self.path(&record.id), &bytes)
            .map_err(|err| storage_error("write record", &err))
    }
}

// =============================================================================
// Object store
// =============================================================================

/// Object store backed by a local directory, standing in for a remote bucket.
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn backup_dir(&self, backup_id: &BackupId) -> PathBuf {
        self.root.join(backup_id.as_str())
    }

    fn chunk_path(&self, backup_id: &BackupId, index: u32) -> PathBuf {
        self.backup_dir(backup_id)
            .join(format!("{index:06}.{CHUNK_EXTENSION}"))
    }

    async fn read_manifest(path: &Path) -> TransportResult<Option<BackupManifest>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| TransportError::other(format!("manifest {}: {err}", path.display()))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(transport_error(&err)),
        }
    }

    async fn write(path: PathBuf, bytes: Vec<u8>) -> TransportResult<()> {
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|err| TransportError::other(err.to_string()))?
            .map_err(|err| transport_error(&err))
    }
}

fn transport_error(err: &io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::NotFound => TransportError::not_found(err.to_string()),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            TransportError::transient(err.to_string())
        }
        _ => TransportError::other(err.to_string()),
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn put_chunk(
        &self,
        backup_id: &BackupId,
        index: u32,
        frame: Vec<u8>,
    ) -> TransportResult<()> {
        Self::write(self.chunk_path(backup_id, index), frame).await
    }

    async fn get_chunk(&self, backup_id: &BackupId, index: u32) -> TransportResult<Vec<u8>> {
        tokio::fs::read(self.chunk_path(backup_id, index))
            .await
            .map_err(|err| transport_error(&err))
    }

    async fn put_manifest(&self, manifest: &BackupManifest) -> TransportResult<()> {
        let bytes = serde_json::to_vec_pretty(manifest)
            .map_err(|err| TransportError::other(err.to_string()))?;
        Self::write(self.backup_dir(&manifest.backup_id).join(MANIFEST_FILE), bytes).await
    }

    async fn get_manifest(&self, backup_id: &BackupId) -> TransportResult<Option<BackupManifest>> {
        Self::read_manifest(&self.backup_dir(backup_id).join(MANIFEST_FILE)).await
    }

    async fn list_backups(&self, region: ComplianceRegion) -> TransportResult<Vec<BackupManifest>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(transport_error(&err)),
        };

        let mut manifests = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| transport_error(&err))?
        {
            if let Some(manifest) = Self::read_manifest(&entry.path().join(MANIFEST_FILE)).await? {
                if manifest.region == region {
                    manifests.push(manifest);
                }
            }
        }
        Ok(manifests)
    }

    async fn delete_backup(&self, backup_id: &BackupId) -> TransportResult<()> {
        match tokio::fs::remove_dir_all(self.backup_dir(backup_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(transport_error(&err)),
        }
    }
}

// =============================================================================
// Device
// =============================================================================

/// Device state taken from command-line flags.
pub struct FlagDevice {
    connection: ConnectionType,
    battery: f32,
}

impl FlagDevice {
    pub const fn new(connection: ConnectionType, battery: f32) -> Self {
        Self {
            connection,
            battery,
        }
    }
}

impl DeviceStatus for FlagDevice {
    fn is_connected(&self) -> bool {
        self.connection != ConnectionType::None
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection
    }

    fn battery_level(&self) -> f32 {
        self.battery
    }
}
