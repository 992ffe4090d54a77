//! In-memory implementations of platform traits for testing.
//!
//! These implementations are NOT durable. They back the unit and
//! integration tests and carry fault-injection knobs (disconnects, transient
//! failures, corrupted reads, rejected writes) so the failure paths of both
//! pipelines can be exercised deterministically.

// Allow certain clippy lints for test-only code
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ComplianceRegion;
use crate::error::{BackupError, BackupResult};
use crate::types::{BackupId, BackupManifest, MemoryRecord};

use super::{
    ConnectionType, DeviceStatus, ItemFilter, LocalStore, ObjectStore, SecretStore,
    TransportError, TransportResult,
};

// =============================================================================
// Memory Secret Store
// =============================================================================

/// In-memory secret store backed by a `HashMap`.
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent `set` fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns `true` if `key` holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().unwrap().contains_key(key)
    }

    /// Lists stored keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.values.read().unwrap().keys().cloned().collect()
    }
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> BackupResult<Option<Vec<u8>>> {
        Ok(self.values.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> BackupResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackupError::storage(format!("write rejected: {key}")));
        }
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> BackupResult<()> {
        self.values.write().unwrap().remove(key);
        Ok(())
    }
}

// =============================================================================
// Memory Local Store
// =============================================================================

/// In-memory memory library ordered by record id.
pub struct MemoryLocalStore {
    records: RwLock<BTreeMap<String, MemoryRecord>>,
    rejected_ids: RwLock<HashSet<String>>,
}

impl MemoryLocalStore {
    /// Creates an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            rejected_ids: RwLock::new(HashSet::new()),
        }
    }

    /// Inserts or replaces a record, bypassing write faults.
    pub fn insert(&self, record: MemoryRecord) {
        self.records
            .write()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    /// Makes `put_item` fail for this id.
    pub fn reject_writes_for(&self, id: &str) {
        self.rejected_ids.write().unwrap().insert(id.to_string());
    }

    /// Snapshot of all records in id order.
    #[must_use]
    pub fn records(&self) -> Vec<MemoryRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Returns `true` if the library is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Removes every record and write fault.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
        self.rejected_ids.write().unwrap().clear();
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryLocalStore {
    fn list_items(&self, filter: &ItemFilter) -> BackupResult<Vec<MemoryRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    fn get_item(&self, id: &str) -> BackupResult<Option<MemoryRecord>> {
        Ok(self.records.read().unwrap().get(id).cloned())
    }

    fn put_item(&self, record: &MemoryRecord) -> BackupResult<()> {
        if self.rejected_ids.read().unwrap().contains(&record.id) {
            return Err(BackupError::storage(format!(
                "write rejected for record {}",
                record.id
            )));
        }
        self.insert(record.clone());
        Ok(())
    }
}

// =============================================================================
// Memory Device Status
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct DeviceState {
    connection: ConnectionType,
    battery_level: f32,
}

/// Settable device status. Starts on wifi with a full battery.
pub struct MemoryDeviceStatus {
    state: Mutex<DeviceState>,
}

impl MemoryDeviceStatus {
    /// Creates a device on wifi at 100% battery.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState {
                connection: ConnectionType::Wifi,
                battery_level: 1.0,
            }),
        }
    }

    /// Switches the active transport.
    pub fn set_connection(&self, connection: ConnectionType) {
        self.state.lock().unwrap().connection = connection;
    }

    /// Sets the battery level (`0.0..=1.0`).
    pub fn set_battery_level(&self, level: f32) {
        self.state.lock().unwrap().battery_level = level;
    }
}

impl Default for MemoryDeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStatus for MemoryDeviceStatus {
    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connection != ConnectionType::None
    }

    fn connection_type(&self) -> ConnectionType {
        self.state.lock().unwrap().connection
    }

    fn battery_level(&self) -> f32 {
        self.state.lock().unwrap().battery_level
    }
}

// =============================================================================
// Memory Object Store
// =============================================================================

#[derive(Debug, Default)]
struct ObjectStoreFaults {
    /// Remaining successful chunk puts before the link drops.
    disconnect_after_puts: Option<usize>,
    disconnected: bool,
    /// Remaining chunk puts that fail transiently.
    transient_put_failures: usize,
    corrupt_reads: bool,
    put_delay: Option<Duration>,
    get_delay: Option<Duration>,
}

/// In-memory object store with fault injection.
///
/// Disconnection is sticky: once triggered, every call fails with
/// [`TransportErrorKind::Disconnected`](super::TransportErrorKind::Disconnected)
/// until [`MemoryObjectStore::reconnect`] is called.
pub struct MemoryObjectStore {
    chunks: RwLock<HashMap<(BackupId, u32), Vec<u8>>>,
    manifests: RwLock<HashMap<BackupId, BackupManifest>>,
    faults: Mutex<ObjectStoreFaults>,
    put_attempts: AtomicUsize,
}

impl MemoryObjectStore {
    /// Creates an empty, connected store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            manifests: RwLock::new(HashMap::new()),
            faults: Mutex::new(ObjectStoreFaults::default()),
            put_attempts: AtomicUsize::new(0),
        }
    }

    /// Lets `puts` more chunk uploads succeed, then drops the connection.
    pub fn disconnect_after(&self, puts: usize) {
        self.faults.lock().unwrap().disconnect_after_puts = Some(puts);
    }

    /// Restores connectivity and clears a pending disconnect.
    pub fn reconnect(&self) {
        let mut faults = self.faults.lock().unwrap();
        faults.disconnected = false;
        faults.disconnect_after_puts = None;
    }

    /// Fails the next `count` chunk uploads with a transient error.
    pub fn fail_next_puts(&self, count: usize) {
        self.faults.lock().unwrap().transient_put_failures = count;
    }

    /// Flips one bit in every chunk returned by `get_chunk`.
    pub fn set_corrupt_reads(&self, corrupt: bool) {
        self.faults.lock().unwrap().corrupt_reads = corrupt;
    }

    /// Delays every chunk upload, keeping runs in flight longer.
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        self.faults.lock().unwrap().put_delay = delay;
    }

    /// Delays every chunk download, keeping runs in flight longer.
    pub fn set_get_delay(&self, delay: Option<Duration>) {
        self.faults.lock().unwrap().get_delay = delay;
    }

    /// Flips one bit of a stored chunk.
    pub fn tamper_chunk(&self, backup_id: &BackupId, index: u32) {
        if let Some(frame) = self
            .chunks
            .write()
            .unwrap()
            .get_mut(&(backup_id.clone(), index))
        {
            if let Some(last) = frame.last_mut() {
                *last ^= 0x01;
            }
        }
    }

    /// Total chunk uploads attempted, including failed ones.
    #[must_use]
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// Number of chunks stored for `backup_id`.
    #[must_use]
    pub fn chunk_count(&self, backup_id: &BackupId) -> usize {
        self.chunks
            .read()
            .unwrap()
            .keys()
            .filter(|(id, _)| id == backup_id)
            .count()
    }

    /// Total chunks stored across all backups.
    #[must_use]
    pub fn total_chunks(&self) -> usize {
        self.chunks.read().unwrap().len()
    }

    /// Returns `true` if a manifest was published for `backup_id`.
    #[must_use]
    pub fn has_manifest(&self, backup_id: &BackupId) -> bool {
        self.manifests.read().unwrap().contains_key(backup_id)
    }

    /// Replaces a published manifest, bypassing faults.
    pub fn overwrite_manifest(&self, manifest: BackupManifest) {
        self.manifests
            .write()
            .unwrap()
            .insert(manifest.backup_id.clone(), manifest);
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.faults.lock().unwrap().disconnected {
            return Err(TransportError::disconnected("connection lost"));
        }
        Ok(())
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_chunk(
        &self,
        backup_id: &BackupId,
        index: u32,
        frame: Vec<u8>,
    ) -> TransportResult<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.faults.lock().unwrap().put_delay;
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        {
            let mut faults = self.faults.lock().unwrap();
            if faults.disconnected {
                return Err(TransportError::disconnected("connection lost"));
            }
            if let Some(remaining) = faults.disconnect_after_puts {
                if remaining == 0 {
                    faults.disconnected = true;
                    return Err(TransportError::disconnected("connection lost mid-upload"));
                }
                faults.disconnect_after_puts = Some(remaining - 1);
            }
            if faults.transient_put_failures > 0 {
                faults.transient_put_failures -= 1;
                return Err(TransportError::transient("503 service unavailable"));
            }
        }

        self.chunks
            .write()
            .unwrap()
            .insert((backup_id.clone(), index), frame);
        Ok(())
    }

    async fn get_chunk(&self, backup_id: &BackupId, index: u32) -> TransportResult<Vec<u8>> {
        let delay = self.faults.lock().unwrap().get_delay;
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.ensure_connected()?;
        let mut frame = self
            .chunks
            .read()
            .unwrap()
            .get(&(backup_id.clone(), index))
            .cloned()
            .ok_or_else(|| TransportError::not_found(format!("chunk {backup_id}/{index}")))?;
        if self.faults.lock().unwrap().corrupt_reads {
            if let Some(first) = frame.first_mut() {
                *first ^= 0x80;
            }
        }
        Ok(frame)
    }

    async fn put_manifest(&self, manifest: &BackupManifest) -> TransportResult<()> {
        self.ensure_connected()?;
        self.overwrite_manifest(manifest.clone());
        Ok(())
    }

    async fn get_manifest(&self, backup_id: &BackupId) -> TransportResult<Option<BackupManifest>> {
        self.ensure_connected()?;
        Ok(self.manifests.read().unwrap().get(backup_id).cloned())
    }

    async fn list_backups(&self, region: ComplianceRegion) -> TransportResult<Vec<BackupManifest>> {
        self.ensure_connected()?;
        Ok(self
            .manifests
            .read()
            .unwrap()
            .values()
            .filter(|manifest| manifest.region == region)
            .cloned()
            .collect())
    }

    async fn delete_backup(&self, backup_id: &BackupId) -> TransportResult<()> {
        self.ensure_connected()?;
        self.manifests.write().unwrap().remove(backup_id);
        self.chunks
            .write()
            .unwrap()
            .retain(|(id, _), _| id != backup_id);
        Ok(())
    }
}

// =============================================================================
// Memory Platform
// =============================================================================

/// Combines all in-memory implementations for easy test setup.
///
/// # Example
///
/// ```
/// use memoirkit_core::platform::MemoryPlatform;
///
/// let platform = MemoryPlatform::new();
///
/// // Use platform.secrets, platform.library, platform.device, platform.objects.
/// ```
pub struct MemoryPlatform {
    /// In-memory secret store.
    pub secrets: Arc<MemorySecretStore>,
    /// In-memory memory library.
    pub library: Arc<MemoryLocalStore>,
    /// Settable device status.
    pub device: Arc<MemoryDeviceStatus>,
    /// In-memory object store.
    pub objects: Arc<MemoryObjectStore>,
}

impl MemoryPlatform {
    /// Creates a new memory platform with default components.
    #[must_use]
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(MemorySecretStore::new()),
            library: Arc::new(MemoryLocalStore::new()),
            device: Arc::new(MemoryDeviceStatus::new()),
            objects: Arc::new(MemoryObjectStore::new()),
        }
    }

    /// A second device sharing this platform's object store but with its
    /// own secrets, library and device state.
    #[must_use]
    pub fn fresh_device(&self) -> Self {
        Self {
            secrets: Arc::new(MemorySecretStore::new()),
            library: Arc::new(MemoryLocalStore::new()),
            device: Arc::new(MemoryDeviceStatus::new()),
            objects: Arc::clone(&self.objects),
        }
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TransportErrorKind;

    #[test]
    fn test_memory_secret_store_basic() {
        let store = MemorySecretStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", b"v1").unwrap();
        store.set("k", b"v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_memory_secret_store_rejects_writes() {
        let store = MemorySecretStore::new();
        store.set_fail_writes(true);
        assert!(matches!(store.set("k", b"v"), Err(BackupError::Storage(_))));
    }

    #[test]
    fn test_memory_device_status() {
        let device = MemoryDeviceStatus::new();
        assert!(device.is_connected());
        device.set_connection(ConnectionType::None);
        assert!(!device.is_connected());
        device.set_battery_level(0.1);
        assert!((device.battery_level() - 0.1).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_memory_object_store_disconnect_is_sticky() {
        let store = MemoryObjectStore::new();
        let id = BackupId::from("b1");
        store.disconnect_after(1);
        store.put_chunk(&id, 0, vec![1]).await.unwrap();
        let err = store.put_chunk(&id, 1, vec![2]).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Disconnected);
        let err = store.get_chunk(&id, 0).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Disconnected);

        store.reconnect();
        assert_eq!(store.get_chunk(&id, 0).await.unwrap(), vec![1]);
        assert_eq!(store.put_attempts(), 2);
    }

    #[tokio::test]
    async fn test_memory_object_store_transient_failures() {
        let store = MemoryObjectStore::new();
        let id = BackupId::from("b1");
        store.fail_next_puts(2);
        assert!(store.put_chunk(&id, 0, vec![1]).await.unwrap_err().is_retryable());
        assert!(store.put_chunk(&id, 0, vec![1]).await.is_err());
        store.put_chunk(&id, 0, vec![1]).await.unwrap();
        assert_eq!(store.chunk_count(&id), 1);
    }

    #[tokio::test]
    async fn test_memory_object_store_delete_removes_chunks() {
        let store = MemoryObjectStore::new();
        let id = BackupId::from("b1");
        store.put_chunk(&id, 0, vec![1]).await.unwrap();
        store.put_chunk(&id, 1, vec![2]).await.unwrap();
        store.delete_backup(&id).await.unwrap();
        assert_eq!(store.chunk_count(&id), 0);
        let err = store.get_chunk(&id, 0).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NotFound);
    }
}
