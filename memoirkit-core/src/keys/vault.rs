//! The key vault: the only component that ever sees a master password.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use super::derivation::{generate_salt, PBKDF2_ITERATIONS, SALT_LEN};
use super::envelope::{KeyMetadata, KeyRing, KEY_HISTORY_KEY, KEY_METADATA_KEY};
use super::escrow::KeyEscrow;
use super::material::KeyMaterial;
use super::recovery;
use crate::cipher::{self, EncryptedBlob};
use crate::error::{BackupError, BackupResult};
use crate::platform::SecretStore;
use crate::types::KeyId;
use crate::utils::{days_to_secs, now_unix_secs};

/// Marker sealed under every key at creation and checked on unlock.
const VERIFIER_MARKER: &[u8] = b"memoirkit:key-verifier:v1";

/// Associated data label for the verifier blob.
const VERIFIER_CONTEXT: &[u8] = b"memoirkit:verifier";

#[derive(Default)]
struct VaultState {
    current: Option<KeyMaterial>,
    /// PBKDF2 iterations the current key was derived with.
    current_iterations: u32,
    /// Retired keys, oldest first.
    historical: Vec<KeyMaterial>,
}

impl VaultState {
    fn current(&self) -> BackupResult<&KeyMaterial> {
        self.current.as_ref().ok_or(BackupError::NotInitialized)
    }

    fn find(&self, key_id: &KeyId) -> Option<&KeyMaterial> {
        self.current
            .iter()
            .chain(self.historical.iter())
            .find(|key| key.key_id() == key_id)
    }
}

/// Derives, stores, rotates and exports backup key material.
///
/// All state sits behind one async mutex, so concurrent rotations serialize
/// and a retired key is always archived before its successor is persisted.
/// PBKDF2 runs on the blocking pool.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> memoirkit_core::BackupResult<()> {
/// use std::sync::Arc;
/// use memoirkit_core::{platform::MemoryPlatform, KeyVault};
/// use secrecy::SecretString;
///
/// let platform = MemoryPlatform::new();
/// let vault = KeyVault::new(platform.secrets.clone());
/// let key = vault
///     .initialize(&SecretString::from("CorrectHorse1".to_string()))
///     .await?;
/// println!("current key {}", key.key_id());
/// # Ok(())
/// # }
/// ```
pub struct KeyVault {
    secrets: Arc<dyn SecretStore>,
    iterations: u32,
    state: Mutex<VaultState>,
}

impl KeyVault {
    /// Creates a locked vault over `secrets`.
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets,
            iterations: PBKDF2_ITERATIONS,
            state: Mutex::new(VaultState::default()),
        }
    }

    /// Unlocks existing key material, or creates it on first use.
    ///
    /// With stored metadata the key is re-derived from the stored salts and
    /// self-tested against the stored verifier. Without metadata fresh salts
    /// are generated and the new key is persisted. Historical keys are
    /// loaded either way.
    ///
    /// # Errors
    ///
    /// - [`BackupError::InvalidPassword`] for an empty or wrong password
    /// - [`BackupError::InitFailed`] if the secret store fails or holds
    ///   unreadable metadata
    pub async fn initialize(&self, password: &SecretString) -> BackupResult<KeyMaterial> {
        ensure_non_empty(password)?;
        let mut state = self.state.lock().await;

        let metadata = self.load_metadata().map_err(into_init_failed)?;
        let (key, iterations) = if let Some(metadata) = metadata {
            let key = derive_blocking(
                password,
                metadata.master_salt,
                metadata.backup_salt,
                metadata.derived_at,
                metadata.iterations,
            )
            .await
            .map_err(into_init_failed)?;
            if key.key_id() != &metadata.key_id || !self_test(&key, &metadata.verifier) {
                tracing::warn!("key vault unlock rejected: password does not match");
                return Err(BackupError::InvalidPassword);
            }
            tracing::info!(key_id = %key.key_id(), "key vault unlocked");
            (key, metadata.iterations)
        } else {
            let key = derive_blocking(
                password,
                generate_salt(),
                generate_salt(),
                now_unix_secs(),
                self.iterations,
            )
            .await
            .map_err(into_init_failed)?;
            self.persist_current(&key).map_err(into_init_failed)?;
            tracing::info!(key_id = %key.key_id(), "key vault created");
            (key, self.iterations)
        };

        state.historical = self.load_history().map_err(into_init_failed)?;
        state.current = Some(key.clone());
        state.current_iterations = iterations;
        Ok(key)
    }

    /// Retires the current key and derives a fresh one from `password`.
    ///
    /// The password is checked with the iteration count the current key was
    /// derived with; the new key uses the vault's count. The retired key is
    /// persisted to the historical store before the new key replaces it. Existing backups are not re-encrypted; they stay
    /// decryptable through the historical key.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotInitialized`] before [`KeyVault::initialize`]
    /// - [`BackupError::InvalidPassword`] if `password` does not unlock the
    ///   current key
    /// - [`BackupError::Storage`] if persisting fails; the vault keeps the
    ///   current key
    pub async fn rotate_keys(&self, password: &SecretString) -> BackupResult<KeyMaterial> {
        ensure_non_empty(password)?;
        let mut state = self.state.lock().await;
        let current = state.current()?.clone();

        let check = derive_blocking(
            password,
            *current.master_salt(),
            *current.backup_salt(),
            current.derived_at(),
            state.current_iterations,
        )
        .await?;
        if check.key_id() != current.key_id() {
            tracing::warn!("key rotation rejected: password does not match");
            return Err(BackupError::InvalidPassword);
        }

        let fresh = derive_blocking(
            password,
            generate_salt(),
            generate_salt(),
            now_unix_secs(),
            self.iterations,
        )
        .await?;

        let mut historical = state.historical.clone();
        if !historical.iter().any(|key| key.key_id() == current.key_id()) {
            historical.push(current.clone());
        }
        self.persist_history(&historical)?;
        self.persist_current(&fresh)?;

        state.historical = historical;
        state.current = Some(fresh.clone());
        state.current_iterations = self.iterations;
        tracing::info!(
            retired = %current.key_id(),
            current = %fresh.key_id(),
            "key rotated"
        );
        Ok(fresh)
    }

    /// Returns the current key.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::NotInitialized`] before [`KeyVault::initialize`].
    pub async fn current_key(&self) -> BackupResult<KeyMaterial> {
        self.state.lock().await.current().cloned()
    }

    /// Finds the current or historical key named `key_id`.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotInitialized`] before [`KeyVault::initialize`]
    /// - [`BackupError::KeyNotFound`] if no key matches
    pub async fn resolve_key(&self, key_id: &KeyId) -> BackupResult<KeyMaterial> {
        let state = self.state.lock().await;
        state.current()?;
        state
            .find(key_id)
            .cloned()
            .ok_or_else(|| BackupError::KeyNotFound {
                key_id: key_id.to_string(),
            })
    }

    /// Seals the current and every historical key under `export_password`.
    ///
    /// # Errors
    ///
    /// - [`BackupError::NotInitialized`] before [`KeyVault::initialize`]
    /// - [`BackupError::InvalidPassword`] for an empty export password
    pub async fn export_keys(&self, export_password: &SecretString) -> BackupResult<KeyEscrow> {
        ensure_non_empty(export_password)?;
        let state = self.state.lock().await;
        let current = state.current()?.clone();
        let historical = state.historical.clone();
        drop(state);

        let password = Zeroizing::new(export_password.expose_secret().as_bytes().to_vec());
        let iterations = self.iterations;
        let escrow = tokio::task::spawn_blocking(move || {
            KeyEscrow::seal(&current, &historical, &password, iterations)
        })
        .await
        .map_err(|err| BackupError::encryption(format!("escrow task failed: {err}")))??;
        tracing::info!("key material exported");
        Ok(escrow)
    }

    /// Opens `escrow` and makes its key current, keeping every other key as
    /// historical.
    ///
    /// The escrow is authenticated before any state changes.
    ///
    /// # Errors
    ///
    /// - [`BackupError::DecryptionFailed`] for a wrong password or a
    ///   tampered escrow
    /// - [`BackupError::Storage`] if persisting fails
    pub async fn import_keys(
        &self,
        escrow: &KeyEscrow,
        import_password: &SecretString,
    ) -> BackupResult<KeyMaterial> {
        ensure_non_empty(import_password)?;
        let password = Zeroizing::new(import_password.expose_secret().as_bytes().to_vec());
        let sealed = escrow.clone();
        let (imported, imported_history) =
            tokio::task::spawn_blocking(move || sealed.open(&password))
                .await
                .map_err(|err| BackupError::decryption(format!("escrow task failed: {err}")))??;

        let mut state = self.state.lock().await;
        let mut historical = state.historical.clone();
        let previous = state.current.iter().chain(imported_history.iter());
        for key in previous {
            let known = historical.iter().any(|k| k.key_id() == key.key_id());
            if !known && key.key_id() != imported.key_id() {
                historical.push(key.clone());
            }
        }
        historical.retain(|key| key.key_id() != imported.key_id());

        self.persist_history(&historical)?;
        self.persist_current(&imported)?;

        state.historical = historical;
        state.current = Some(imported.clone());
        state.current_iterations = self.iterations;
        tracing::info!(key_id = %imported.key_id(), "key material imported");
        Ok(imported)
    }

    /// Irreversibly deletes every key from memory and the secret store.
    ///
    /// Every existing backup becomes permanently undecryptable. Asking the
    /// user for confirmation is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Storage`] if the secret store cannot delete.
    pub async fn clear_keys(&self) -> BackupResult<()> {
        let mut state = self.state.lock().await;
        self.secrets.delete(KEY_METADATA_KEY)?;
        self.secrets.delete(KEY_HISTORY_KEY)?;
        *state = VaultState::default();
        tracing::warn!("all key material cleared");
        Ok(())
    }

    /// Generates a recovery password; see [`recovery::generate_recovery_password`].
    #[must_use]
    pub fn generate_recovery_password(pronounceable: bool) -> String {
        recovery::generate_recovery_password(pronounceable)
    }

    /// Whether a current key is loaded.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    /// Id of the current key, if loaded.
    pub async fn current_key_id(&self) -> Option<KeyId> {
        self.state
            .lock()
            .await
            .current
            .as_ref()
            .map(|key| key.key_id().clone())
    }

    /// Ids of retired keys, oldest first.
    pub async fn historical_key_ids(&self) -> Vec<KeyId> {
        self.state
            .lock()
            .await
            .historical
            .iter()
            .map(|key| key.key_id().clone())
            .collect()
    }

    /// Whether the current key is at least `key_rotation_days` old at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::NotInitialized`] before [`KeyVault::initialize`].
    pub async fn rotation_due(&self, now: u64, key_rotation_days: u32) -> BackupResult<bool> {
        let state = self.state.lock().await;
        let derived_at = state.current()?.derived_at();
        Ok(now >= derived_at.saturating_add(days_to_secs(key_rotation_days)))
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    fn load_metadata(&self) -> BackupResult<Option<KeyMetadata>> {
        self.secrets
            .get(KEY_METADATA_KEY)?
            .map(|bytes| KeyMetadata::deserialize(&bytes))
            .transpose()
    }

    fn load_history(&self) -> BackupResult<Vec<KeyMaterial>> {
        Ok(self
            .secrets
            .get(KEY_HISTORY_KEY)?
            .map(|bytes| KeyRing::deserialize(&bytes))
            .transpose()?
            .map(KeyRing::into_materials)
            .unwrap_or_default())
    }

    fn persist_current(&self, key: &KeyMaterial) -> BackupResult<()> {
        let verifier = cipher::seal(key, VERIFIER_MARKER, VERIFIER_CONTEXT)?;
        let metadata = KeyMetadata::new(key, self.iterations, verifier);
        self.secrets.set(KEY_METADATA_KEY, &metadata.serialize()?)
    }

    fn persist_history(&self, historical: &[KeyMaterial]) -> BackupResult<()> {
        let ring = KeyRing::from_keys(historical);
        let bytes = Zeroizing::new(ring.serialize()?);
        self.secrets.set(KEY_HISTORY_KEY, &bytes)
    }
}

fn ensure_non_empty(password: &SecretString) -> BackupResult<()> {
    if password.expose_secret().is_empty() {
        return Err(BackupError::InvalidPassword);
    }
    Ok(())
}

/// Maps anything but a password rejection to `INIT_FAILED`.
fn into_init_failed(err: BackupError) -> BackupError {
    match err {
        BackupError::InvalidPassword | BackupError::InitFailed { .. } => err,
        other => BackupError::init_failed(other.to_string()),
    }
}

/// Checks the stored verifier and a fresh round trip under `key`.
fn self_test(key: &KeyMaterial, verifier: &EncryptedBlob) -> bool {
    let stored = cipher::open(key, verifier, VERIFIER_CONTEXT)
        .is_ok_and(|marker| bool::from(marker.as_slice().ct_eq(VERIFIER_MARKER)));
    let fresh = cipher::seal(key, VERIFIER_MARKER, VERIFIER_CONTEXT)
        .and_then(|blob| cipher::open(key, &blob, VERIFIER_CONTEXT))
        .is_ok_and(|marker| bool::from(marker.as_slice().ct_eq(VERIFIER_MARKER)));
    stored && fresh
}

async fn derive_blocking(
    password: &SecretString,
    master_salt: [u8; SALT_LEN],
    backup_salt: [u8; SALT_LEN],
    derived_at: u64,
    iterations: u32,
) -> BackupResult<KeyMaterial> {
    let password = Zeroizing::new(password.expose_secret().as_bytes().to_vec());
    tokio::task::spawn_blocking(move || {
        KeyMaterial::derive(&password, master_salt, backup_salt, derived_at, iterations)
    })
    .await
    .map_err(|err| BackupError::encryption(format!("key derivation task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemorySecretStore;

    fn password(text: &str) -> SecretString {
        SecretString::from(text.to_string())
    }

    fn vault() -> (Arc<MemorySecretStore>, KeyVault) {
        let secrets = Arc::new(MemorySecretStore::new());
        let vault = KeyVault::new(secrets.clone());
        (secrets, vault)
    }

    fn vault_with_iterations(secrets: Arc<MemorySecretStore>, iterations: u32) -> KeyVault {
        KeyVault {
            secrets,
            iterations,
            state: Mutex::new(VaultState::default()),
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_then_unlocks() {
        let (secrets, vault) = vault();
        assert!(!vault.is_initialized().await);
        let created = vault.initialize(&password("CorrectHorse1")).await.unwrap();
        assert!(secrets.contains(KEY_METADATA_KEY));
        assert_eq!(created.strength_bits(), 256);

        let reopened = KeyVault::new(secrets);
        let unlocked = reopened.initialize(&password("CorrectHorse1")).await.unwrap();
        assert_eq!(unlocked.key_id(), created.key_id());
        assert_eq!(reopened.current_key_id().await, Some(created.key_id().clone()));
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let (secrets, vault) = vault();
        vault.initialize(&password("CorrectHorse1")).await.unwrap();

        let reopened = KeyVault::new(secrets);
        let err = reopened.initialize(&password("WrongHorse1")).await.unwrap_err();
        assert!(matches!(err, BackupError::InvalidPassword));
        assert!(!reopened.is_initialized().await);
    }

    #[tokio::test]
    async fn test_empty_password_is_rejected() {
        let (_, vault) = vault();
        assert!(matches!(
            vault.initialize(&password("")).await,
            Err(BackupError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_is_init_failed() {
        let (secrets, vault) = vault();
        secrets.set_fail_writes(true);
        assert!(matches!(
            vault.initialize(&password("CorrectHorse1")).await,
            Err(BackupError::InitFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_operations_require_initialization() {
        let (_, vault) = vault();
        assert!(matches!(
            vault.current_key().await,
            Err(BackupError::NotInitialized)
        ));
        assert!(matches!(
            vault.rotate_keys(&password("x")).await,
            Err(BackupError::NotInitialized)
        ));
        assert!(matches!(
            vault.resolve_key(&KeyId::from("abc")).await,
            Err(BackupError::NotInitialized)
        ));
        assert!(matches!(
            vault.export_keys(&password("x")).await,
            Err(BackupError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_key_resolvable() {
        let (secrets, vault) = vault();
        let first = vault.initialize(&password("CorrectHorse1")).await.unwrap();
        let second = vault.rotate_keys(&password("CorrectHorse1")).await.unwrap();
        assert_ne!(first.key_id(), second.key_id());

        assert_eq!(
            vault.resolve_key(first.key_id()).await.unwrap().key_id(),
            first.key_id()
        );
        assert_eq!(vault.historical_key_ids().await, vec![first.key_id().clone()]);

        // Survives a restart.
        let reopened = KeyVault::new(secrets);
        reopened.initialize(&password("CorrectHorse1")).await.unwrap();
        assert_eq!(reopened.current_key_id().await, Some(second.key_id().clone()));
        assert!(reopened.resolve_key(first.key_id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_rotations_keep_every_key() {
        let secrets = Arc::new(MemorySecretStore::new());
        let vault = vault_with_iterations(secrets.clone(), 1_000);
        let original = vault.initialize(&password("CorrectHorse1")).await.unwrap();

        let (pw_a, pw_b) = (password("CorrectHorse1"), password("CorrectHorse1"));
        let (a, b) = tokio::join!(vault.rotate_keys(&pw_a), vault.rotate_keys(&pw_b));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.key_id(), b.key_id());

        let current = vault.current_key_id().await.unwrap();
        let retired = if &current == a.key_id() { &b } else { &a };
        assert_eq!(
            vault.historical_key_ids().await,
            vec![original.key_id().clone(), retired.key_id().clone()]
        );
        for key in [&original, &a, &b] {
            assert!(vault.resolve_key(key.key_id()).await.is_ok());
        }

        let reopened = vault_with_iterations(secrets, 1_000);
        reopened.initialize(&password("CorrectHorse1")).await.unwrap();
        assert_eq!(reopened.historical_key_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rotation_uses_stored_iteration_count() {
        let secrets = Arc::new(MemorySecretStore::new());
        let old_policy = vault_with_iterations(secrets.clone(), 1_000);
        let first = old_policy.initialize(&password("CorrectHorse1")).await.unwrap();

        let new_policy = vault_with_iterations(secrets.clone(), 2_000);
        new_policy.initialize(&password("CorrectHorse1")).await.unwrap();
        let second = new_policy.rotate_keys(&password("CorrectHorse1")).await.unwrap();
        assert!(new_policy.resolve_key(first.key_id()).await.is_ok());

        let reopened = vault_with_iterations(secrets, 2_000);
        let unlocked = reopened.initialize(&password("CorrectHorse1")).await.unwrap();
        assert_eq!(unlocked.key_id(), second.key_id());
    }

    #[tokio::test]
    async fn test_rotation_with_wrong_password_keeps_state() {
        let (_, vault) = vault();
        let first = vault.initialize(&password("CorrectHorse1")).await.unwrap();
        assert!(matches!(
            vault.rotate_keys(&password("nope")).await,
            Err(BackupError::InvalidPassword)
        ));
        assert_eq!(vault.current_key_id().await, Some(first.key_id().clone()));
        assert!(vault.historical_key_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_id() {
        let (_, vault) = vault();
        vault.initialize(&password("CorrectHorse1")).await.unwrap();
        match vault.resolve_key(&KeyId::from("deadbeef")).await {
            Err(BackupError::KeyNotFound { key_id }) => assert_eq!(key_id, "deadbeef"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clear_keys_forgets_everything() {
        let (secrets, vault) = vault();
        vault.initialize(&password("CorrectHorse1")).await.unwrap();
        vault.rotate_keys(&password("CorrectHorse1")).await.unwrap();
        vault.clear_keys().await.unwrap();
        assert!(!vault.is_initialized().await);
        assert!(!secrets.contains(KEY_METADATA_KEY));
        assert!(!secrets.contains(KEY_HISTORY_KEY));
        assert!(secrets.keys().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_due() {
        let (_, vault) = vault();
        let key = vault.initialize(&password("CorrectHorse1")).await.unwrap();
        let derived_at = key.derived_at();
        assert!(!vault.rotation_due(derived_at, 180).await.unwrap());
        assert!(!vault
            .rotation_due(derived_at + days_to_secs(179), 180)
            .await
            .unwrap());
        assert!(vault
            .rotation_due(derived_at + days_to_secs(180), 180)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_import_over_existing_key_archives_it() {
        let (_, source) = vault();
        let exported_key = source.initialize(&password("Device1")).await.unwrap();
        let escrow = source.export_keys(&password("export")).await.unwrap();

        let (_, target) = vault();
        let local = target.initialize(&password("Device2")).await.unwrap();
        let imported = target
            .import_keys(&escrow, &password("export"))
            .await
            .unwrap();
        assert_eq!(imported.key_id(), exported_key.key_id());
        assert_eq!(target.historical_key_ids().await, vec![local.key_id().clone()]);
    }

    #[tokio::test]
    async fn test_import_with_wrong_password_changes_nothing() {
        let (_, source) = vault();
        source.initialize(&password("Device1")).await.unwrap();
        let escrow = source.export_keys(&password("export")).await.unwrap();

        let (_, target) = vault();
        let local = target.initialize(&password("Device2")).await.unwrap();
        assert!(matches!(
            target.import_keys(&escrow, &password("wrong")).await,
            Err(BackupError::DecryptionFailed { .. })
        ));
        assert_eq!(target.current_key_id().await, Some(local.key_id().clone()));
    }

    #[test]
    fn test_recovery_password_passthrough() {
        assert_eq!(KeyVault::generate_recovery_password(true).len(), 19);
        assert_eq!(KeyVault::generate_recovery_password(false).len(), 24);
    }
}
