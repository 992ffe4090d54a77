//! Persistence helpers for key metadata and the historical key ring.

use serde::{Deserialize, Serialize};

use super::derivation::SALT_LEN;
use super::material::{KeyMaterial, StoredKey};
use crate::cipher::EncryptedBlob;
use crate::error::{BackupError, BackupResult};
use crate::types::KeyId;
use crate::utils::{decode_cbor, encode_cbor};

const ENVELOPE_VERSION: u32 = 1;

/// Secret store entry holding the current key's salts and verifier.
pub(crate) const KEY_METADATA_KEY: &str = "memoirkit.key.metadata";

/// Secret store entry holding retired keys.
pub(crate) const KEY_HISTORY_KEY: &str = "memoirkit.key.history";

/// Everything needed to re-derive and check the current key from a password.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct KeyMetadata {
    pub(crate) version: u32,
    pub(crate) key_id: KeyId,
    pub(crate) master_salt: [u8; SALT_LEN],
    pub(crate) backup_salt: [u8; SALT_LEN],
    pub(crate) iterations: u32,
    pub(crate) derived_at: u64,
    /// Fixed marker sealed under the key at creation.
    pub(crate) verifier: EncryptedBlob,
}

impl KeyMetadata {
    pub(crate) fn new(key: &KeyMaterial, iterations: u32, verifier: EncryptedBlob) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            key_id: key.key_id().clone(),
            master_salt: *key.master_salt(),
            backup_salt: *key.backup_salt(),
            iterations,
            derived_at: key.derived_at(),
            verifier,
        }
    }

    pub(crate) fn serialize(&self) -> BackupResult<Vec<u8>> {
        encode_cbor(self)
    }

    pub(crate) fn deserialize(bytes: &[u8]) -> BackupResult<Self> {
        let metadata: Self = decode_cbor(bytes)?;
        check_version(metadata.version)?;
        Ok(metadata)
    }
}

/// Retired keys, oldest first.
#[derive(Serialize, Deserialize)]
pub(crate) struct KeyRing {
    pub(crate) version: u32,
    pub(crate) keys: Vec<StoredKey>,
}

impl KeyRing {
    pub(crate) fn from_keys<'a>(keys: impl IntoIterator<Item = &'a KeyMaterial>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            keys: keys.into_iter().map(KeyMaterial::to_stored).collect(),
        }
    }

    pub(crate) fn serialize(&self) -> BackupResult<Vec<u8>> {
        encode_cbor(self)
    }

    pub(crate) fn deserialize(bytes: &[u8]) -> BackupResult<Self> {
        let ring: Self = decode_cbor(bytes)?;
        check_version(ring.version)?;
        Ok(ring)
    }

    pub(crate) fn into_materials(self) -> Vec<KeyMaterial> {
        self.keys.into_iter().map(StoredKey::into_material).collect()
    }
}

fn check_version(version: u32) -> BackupResult<()> {
    if version != ENVELOPE_VERSION {
        return Err(BackupError::serialization(format!(
            "unsupported envelope version {version}"
        )));
    }
    Ok(())
}
