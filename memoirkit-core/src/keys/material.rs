//! Key material for one key generation.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::derivation::{
    derive_backup_key, derive_key_id, derive_master_key, KEY_LEN, SALT_LEN,
};
use crate::error::BackupResult;
use crate::types::KeyId;

/// Security level of every key the vault produces.
pub const KEY_STRENGTH_BITS: u32 = 256;

/// Derived master/backup key pair plus the metadata that produced it.
///
/// Secrets are zeroized on drop and redacted from `Debug`. The salts are not
/// secret; they are kept so the same key can be re-derived from the
/// password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    #[zeroize(skip)]
    key_id: KeyId,
    master_key: [u8; KEY_LEN],
    backup_key: [u8; KEY_LEN],
    master_salt: [u8; SALT_LEN],
    backup_salt: [u8; SALT_LEN],
    #[zeroize(skip)]
    derived_at: u64,
}

impl KeyMaterial {
    /// Runs the full derivation chain for `password`.
    ///
    /// CPU heavy (PBKDF2); callers on an async runtime should run it on the
    /// blocking pool.
    ///
    /// # Errors
    ///
    /// Propagates KDF failures.
    pub(crate) fn derive(
        password: &[u8],
        master_salt: [u8; SALT_LEN],
        backup_salt: [u8; SALT_LEN],
        derived_at: u64,
        iterations: u32,
    ) -> BackupResult<Self> {
        let master_key = derive_master_key(password, &master_salt, iterations)?;
        let backup_key = derive_backup_key(&master_key, &backup_salt)?;
        Ok(Self::from_parts(
            *master_key,
            *backup_key,
            master_salt,
            backup_salt,
            derived_at,
        ))
    }

    pub(crate) fn from_parts(
        master_key: [u8; KEY_LEN],
        backup_key: [u8; KEY_LEN],
        master_salt: [u8; SALT_LEN],
        backup_salt: [u8; SALT_LEN],
        derived_at: u64,
    ) -> Self {
        Self {
            key_id: derive_key_id(&backup_key),
            master_key,
            backup_key,
            master_salt,
            backup_salt,
            derived_at,
        }
    }

    /// Public identifier of this key generation.
    #[must_use]
    pub const fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// When the key was derived (unix seconds).
    #[must_use]
    pub const fn derived_at(&self) -> u64 {
        self.derived_at
    }

    /// Security level in bits.
    #[must_use]
    pub const fn strength_bits(&self) -> u32 {
        KEY_STRENGTH_BITS
    }

    /// The key that seals backup data. Treat this as sensitive material.
    pub(crate) const fn backup_key(&self) -> &[u8; KEY_LEN] {
        &self.backup_key
    }

    pub(crate) const fn master_salt(&self) -> &[u8; SALT_LEN] {
        &self.master_salt
    }

    pub(crate) const fn backup_salt(&self) -> &[u8; SALT_LEN] {
        &self.backup_salt
    }

    pub(crate) fn to_stored(&self) -> StoredKey {
        StoredKey {
            master_key: self.master_key,
            backup_key: self.backup_key,
            master_salt: self.master_salt,
            backup_salt: self.backup_salt,
            derived_at: self.derived_at,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("derived_at", &self.derived_at)
            .field("strength_bits", &KEY_STRENGTH_BITS)
            .finish_non_exhaustive()
    }
}

/// Serialized form of a [`KeyMaterial`], used for the historical key ring
/// and escrow bundles. Never leaves the crate unencrypted except into the
/// platform [`SecretStore`](crate::platform::SecretStore).
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(crate) struct StoredKey {
    master_key: [u8; KEY_LEN],
    backup_key: [u8; KEY_LEN],
    master_salt: [u8; SALT_LEN],
    backup_salt: [u8; SALT_LEN],
    #[zeroize(skip)]
    derived_at: u64,
}

impl StoredKey {
    pub(crate) fn into_material(self) -> KeyMaterial {
        KeyMaterial::from_parts(
            self.master_key,
            self.backup_key,
            self.master_salt,
            self.backup_salt,
            self.derived_at,
        )
    }
}
