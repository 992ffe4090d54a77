//! Key derivation functions for the key vault.
//!
//! ```text
//! master_key = PBKDF2-HMAC-SHA256(password, master_salt, 120_000, 32)
//! backup_key = HKDF-SHA256(ikm = master_key, salt = backup_salt,
//!                          info = "memoirkit:backup-key", len = 32)
//! key_id     = hex(SHA256("memoirkit:key-id" || backup_key)[..16])
//! ```

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{BackupError, BackupResult};
use crate::types::KeyId;

// Domain Separation Labels

/// HKDF info for the backup key.
const LABEL_BACKUP_KEY: &[u8] = b"memoirkit:backup-key";

/// Label for key id derivation.
const LABEL_KEY_ID: &[u8] = b"memoirkit:key-id";

/// Label for salt entropy mixing.
const LABEL_SALT: &[u8] = b"memoirkit:salt";

/// PBKDF2 rounds for password-derived keys.
pub const PBKDF2_ITERATIONS: u32 = 120_000;

/// Salt length for every KDF input.
pub const SALT_LEN: usize = 32;

/// Length of derived keys.
pub const KEY_LEN: usize = 32;

/// Bytes of the SHA-256 digest kept for a key id.
const KEY_ID_LEN: usize = 16;

/// Derives the master key from a password.
///
/// # Errors
///
/// Returns [`BackupError::InvalidConfig`] if `iterations` is zero.
pub fn derive_master_key(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    iterations: u32,
) -> BackupResult<Zeroizing<[u8; KEY_LEN]>> {
    if iterations == 0 {
        return Err(BackupError::invalid_config(
            "PBKDF2 iterations must be non-zero",
        ));
    }
    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output[..]);
    Ok(output)
}

/// Derives the backup key from the master key.
///
/// # Errors
///
/// Returns [`BackupError::EncryptionFailed`] if HKDF expansion fails, which
/// cannot happen for a 32-byte output.
pub fn derive_backup_key(
    master_key: &[u8; KEY_LEN],
    salt: &[u8; SALT_LEN],
) -> BackupResult<Zeroizing<[u8; KEY_LEN]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(&salt[..]), &master_key[..]);
    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    hkdf.expand(LABEL_BACKUP_KEY, &mut output[..])
        .map_err(|_| BackupError::encryption("HKDF expansion failed"))?;
    Ok(output)
}

/// Derives the public key id naming a backup key.
#[must_use]
pub fn derive_key_id(backup_key: &[u8; KEY_LEN]) -> KeyId {
    let mut hasher = Sha256::new();
    hasher.update(LABEL_KEY_ID);
    hasher.update(backup_key);
    let hash = hasher.finalize();
    KeyId::new(hex::encode(&hash[..KEY_ID_LEN]))
}

/// Generates a fresh salt.
///
/// OS randomness is mixed with a UUIDv4 and the wall clock through SHA-256,
/// so a weak platform RNG alone cannot make two salts collide.
#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut os_bytes = Zeroizing::new([0u8; SALT_LEN]);
    OsRng.fill_bytes(&mut os_bytes[..]);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos());

    let mut hasher = Sha256::new();
    hasher.update(LABEL_SALT);
    hasher.update(&os_bytes[..]);
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(nanos.to_le_bytes());
    let hash = hasher.finalize();

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&hash);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let a = derive_master_key(b"CorrectHorse1", &salt, 1_000).unwrap();
        let b = derive_master_key(b"CorrectHorse1", &salt, 1_000).unwrap();
        let c = derive_master_key(b"CorrectHorse2", &salt, 1_000).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_master_key_depends_on_salt() {
        let a = derive_master_key(b"pw", &[1u8; SALT_LEN], 1_000).unwrap();
        let b = derive_master_key(b"pw", &[2u8; SALT_LEN], 1_000).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(derive_master_key(b"pw", &[0u8; SALT_LEN], 0).is_err());
    }

    #[test]
    fn test_backup_key_differs_from_master() {
        let master = [9u8; KEY_LEN];
        let backup = derive_backup_key(&master, &[3u8; SALT_LEN]).unwrap();
        assert_ne!(*backup, master);
        let other = derive_backup_key(&master, &[4u8; SALT_LEN]).unwrap();
        assert_ne!(*backup, *other);
    }

    #[test]
    fn test_key_id_format() {
        let id = derive_key_id(&[5u8; KEY_LEN]);
        assert_eq!(id.as_str().len(), KEY_ID_LEN * 2);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, derive_key_id(&[5u8; KEY_LEN]));
        assert_ne!(id, derive_key_id(&[6u8; KEY_LEN]));
    }

    #[test]
    fn test_salts_are_unique() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
