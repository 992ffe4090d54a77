//! Password-wrapped key export for off-device storage.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::derivation::{
    derive_key_id, derive_master_key, generate_salt, PBKDF2_ITERATIONS, SALT_LEN,
};
use super::material::{KeyMaterial, StoredKey};
use crate::cipher::{open_with_raw_key, seal_with_raw_key, EncryptedBlob};
use crate::error::{BackupError, BackupResult};
use crate::utils::{decode_cbor, encode_cbor};

const ESCROW_VERSION: u32 = 1;

/// Associated data label for escrow blobs.
const ESCROW_CONTEXT: &[u8] = b"memoirkit:escrow:v1";

/// Upper bound on the iteration count an escrow may ask for.
const MAX_ESCROW_ITERATIONS: u32 = 10 * PBKDF2_ITERATIONS;

/// Exported key material, sealed under a key derived from an export password.
///
/// Carries the current key and every historical key, so importing it on a
/// new device restores access to every backup made with any of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEscrow {
    version: u32,
    salt: [u8; SALT_LEN],
    iterations: u32,
    blob: EncryptedBlob,
}

#[derive(Serialize, Deserialize)]
struct EscrowBundle {
    current: StoredKey,
    historical: Vec<StoredKey>,
}

impl KeyEscrow {
    /// Seals `current` and `historical` under `password`.
    pub(crate) fn seal(
        current: &KeyMaterial,
        historical: &[KeyMaterial],
        password: &[u8],
        iterations: u32,
    ) -> BackupResult<Self> {
        let salt = generate_salt();
        let wrap_key = derive_master_key(password, &salt, iterations)?;
        let bundle = EscrowBundle {
            current: current.to_stored(),
            historical: historical.iter().map(KeyMaterial::to_stored).collect(),
        };
        let plaintext = Zeroizing::new(encode_cbor(&bundle)?);
        let blob = seal_with_raw_key(&wrap_key, &derive_key_id(&wrap_key), &plaintext, ESCROW_CONTEXT)?;
        Ok(Self {
            version: ESCROW_VERSION,
            salt,
            iterations,
            blob,
        })
    }

    /// Authenticates and opens the escrow.
    ///
    /// Returns the current key followed by the historical keys. An iteration
    /// count above [`MAX_ESCROW_ITERATIONS`] is rejected before deriving.
    pub(crate) fn open(&self, password: &[u8]) -> BackupResult<(KeyMaterial, Vec<KeyMaterial>)> {
        if self.iterations > MAX_ESCROW_ITERATIONS {
            return Err(BackupError::decryption(format!(
                "escrow iteration count {} out of range",
                self.iterations
            )));
        }
        let wrap_key = derive_master_key(password, &self.salt, self.iterations)?;
        if derive_key_id(&wrap_key) != self.blob.key_id {
            return Err(BackupError::decryption("escrow password does not match"));
        }
        let plaintext = Zeroizing::new(open_with_raw_key(&wrap_key, &self.blob, ESCROW_CONTEXT)?);
        let bundle: EscrowBundle = decode_cbor(&plaintext)?;
        let EscrowBundle {
            current,
            historical,
        } = bundle;
        Ok((
            current.into_material(),
            historical.into_iter().map(StoredKey::into_material).collect(),
        ))
    }

    /// When the escrow was sealed (unix seconds).
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.blob.created_at
    }

    /// Encodes the escrow as CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> BackupResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes an escrow produced by [`KeyEscrow::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Serialization`] for malformed input or an
    /// unsupported version.
    pub fn from_bytes(bytes: &[u8]) -> BackupResult<Self> {
        let escrow: Self = decode_cbor(bytes)?;
        if escrow.version != ESCROW_VERSION {
            return Err(BackupError::serialization(format!(
                "unsupported escrow version {}",
                escrow.version
            )));
        }
        Ok(escrow)
    }

    /// Encodes the escrow as base64 text, suitable for printing or a QR code.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Serialization`] if encoding fails.
    pub fn to_base64(&self) -> BackupResult<String> {
        Ok(STANDARD.encode(self.to_bytes()?))
    }

    /// Decodes base64 text produced by [`KeyEscrow::to_base64`].
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Serialization`] for invalid base64 or CBOR.
    pub fn from_base64(text: &str) -> BackupResult<Self> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|err| BackupError::serialization(format!("invalid escrow text: {err}")))?;
        Self::from_bytes(&bytes)
    }
}
