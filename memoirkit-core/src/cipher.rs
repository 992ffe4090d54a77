//! Stateless AEAD primitives shared by the backup and restore pipelines.
//!
//! Every blob is AES-256-GCM with a fresh random 96-bit IV. The associated
//! data always binds the key id and algorithm, so a blob presented under the
//! wrong key id fails authentication instead of decrypting to garbage:
//!
//! ```text
//! aad = "memoirkit:blob:v1" || len(key_id) (u32 BE) || key_id || algorithm || context
//! ```
//!
//! `context` is caller supplied. The backup pipeline uses
//! `backup_id || chunk_index` so chunks cannot be swapped between backups or
//! reordered inside one.
//!
//! # Chunk frames
//!
//! Uploaded chunks use a compact frame; key id, algorithm and timestamp live
//! in the manifest instead of being repeated per chunk:
//!
//! ```text
//! [1 byte: version=1][12 bytes: IV][16 bytes: tag][N bytes: ciphertext]
//! ```

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use subtle::ConstantTimeEq;

use crate::error::{BackupError, BackupResult};
use crate::keys::KeyMaterial;
use crate::types::KeyId;
use crate::utils::now_unix_secs;

/// AES-GCM IV length.
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Current chunk frame version.
pub const FRAME_VERSION: u8 = 1;

/// Bytes a frame adds on top of the ciphertext.
pub const FRAME_OVERHEAD: usize = 1 + IV_SIZE + TAG_SIZE;

const LABEL_BLOB_AD: &[u8] = b"memoirkit:blob:v1";

/// AEAD algorithm identifier stored alongside ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum AlgorithmId {
    /// AES-256 in Galois/Counter Mode.
    #[serde(rename = "aes-256-gcm")]
    #[strum(serialize = "aes-256-gcm")]
    Aes256Gcm,
}

/// Authenticated ciphertext plus everything needed to open it.
///
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Ciphertext without the tag.
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    /// Random per-blob IV.
    pub iv: [u8; IV_SIZE],
    /// GCM authentication tag.
    pub auth_tag: [u8; TAG_SIZE],
    /// Key generation that sealed the blob.
    pub key_id: KeyId,
    /// Algorithm used.
    pub algorithm_id: AlgorithmId,
    /// Creation time (unix seconds).
    pub created_at: u64,
}

/// Encrypts `plaintext` under the backup key of `key`.
///
/// # Errors
///
/// Returns [`BackupError::EncryptionFailed`] if the AEAD refuses the input.
pub fn encrypt(key: &KeyMaterial, plaintext: &[u8]) -> BackupResult<EncryptedBlob> {
    seal(key, plaintext, &[])
}

/// Decrypts a blob produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`BackupError::DecryptionFailed`] on a key id mismatch, tampering
/// or a wrong key.
pub fn decrypt(key: &KeyMaterial, blob: &EncryptedBlob) -> BackupResult<Vec<u8>> {
    open(key, blob, &[])
}

/// Encrypts `plaintext`, additionally authenticating `context`.
///
/// # Errors
///
/// Returns [`BackupError::EncryptionFailed`] if the AEAD refuses the input.
pub fn seal(key: &KeyMaterial, plaintext: &[u8], context: &[u8]) -> BackupResult<EncryptedBlob> {
    seal_with_raw_key(key.backup_key(), key.key_id(), plaintext, context)
}

/// Decrypts a blob, verifying the same `context` used by [`seal`].
///
/// # Errors
///
/// Returns [`BackupError::DecryptionFailed`] on a key id mismatch, tampering,
/// a wrong key or a context mismatch.
pub fn open(key: &KeyMaterial, blob: &EncryptedBlob, context: &[u8]) -> BackupResult<Vec<u8>> {
    if blob.key_id != *key.key_id() {
        return Err(BackupError::decryption(format!(
            "blob sealed under key {} but key {} supplied",
            blob.key_id,
            key.key_id()
        )));
    }
    open_with_raw_key(key.backup_key(), blob, context)
}

pub(crate) fn seal_with_raw_key(
    key: &[u8; 32],
    key_id: &KeyId,
    plaintext: &[u8],
    context: &[u8],
) -> BackupResult<EncryptedBlob> {
    let algorithm_id = AlgorithmId::Aes256Gcm;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let aad = build_associated_data(key_id, algorithm_id, context);
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| BackupError::encryption("AES-256-GCM encryption failed"))?;

    let tag_start = sealed
        .len()
        .checked_sub(TAG_SIZE)
        .ok_or_else(|| BackupError::encryption("sealed output shorter than tag"))?;
    let tag_bytes = sealed.split_off(tag_start);
    let mut auth_tag = [0u8; TAG_SIZE];
    auth_tag.copy_from_slice(&tag_bytes);

    Ok(EncryptedBlob {
        ciphertext: sealed,
        iv,
        auth_tag,
        key_id: key_id.clone(),
        algorithm_id,
        created_at: now_unix_secs(),
    })
}

pub(crate) fn open_with_raw_key(
    key: &[u8; 32],
    blob: &EncryptedBlob,
    context: &[u8],
) -> BackupResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let aad = build_associated_data(&blob.key_id, blob.algorithm_id, context);

    let mut combined = Vec::with_capacity(blob.ciphertext.len() + TAG_SIZE);
    combined.extend_from_slice(&blob.ciphertext);
    combined.extend_from_slice(&blob.auth_tag);

    cipher
        .decrypt(
            Nonce::from_slice(&blob.iv),
            Payload {
                msg: &combined,
                aad: &aad,
            },
        )
        .map_err(|_| BackupError::decryption("AES-256-GCM authentication failed"))
}

fn build_associated_data(key_id: &KeyId, algorithm_id: AlgorithmId, context: &[u8]) -> Vec<u8> {
    let algorithm: &'static str = match algorithm_id {
        AlgorithmId::Aes256Gcm => "aes-256-gcm",
    };
    let key_id = key_id.as_bytes();
    let mut aad =
        Vec::with_capacity(LABEL_BLOB_AD.len() + 4 + key_id.len() + algorithm.len() + context.len());
    aad.extend_from_slice(LABEL_BLOB_AD);
    aad.extend_from_slice(&u32::try_from(key_id.len()).unwrap_or(u32::MAX).to_be_bytes());
    aad.extend_from_slice(key_id);
    aad.extend_from_slice(algorithm.as_bytes());
    aad.extend_from_slice(context);
    aad
}

// =============================================================================
// Checksums
// =============================================================================

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compares the checksum of `bytes` with `digest` in constant time.
#[must_use]
pub fn verify_checksum(bytes: &[u8], digest: &str) -> bool {
    digests_match(&checksum(bytes), digest)
}

/// Constant-time equality for hex digests, case-insensitive on the expected side.
#[must_use]
pub fn digests_match(computed: &str, expected: &str) -> bool {
    let expected = expected.to_ascii_lowercase();
    computed.len() == expected.len() && bool::from(computed.as_bytes().ct_eq(expected.as_bytes()))
}

/// Incremental checksum over an ordered sequence of chunk frames.
#[derive(Default)]
pub struct RunningChecksum {
    hasher: Sha256,
}

impl RunningChecksum {
    /// Starts an empty checksum.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next frame.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Returns the lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

// =============================================================================
// Chunk frames
// =============================================================================

/// Encodes a blob as an upload frame.
#[must_use]
pub fn encode_frame(blob: &EncryptedBlob) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + blob.ciphertext.len());
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&blob.iv);
    frame.extend_from_slice(&blob.auth_tag);
    frame.extend_from_slice(&blob.ciphertext);
    frame
}

/// Rebuilds a blob from an upload frame and the manifest-level fields.
///
/// # Errors
///
/// Returns [`BackupError::DecryptionFailed`] if the frame is truncated or has
/// an unknown version.
pub fn decode_frame(
    frame: &[u8],
    key_id: &KeyId,
    algorithm_id: AlgorithmId,
    created_at: u64,
) -> BackupResult<EncryptedBlob> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(BackupError::decryption(format!(
            "chunk frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != FRAME_VERSION {
        return Err(BackupError::decryption(format!(
            "unsupported chunk frame version {}",
            frame[0]
        )));
    }
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&frame[1..=IV_SIZE]);
    let mut auth_tag = [0u8; TAG_SIZE];
    auth_tag.copy_from_slice(&frame[1 + IV_SIZE..FRAME_OVERHEAD]);

    Ok(EncryptedBlob {
        ciphertext: frame[FRAME_OVERHEAD..].to_vec(),
        iv,
        auth_tag,
        key_id: key_id.clone(),
        algorithm_id,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_support::test_key;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key(1);
        for plaintext in [&b""[..], b"a", b"memoir of a summer in 1962", &[7u8; 4096][..]] {
            let blob = encrypt(&key, plaintext).unwrap();
            assert_eq!(blob.key_id, *key.key_id());
            assert_eq!(blob.algorithm_id, AlgorithmId::Aes256Gcm);
            assert_eq!(decrypt(&key, &blob).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_iv_is_fresh_per_call() {
        let key = test_key(1);
        let first = encrypt(&key, b"same plaintext").unwrap();
        let second = encrypt(&key, b"same plaintext").unwrap();
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_every_bit_flip_fails_authentication() {
        let key = test_key(1);
        let blob = encrypt(&key, b"grandpa's war stories").unwrap();

        for byte in 0..blob.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = blob.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(
                    decrypt(&key, &tampered),
                    Err(BackupError::DecryptionFailed { .. })
                ));
            }
        }
        for byte in 0..IV_SIZE {
            let mut tampered = blob.clone();
            tampered.iv[byte] ^= 0x01;
            assert!(matches!(
                decrypt(&key, &tampered),
                Err(BackupError::DecryptionFailed { .. })
            ));
        }
        for byte in 0..TAG_SIZE {
            let mut tampered = blob.clone();
            tampered.auth_tag[byte] ^= 0x80;
            assert!(matches!(
                decrypt(&key, &tampered),
                Err(BackupError::DecryptionFailed { .. })
            ));
        }
    }

    #[test]
    fn test_key_id_is_bound_to_ciphertext() {
        let key = test_key(1);
        let blob = encrypt(&key, b"letters from the front").unwrap();

        let mut relabeled = blob.clone();
        relabeled.key_id = KeyId::from("00112233445566778899aabbccddeeff");
        assert!(decrypt(&key, &relabeled).is_err());
        // Even with the id check bypassed, the AEAD rejects the relabeled blob.
        assert!(open_with_raw_key(key.backup_key(), &relabeled, &[]).is_err());
        assert!(open_with_raw_key(key.backup_key(), &blob, &[]).is_ok());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = test_key(1);
        let other = test_key(2);
        let blob = encrypt(&key, b"secret").unwrap();
        assert!(matches!(
            decrypt(&other, &blob),
            Err(BackupError::DecryptionFailed { .. })
        ));

        // Same key id but different secret still fails in the AEAD.
        let forged = open_with_raw_key(other.backup_key(), &blob, &[]);
        assert!(matches!(forged, Err(BackupError::DecryptionFailed { .. })));
    }

    #[test]
    fn test_context_is_authenticated() {
        let key = test_key(3);
        let blob = seal(&key, b"chunk", b"backup-a:0").unwrap();
        assert_eq!(open(&key, &blob, b"backup-a:0").unwrap(), b"chunk");
        assert!(open(&key, &blob, b"backup-a:1").is_err());
        assert!(decrypt(&key, &blob).is_err());
    }

    #[test]
    fn test_checksum_known_vector() {
        assert_eq!(
            checksum(b"hello, world!"),
            "68e656b251e67e8358bef8483ab0d51c6619f3e7a1a9f0e75838d41ff368f728"
        );
        assert!(verify_checksum(
            b"hello, world!",
            "68E656B251E67E8358BEF8483AB0D51C6619F3E7A1A9F0E75838D41FF368F728"
        ));
        assert!(!verify_checksum(b"hello, world?", &checksum(b"hello, world!")));
        assert!(!verify_checksum(b"hello, world!", "68e6"));
    }

    #[test]
    fn test_running_checksum_matches_concatenation() {
        let mut running = RunningChecksum::new();
        running.update(b"abc");
        running.update(b"def");
        assert_eq!(running.finalize_hex(), checksum(b"abcdef"));
    }

    #[test]
    fn test_frame_roundtrip_preserves_authentication() {
        let key = test_key(4);
        let blob = seal(&key, b"frame me", b"ctx").unwrap();
        let frame = encode_frame(&blob);
        assert_eq!(frame.len(), FRAME_OVERHEAD + blob.ciphertext.len());

        let decoded = decode_frame(&frame, key.key_id(), AlgorithmId::Aes256Gcm, 0).unwrap();
        assert_eq!(open(&key, &decoded, b"ctx").unwrap(), b"frame me");

        let mut corrupt = frame;
        corrupt[0] = 9;
        assert!(decode_frame(&corrupt, key.key_id(), AlgorithmId::Aes256Gcm, 0).is_err());
        assert!(decode_frame(&[1, 2, 3], key.key_id(), AlgorithmId::Aes256Gcm, 0).is_err());
    }
}
