//! Small helpers shared across modules.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BackupError, BackupResult};

/// Seconds in one day.
pub const SECS_PER_DAY: u64 = 86_400;

/// Current wall-clock time in unix seconds.
///
/// A clock set before the epoch reads as `0`.
#[must_use]
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Converts a day count into seconds, saturating.
#[must_use]
pub fn days_to_secs(days: u32) -> u64 {
    u64::from(days).saturating_mul(SECS_PER_DAY)
}

/// Encodes a value as CBOR.
///
/// # Errors
///
/// Returns [`BackupError::Serialization`] if encoding fails.
pub fn encode_cbor<T: Serialize>(value: &T) -> BackupResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|err| BackupError::serialization(err.to_string()))?;
    Ok(bytes)
}

/// Decodes a CBOR value.
///
/// # Errors
///
/// Returns [`BackupError::Serialization`] if the bytes are not a valid `T`.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> BackupResult<T> {
    ciborium::de::from_reader(bytes).map_err(|err| BackupError::serialization(err.to_string()))
}
