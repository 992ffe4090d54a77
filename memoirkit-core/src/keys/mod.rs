//! Key management for encrypted backups.
//!
//! # Key Hierarchy
//!
//! ```text
//! password ──PBKDF2(master_salt)──▶ master_key ──HKDF(backup_salt)──▶ backup_key
//!                                                                       │
//!                                                 key_id = H(label ‖ backup_key)
//! ```
//!
//! Only `backup_key` ever encrypts data. Each rotation produces a new
//! generation; retired generations are kept indefinitely so every backup's
//! `key_id` stays resolvable.

mod derivation;
mod envelope;
mod escrow;
mod material;
mod recovery;
mod vault;

pub use derivation::{PBKDF2_ITERATIONS, SALT_LEN};
pub use escrow::KeyEscrow;
pub use material::{KeyMaterial, KEY_STRENGTH_BITS};
pub use recovery::generate_recovery_password;
pub use vault::KeyVault;
