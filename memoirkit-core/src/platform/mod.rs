//! Platform abstraction traits for the backup subsystem.
//!
//! The pipelines never touch the filesystem, the network or the device
//! directly. Every host-provided capability sits behind a trait:
//!
//! - [`SecretStore`] — Secure storage for key metadata, historical keys and
//!   backup history
//! - [`LocalStore`] — The host's memory library
//! - [`DeviceStatus`] — Connectivity and battery state used by preflight
//! - [`ObjectStore`] — Remote chunked object storage (async)
//!
//! # Platform Implementations
//!
//! ## iOS (Swift)
//! - `SecretStore`: Keychain Services
//! - `LocalStore`: Core Data memory library
//! - `DeviceStatus`: `NWPathMonitor` + `UIDevice` battery
//! - `ObjectStore`: `URLSession` against the backup API
//!
//! ## Android (Kotlin)
//! - `SecretStore`: `EncryptedSharedPreferences`
//! - `LocalStore`: Room database
//! - `DeviceStatus`: `ConnectivityManager` + `BatteryManager`
//! - `ObjectStore`: OkHttp against the backup API
//!
//! [`memory`] provides in-memory implementations with fault injection for
//! tests.

mod device;
mod local_store;
pub mod memory;
mod object_store;
mod secret_store;

pub use device::{ConnectionType, DeviceStatus};
pub use local_store::{ItemFilter, LocalStore};
pub use object_store::{ObjectStore, TransportError, TransportErrorKind, TransportResult};
pub use secret_store::SecretStore;

// Re-export memory implementations for testing
pub use memory::MemoryPlatform;
