//! Device state consulted by backup preflight.

use strum::{Display, EnumString};

/// Active network transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionType {
    /// Wifi or ethernet.
    Wifi,
    /// Metered mobile data.
    Cellular,
    /// No transport.
    None,
}

/// Read-only snapshot source for connectivity and battery.
///
/// Implementations should answer from cached OS state; preflight calls these
/// synchronously at the start of every run.
pub trait DeviceStatus: Send + Sync {
    /// Whether any network is reachable.
    fn is_connected(&self) -> bool;

    /// The active transport.
    fn connection_type(&self) -> ConnectionType;

    /// Battery charge in `0.0..=1.0`.
    fn battery_level(&self) -> f32;
}
