//! Gating checks evaluated before a backup run touches any data.

use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::platform::{ConnectionType, DeviceStatus};

/// Checks whether a backup may start now.
///
/// Order matters and is part of the contract: disabled, then connectivity
/// (manual runs too), then the automatic-only wifi and battery gates.
///
/// # Errors
///
/// Returns the first failing gate: [`BackupError::BackupDisabled`],
/// [`BackupError::NoNetwork`], [`BackupError::WifiRequired`] or
/// [`BackupError::LowBattery`].
pub fn check(config: &BackupConfig, device: &dyn DeviceStatus, manual: bool) -> BackupResult<()> {
    if !config.backup_enabled {
        return Err(BackupError::BackupDisabled);
    }
    if !device.is_connected() {
        return Err(BackupError::NoNetwork);
    }
    if manual {
        return Ok(());
    }
    if config.wifi_only_backup && device.connection_type() != ConnectionType::Wifi {
        return Err(BackupError::WifiRequired);
    }
    if config.low_power_mode {
        let level = device.battery_level();
        if level < config.low_battery_threshold {
            return Err(BackupError::LowBattery {
                level,
                threshold: config.low_battery_threshold,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::error::ErrorCode;
    use crate::platform::memory::MemoryDeviceStatus;

    struct Case {
        enabled: bool,
        wifi_only: bool,
        low_power: bool,
        connection: ConnectionType,
        battery: f32,
    }

    const OK_DEVICE: Case = Case {
        enabled: true,
        wifi_only: false,
        low_power: false,
        connection: ConnectionType::Wifi,
        battery: 1.0,
    };

    fn evaluate(case: &Case, manual: bool) -> Option<ErrorCode> {
        let config = BackupConfig {
            backup_enabled: case.enabled,
            wifi_only_backup: case.wifi_only,
            low_power_mode: case.low_power,
            ..BackupConfig::default()
        };
        let device = MemoryDeviceStatus::new();
        device.set_connection(case.connection);
        device.set_battery_level(case.battery);
        check(&config, &device, manual).err().map(|err| err.code())
    }

    #[test_case(OK_DEVICE, false => None ; "healthy automatic run")]
    #[test_case(Case { enabled: false, ..OK_DEVICE }, true => Some(ErrorCode::BackupDisabled) ; "disabled blocks manual")]
    #[test_case(Case { enabled: false, connection: ConnectionType::None, ..OK_DEVICE }, false => Some(ErrorCode::BackupDisabled) ; "disabled wins over offline")]
    #[test_case(Case { connection: ConnectionType::None, ..OK_DEVICE }, true => Some(ErrorCode::NoNetwork) ; "offline blocks manual")]
    #[test_case(Case { wifi_only: true, connection: ConnectionType::Cellular, ..OK_DEVICE }, false => Some(ErrorCode::WifiRequired) ; "cellular blocks wifi only")]
    #[test_case(Case { wifi_only: true, connection: ConnectionType::Cellular, ..OK_DEVICE }, true => None ; "manual ignores wifi only")]
    #[test_case(Case { low_power: true, battery: 0.1, ..OK_DEVICE }, false => Some(ErrorCode::LowBattery) ; "low battery blocks automatic")]
    #[test_case(Case { low_power: true, battery: 0.1, ..OK_DEVICE }, true => None ; "manual ignores low battery")]
    #[test_case(Case { low_power: false, battery: 0.05, ..OK_DEVICE }, false => None ; "battery ignored outside low power mode")]
    #[test_case(Case { low_power: true, battery: 0.2, ..OK_DEVICE }, false => None ; "threshold is inclusive")]
    #[test_case(Case { wifi_only: true, low_power: true, connection: ConnectionType::Cellular, battery: 0.1, ..OK_DEVICE }, false => Some(ErrorCode::WifiRequired) ; "wifi checked before battery")]
    fn test_preflight(case: Case, manual: bool) -> Option<ErrorCode> {
        evaluate(&case, manual)
    }
}
