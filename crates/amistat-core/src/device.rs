//! Device and battery state
//!
//! Snapshots are replaced wholesale on every update, never patched in place,
//! so a cloned snapshot is always internally consistent.

use serde::{Deserialize, Serialize};

/// Latest known battery state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// State of charge, 0-100
    pub soc: i32,
    /// Pack voltage in millivolts
    pub voltage_mv: i32,
    pub charging: bool,
    /// Charger state of the previous sample
    pub was_charging: bool,
    /// Mean SOC over the averaging window
    pub average_percentage: f64,
    /// Mean voltage over the averaging window
    pub average_voltage: f64,
    /// Window has filled at least once since the last reset
    pub average_is_valid: bool,
}

impl BatteryStatus {
    /// Human-readable charger state, as written to battery logs
    pub fn charger_text(&self) -> &'static str {
        if self.charging {
            "Charging"
        } else {
            "Disconnected"
        }
    }
}

/// Identity of the connected device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub product_number: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub product_type: i64,
    /// A device is currently answering
    pub connection_status: bool,
    /// `connection_status` before this snapshot replaced the previous one
    pub device_was_connected: bool,
}

/// Debounced domain events derived from decoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceEvent {
    DeviceConnected,
    DeviceDisconnected,
    ChargerConnected,
    ChargerDisconnected,
    /// A log record requested by the operator rather than by the device
    UserRequest,
}

impl DeviceEvent {
    /// Event name as used in battery logs
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceEvent::DeviceConnected => "DeviceConnected",
            DeviceEvent::DeviceDisconnected => "DeviceDisconnected",
            DeviceEvent::ChargerConnected => "ChargerConnected",
            DeviceEvent::ChargerDisconnected => "ChargerDisconnected",
            DeviceEvent::UserRequest => "UserRequest",
        }
    }
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_disconnected() {
        let info = DeviceInfo::default();
        assert!(!info.connection_status);
        assert!(info.serial_number.is_empty());

        let status = BatteryStatus::default();
        assert!(!status.average_is_valid);
        assert_eq!(status.charger_text(), "Disconnected");
    }

    #[test]
    fn test_event_names() {
        assert_eq!(DeviceEvent::ChargerConnected.to_string(), "ChargerConnected");
        assert_eq!(DeviceEvent::DeviceDisconnected.as_str(), "DeviceDisconnected");
    }
}
