//! Protocol commands
//!
//! Defines the JSON commands the host sends on the command channel.
//! Field names are fixed by the device firmware.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Channel, Frame};

/// `ID` of the battery status request and response
pub const GET_BATTERY_STATUS_ID: &str = "GetBatteryStatus";
/// `ID` of the device info request and response
pub const GET_DEVICE_INFO_ID: &str = "GetDeviceInfo";
/// `ID` of the service port switch request
pub const SWITCH_TO_SERVICE_PORT_ID: &str = "SwitchToServicePort";
/// `ID` of the variable write request
pub const SET_VARIABLE_ID: &str = "SetVariable";

/// Device variable controlling the AC power relay
pub const AC_POWER_VARIABLE: &str = "AC_POWER_EN";

/// Event payload marker that triggers a service-port switch
pub const ERROR_STATUS_CHANGE: &str = "ErrorStatusChange";

/// Commands understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Request SOC, voltage and charger state
    GetBatteryStatus,

    /// Request product number, serial number and firmware version
    GetDeviceInfo,

    /// Move the device's command handling onto the service port
    SwitchToServicePort,

    /// Switch the AC power relay on or off (`SetVariable AC_POWER_EN`)
    SetAcPower(bool),
}

impl Command {
    /// Command identifier as sent in the `ID` field
    pub fn id(&self) -> &'static str {
        match self {
            Command::GetBatteryStatus => GET_BATTERY_STATUS_ID,
            Command::GetDeviceInfo => GET_DEVICE_INFO_ID,
            Command::SwitchToServicePort => SWITCH_TO_SERVICE_PORT_ID,
            Command::SetAcPower(_) => SET_VARIABLE_ID,
        }
    }

    /// The `Content` object for this command
    pub fn content(&self) -> serde_json::Value {
        match self {
            Command::SetAcPower(on) => {
                let value = if *on { "1" } else { "0" };
                json!({ "Name": AC_POWER_VARIABLE, "Value": value })
            }
            _ => json!({}),
        }
    }

    /// Full JSON payload text
    pub fn payload(&self) -> String {
        json!({
            "ID": self.id(),
            "Content": self.content(),
        })
        .to_string()
    }

    /// Build the command frame
    pub fn to_frame(&self) -> Frame {
        Frame::new(Channel::Command, self.payload().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_simple_command_payload() {
        let value: Value = serde_json::from_str(&Command::GetBatteryStatus.payload()).unwrap();
        assert_eq!(value["ID"], "GetBatteryStatus");
        assert!(value["Content"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_set_ac_power_payload() {
        let on: Value = serde_json::from_str(&Command::SetAcPower(true).payload()).unwrap();
        assert_eq!(on["ID"], "SetVariable");
        assert_eq!(on["Content"]["Name"], "AC_POWER_EN");
        assert_eq!(on["Content"]["Value"], "1");

        let off: Value = serde_json::from_str(&Command::SetAcPower(false).payload()).unwrap();
        assert_eq!(off["Content"]["Value"], "0");
    }

    #[test]
    fn test_commands_go_on_command_channel() {
        let frame = Command::SwitchToServicePort.to_frame();
        assert_eq!(frame.channel, Channel::Command);
        assert!(frame.text().contains("SwitchToServicePort"));
    }
}
