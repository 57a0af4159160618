//! Command dispatcher
//!
//! Interprets decoded frames: updates device and battery state, decides which
//! follow-up commands to send and which domain events a frame produces. The
//! dispatcher performs no I/O itself; the session writes the returned commands
//! and delivers the notifications.

use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use crate::device::{BatteryStatus, DeviceEvent, DeviceInfo};
use crate::protocol::{
    Channel, Command, Frame, ProtocolError, ERROR_STATUS_CHANGE, GET_BATTERY_STATUS_ID,
    GET_DEVICE_INFO_ID,
};
use crate::telemetry::{PushOutcome, TelemetryWindow};

/// Status frames after a (re)connect that never produce charger events
pub const STABILIZATION_FRAMES: u32 = 2;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "ID")]
    id: Option<String>,
    #[serde(rename = "Content")]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatteryStatusContent {
    charging: bool,
    #[serde(rename = "SOC")]
    soc: i32,
    voltage: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceInfoContent {
    product_number: String,
    fw_main_version: String,
    serial_number: String,
    product_type: i64,
}

fn parse_content<T: serde::de::DeserializeOwned>(content: Option<Value>) -> Result<T, ProtocolError> {
    let content = content.ok_or(ProtocolError::MissingField("Content"))?;
    Ok(serde_json::from_value(content)?)
}

/// Everything a single frame caused
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Payload text, NUL padding removed
    pub text: String,
    /// `ID` of a command-channel frame
    pub command_id: Option<String>,
    /// Parsed JSON object of a command-channel frame
    pub json: Option<Value>,
    /// Domain events, in the order they were detected
    pub events: Vec<DeviceEvent>,
    /// Commands to send in response, in order
    pub commands: Vec<Command>,
    /// Set when this frame introduced a new device
    pub new_device: Option<DeviceInfo>,
    /// Set the first time the averaging window filled
    pub averages_became_valid: bool,
}

/// Owner of the device/battery state for one session
#[derive(Debug)]
pub struct Dispatcher {
    device_info: DeviceInfo,
    battery_status: BatteryStatus,
    window: TelemetryWindow,
    /// Status frames since the last (re)connect
    stabilization_counter: u32,
    last_status_at: Option<Instant>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            device_info: DeviceInfo::default(),
            battery_status: BatteryStatus::default(),
            window: TelemetryWindow::new(),
            stabilization_counter: 0,
            last_status_at: None,
        }
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn battery_status(&self) -> &BatteryStatus {
        &self.battery_status
    }

    pub fn window(&self) -> &TelemetryWindow {
        &self.window
    }

    /// When the last battery status frame was parsed
    pub fn last_status_at(&self) -> Option<Instant> {
        self.last_status_at
    }

    /// Handle one decoded frame.
    ///
    /// An `Err` means the payload could not be interpreted; the frame must be
    /// dropped without notifying anyone. State is left untouched in that case.
    ///
    /// A status frame consumed as the grace sample after a reset still
    /// returns `Ok`: it advances the stabilization counter and the
    /// last-status time, carries its `command_id`, and is delivered to the
    /// consumer, but produces no events and leaves `BatteryStatus` as it was.
    pub fn dispatch(&mut self, frame: &Frame) -> Result<DispatchOutcome, ProtocolError> {
        let mut outcome = DispatchOutcome {
            text: frame.text(),
            ..Default::default()
        };

        match frame.channel {
            Channel::Heartbeat => {
                outcome.commands.push(Command::GetBatteryStatus);
            }
            Channel::Event => {
                if outcome.text.contains(ERROR_STATUS_CHANGE) {
                    tracing::info!("device reported an error status change, switching to service port");
                    outcome.commands.push(Command::SwitchToServicePort);
                    outcome.commands.push(Command::GetDeviceInfo);
                }
            }
            _ => self.dispatch_json(&mut outcome)?,
        }

        Ok(outcome)
    }

    fn dispatch_json(&mut self, outcome: &mut DispatchOutcome) -> Result<(), ProtocolError> {
        let json: Value = serde_json::from_str(&outcome.text)?;
        if !json.is_object() {
            return Err(ProtocolError::MalformedFrame(format!(
                "expected a JSON object, got '{}'",
                outcome.text
            )));
        }
        let envelope = Envelope::deserialize(&json)?;

        if let Some(id) = envelope.id.as_deref() {
            match id {
                GET_BATTERY_STATUS_ID => {
                    let content: BatteryStatusContent = parse_content(envelope.content)?;
                    self.on_battery_status(content, outcome);
                }
                GET_DEVICE_INFO_ID => {
                    let content: DeviceInfoContent = parse_content(envelope.content)?;
                    self.on_device_info(content, outcome);
                }
                other => tracing::trace!("no handler for command response '{}'", other),
            }
        }

        outcome.command_id = envelope.id;
        outcome.json = Some(json);
        Ok(())
    }

    fn on_battery_status(&mut self, content: BatteryStatusContent, outcome: &mut DispatchOutcome) {
        self.last_status_at = Some(Instant::now());
        self.stabilization_counter = self.stabilization_counter.saturating_add(1);

        let was_charging = self.battery_status.charging;
        let charger_event = if self.stabilization_counter > STABILIZATION_FRAMES {
            match (was_charging, content.charging) {
                (false, true) => Some(DeviceEvent::ChargerConnected),
                (true, false) => Some(DeviceEvent::ChargerDisconnected),
                _ => None,
            }
        } else {
            None
        };

        let became_valid = match self.window.push(content.soc, content.voltage) {
            PushOutcome::Discarded => {
                tracing::debug!("discarding first battery sample after reset");
                return;
            }
            PushOutcome::Stored { became_valid } => became_valid,
        };

        let averages = self.window.averages();
        self.battery_status = BatteryStatus {
            soc: content.soc,
            voltage_mv: content.voltage,
            charging: content.charging,
            was_charging,
            average_percentage: averages.percentage,
            average_voltage: averages.voltage_mv,
            average_is_valid: averages.is_valid,
        };
        outcome.averages_became_valid = became_valid;
        outcome.events.extend(charger_event);

        if !self.device_info.connection_status {
            tracing::info!("device connected (battery status)");
            self.reset_for_new_connection();
            self.device_info = DeviceInfo {
                connection_status: true,
                device_was_connected: false,
                ..self.device_info.clone()
            };
            outcome.events.push(DeviceEvent::DeviceConnected);
        }
    }

    fn on_device_info(&mut self, content: DeviceInfoContent, outcome: &mut DispatchOutcome) {
        let was_connected = self.device_info.connection_status;
        if !was_connected {
            self.reset_for_new_connection();
            outcome.events.push(DeviceEvent::DeviceConnected);
        }

        self.device_info = DeviceInfo {
            product_number: content.product_number,
            serial_number: content.serial_number,
            firmware_version: content.fw_main_version,
            product_type: content.product_type,
            connection_status: true,
            device_was_connected: was_connected,
        };

        if !was_connected {
            tracing::info!(
                "new device connected: {} (serial {}, fw {})",
                self.device_info.product_number,
                self.device_info.serial_number,
                self.device_info.firmware_version
            );
            outcome.new_device = Some(self.device_info.clone());
        }
    }

    fn reset_for_new_connection(&mut self) {
        self.stabilization_counter = 0;
        self.window.invalidate();
    }

    /// Liveness lost: the device stopped answering.
    ///
    /// Returns `true` if a connected device was marked disconnected by this call.
    pub fn mark_disconnected(&mut self) -> bool {
        let was_connected = self.device_info.connection_status;
        self.window.invalidate();
        if was_connected {
            self.device_info = DeviceInfo {
                connection_status: false,
                device_was_connected: true,
                ..self.device_info.clone()
            };
        }
        was_connected
    }
}
