//! Battery event logging
//!
//! Builds the records handed to the log collaborator and decides which
//! events are worth persisting. Writing them to disk is the collaborator's
//! business.

mod recorder;

pub use recorder::EventRecorder;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{BatteryStatus, DeviceEvent, DeviceInfo};

/// One battery log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryLogRecord {
    pub event: DeviceEvent,
    pub timestamp: DateTime<Local>,
    /// Session the record was taken in
    pub session_id: Uuid,
    pub serial_number: String,
    pub firmware_version: String,
    /// Averaged voltage, rounded to whole millivolts
    pub voltage_mv: i32,
    /// Instantaneous SOC
    pub percentage: i32,
    pub charger_status: String,
    pub is_charging: bool,
}

impl BatteryLogRecord {
    /// Build a record from the current snapshots
    pub fn new(
        event: DeviceEvent,
        info: &DeviceInfo,
        status: &BatteryStatus,
        session_id: Uuid,
    ) -> Self {
        Self {
            event,
            timestamp: Local::now(),
            session_id,
            serial_number: info.serial_number.clone(),
            firmware_version: info.firmware_version.clone(),
            voltage_mv: status.average_voltage.round() as i32,
            percentage: status.soc,
            charger_status: status.charger_text().to_string(),
            is_charging: status.charging,
        }
    }

    /// Whether this record passes the restricted-event filter.
    ///
    /// Operator requests always pass. Otherwise only a `DeviceConnected` or
    /// `ChargerDisconnected` taken off the charger, and only if nothing was
    /// logged yet during this connection.
    pub fn is_restricted_loggable(&self, logged_during_connection: usize) -> bool {
        match self.event {
            DeviceEvent::UserRequest => true,
            DeviceEvent::DeviceConnected | DeviceEvent::ChargerDisconnected => {
                !self.is_charging && logged_during_connection < 1
            }
            _ => false,
        }
    }
}
