//! Event recorder
//!
//! Applies the logging policy to candidate records: a record taken before the
//! averaging window is valid is held back and re-issued as `DeviceConnected`
//! once the averages settle, and the restricted mode keeps only one
//! off-charger record per connection.

use std::collections::VecDeque;

use super::BatteryLogRecord;
use crate::device::{BatteryStatus, DeviceEvent, DeviceInfo};

/// Maximum records to keep in memory before the oldest are dropped
const MAX_BUFFER_SIZE: usize = 10000;

/// Buffers accepted log records for the log collaborator
#[derive(Debug)]
pub struct EventRecorder {
    /// Accepted records, oldest first
    buffer: VecDeque<BatteryLogRecord>,
    /// Only keep the records the restricted filter lets through
    restricted: bool,
    /// Records accepted since the last `DeviceConnected`
    logged_during_connection: usize,
    /// A record arrived while the averages were not yet valid
    pending: bool,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new(false)
    }
}

impl EventRecorder {
    pub fn new(restricted: bool) -> Self {
        Self {
            buffer: VecDeque::new(),
            restricted,
            logged_during_connection: 0,
            pending: false,
        }
    }

    pub fn set_restricted(&mut self, restricted: bool) {
        self.restricted = restricted;
    }

    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// A record is waiting for the averages to become valid
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Offer a record. Returns `true` if it was accepted right away.
    pub fn offer(&mut self, record: BatteryLogRecord, averages_valid: bool) -> bool {
        if self.pending {
            return false;
        }
        if record.event == DeviceEvent::DeviceConnected {
            self.logged_during_connection = 0;
        }

        let wanted = !self.restricted
            || record.is_restricted_loggable(self.logged_during_connection);
        if !wanted {
            return false;
        }
        if !averages_valid {
            self.pending = true;
            return false;
        }

        self.accept(record);
        true
    }

    /// Re-issue a held-back record once the averages are valid.
    ///
    /// Returns `true` if a record was accepted.
    pub fn flush_pending(
        &mut self,
        averages_valid: bool,
        info: &DeviceInfo,
        status: &BatteryStatus,
        session_id: uuid::Uuid,
    ) -> bool {
        if !self.pending || !averages_valid {
            return false;
        }
        self.pending = false;
        let record = BatteryLogRecord::new(DeviceEvent::DeviceConnected, info, status, session_id);
        self.offer(record, averages_valid)
    }

    fn accept(&mut self, mut record: BatteryLogRecord) {
        if self.restricted {
            record.event = DeviceEvent::DeviceConnected;
        }
        self.logged_during_connection += 1;

        if self.buffer.len() >= MAX_BUFFER_SIZE {
            self.buffer.pop_front();
        }
        self.buffer.push_back(record);
    }

    /// Get the number of buffered records
    pub fn record_count(&self) -> usize {
        self.buffer.len()
    }

    /// Get all buffered records
    pub fn records(&self) -> impl Iterator<Item = &BatteryLogRecord> {
        self.buffer.iter()
    }

    /// Hand every buffered record to the caller
    pub fn drain(&mut self) -> Vec<BatteryLogRecord> {
        self.buffer.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(event: DeviceEvent, charging: bool) -> BatteryLogRecord {
        let status = BatteryStatus {
            charging,
            ..Default::default()
        };
        BatteryLogRecord::new(event, &DeviceInfo::default(), &status, Uuid::nil())
    }

    #[test]
    fn test_unrestricted_accepts_everything_when_valid() {
        let mut recorder = EventRecorder::new(false);
        assert!(recorder.offer(record(DeviceEvent::ChargerConnected, true), true));
        assert!(recorder.offer(record(DeviceEvent::DeviceDisconnected, true), true));
        assert_eq!(recorder.record_count(), 2);
    }

    #[test]
    fn test_record_held_until_averages_valid() {
        let mut recorder = EventRecorder::new(false);
        assert!(!recorder.offer(record(DeviceEvent::DeviceConnected, false), false));
        assert!(recorder.is_pending());

        // While pending, further offers are ignored
        assert!(!recorder.offer(record(DeviceEvent::ChargerConnected, true), true));

        let info = DeviceInfo::default();
        let status = BatteryStatus::default();
        assert!(!recorder.flush_pending(false, &info, &status, Uuid::nil()));
        assert!(recorder.flush_pending(true, &info, &status, Uuid::nil()));
        assert!(!recorder.is_pending());

        let records = recorder.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, DeviceEvent::DeviceConnected);
        assert_eq!(recorder.record_count(), 0);
    }

    #[test]
    fn test_restricted_keeps_one_record_per_connection() {
        let mut recorder = EventRecorder::new(true);
        assert!(recorder.offer(record(DeviceEvent::ChargerDisconnected, false), true));
        assert!(!recorder.offer(record(DeviceEvent::ChargerDisconnected, false), true));
        assert!(!recorder.offer(record(DeviceEvent::ChargerConnected, true), true));

        // A new connection resets the allowance
        assert!(recorder.offer(record(DeviceEvent::DeviceConnected, false), true));
        // Operator requests always pass
        assert!(recorder.offer(record(DeviceEvent::UserRequest, true), true));

        // Restricted mode files every record as DeviceConnected
        assert!(recorder
            .records()
            .all(|r| r.event == DeviceEvent::DeviceConnected));
        assert_eq!(recorder.record_count(), 3);
    }
}
