//! Consumer notifications
//!
//! A session reports what it decodes through a [`SessionListener`]. All
//! callbacks run on the session's worker thread, in the order frames were
//! decoded. Consumers that need the data elsewhere can hand the session an
//! `mpsc::Sender<SessionEvent>` instead of implementing the trait.

use serde_json::Value;
use std::sync::mpsc::Sender;

use crate::device::{DeviceEvent, DeviceInfo};
use crate::protocol::Channel;

/// A decoded frame, as delivered to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReceived {
    pub channel: Channel,
    /// Domain events this frame produced, in detection order
    pub events: Vec<DeviceEvent>,
    /// Unescaped payload bytes
    pub raw: Vec<u8>,
    /// Payload text with NUL padding removed
    pub text: String,
    /// `ID` of a command response
    pub command_id: Option<String>,
    /// Parsed JSON object of a command response
    pub json: Option<Value>,
}

impl FrameReceived {
    /// The event this frame stands for: the last one detected, since a
    /// connect supersedes a charger transition seen in the same frame.
    pub fn event(&self) -> Option<DeviceEvent> {
        self.events.last().copied()
    }

    /// Event name, empty when the frame produced none
    pub fn event_name(&self) -> &'static str {
        self.event().map(|e| e.as_str()).unwrap_or("")
    }
}

/// Receives notifications from a running session
#[allow(unused_variables)]
pub trait SessionListener: Send {
    /// Every successfully interpreted frame
    fn on_frame_received(&mut self, frame: &FrameReceived) {}

    /// A device answered a `GetDeviceInfo` after being disconnected
    fn on_new_device_connected(&mut self, info: &DeviceInfo) {}

    /// The averaging window filled for the first time
    fn on_averages_valid(&mut self) {}

    /// Raw traffic trace, only when debug logging is enabled
    fn on_log(&mut self, line: &str) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl SessionListener for NullListener {}

/// Notifications as messages, for consumers on another thread
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    FrameReceived(FrameReceived),
    NewDeviceConnected(DeviceInfo),
    AveragesValid,
    Log(String),
}

impl SessionListener for Sender<SessionEvent> {
    fn on_frame_received(&mut self, frame: &FrameReceived) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.send(SessionEvent::FrameReceived(frame.clone()));
    }

    fn on_new_device_connected(&mut self, info: &DeviceInfo) {
        let _ = self.send(SessionEvent::NewDeviceConnected(info.clone()));
    }

    fn on_averages_valid(&mut self) {
        let _ = self.send(SessionEvent::AveragesValid);
    }

    fn on_log(&mut self, line: &str) {
        let _ = self.send(SessionEvent::Log(line.to_string()));
    }
}
