//! Session management
//!
//! Handles the session lifecycle with an AMI device: opening the link,
//! running the background receive loop, and shutting it down cleanly.
//!
//! One worker thread per open session does all decoding, dispatching, state
//! updates and dispatch-triggered writes. Notifications are delivered from
//! that thread in decode order.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use super::{
    serial::{clear_buffers, configure_port, list_ports, open_port, resolve_port},
    Command, Frame, FrameDecoder, ProtocolError, SerialTransport, Transport, DEFAULT_BAUD_RATE,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS,
};
use crate::datalog::BatteryLogRecord;
use crate::device::{BatteryStatus, DeviceEvent, DeviceInfo};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::listener::{FrameReceived, SessionListener};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No link open
    Closed,
    /// Link open, worker listening
    Open,
    /// Shutdown in progress
    Closing,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Port name or FTDI serial number used by [`Session::open`] when no
    /// identifier is given
    pub port_name: String,
    /// Baud rate; the device firmware expects 921600
    pub baud_rate: u32,
    /// Timeout of each read while draining available bytes
    pub read_timeout_ms: u64,
    /// Upper bound on how long the worker waits for data before re-checking
    /// the shutdown flag
    pub poll_interval_ms: u64,
    /// Forward raw traffic traces to [`SessionListener::on_log`]
    pub debug_log: bool,
    /// RTS/CTS hardware flow control
    pub flow_control_rts_cts: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            debug_log: false,
            flow_control_rts_cts: true,
        }
    }
}

impl SessionConfig {
    /// Parse a stored configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Traffic counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounters {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_frames: u64,
    pub rx_frames: u64,
    /// Frames whose payload could not be interpreted
    pub malformed_frames: u64,
    /// Invalid escape sequences
    pub framing_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    tx_frames: AtomicU64,
    rx_frames: AtomicU64,
    malformed_frames: AtomicU64,
    framing_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LinkCounters {
        LinkCounters {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the session handle and its worker
#[derive(Debug, Default)]
struct Shared {
    dispatcher: Mutex<Dispatcher>,
    /// Set once shutdown begins; gates every notification
    closing: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn dispatcher(&self) -> MutexGuard<'_, Dispatcher> {
        // The dispatcher holds plain data; a panic mid-update leaves it usable
        self.dispatcher.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// Write one command frame, updating counters
fn write_command(
    transport: &mut dyn Transport,
    counters: &Counters,
    command: Command,
) -> Result<Vec<u8>, ProtocolError> {
    let bytes = command.to_frame().to_bytes();
    let written = transport.write_bytes(&bytes)?;
    counters.tx_bytes.fetch_add(written as u64, Ordering::Relaxed);
    counters.tx_frames.fetch_add(1, Ordering::Relaxed);
    tracing::debug!("sent {} ({} bytes)", command.id(), written);
    Ok(bytes)
}

/// AMI device session
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    /// Regenerated on every open
    session_id: Uuid,
    shared: Arc<Shared>,
    /// Handle for consumer-issued commands
    writer: Option<Box<dyn Transport>>,
    /// Worker thread; hands the transport back when it exits
    worker: Option<JoinHandle<Box<dyn Transport>>>,
}

impl Session {
    /// Create a new session (not yet open)
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Closed,
            session_id: Uuid::new_v4(),
            shared: Arc::new(Shared::default()),
            writer: None,
            worker: None,
        }
    }

    /// Identifiers of the serial ports a device could be attached to
    pub fn list_identifiers() -> Vec<String> {
        list_ports().into_iter().map(|p| p.name).collect()
    }

    /// Get current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Open the serial port named by `identifier` (a port name or the FTDI
    /// serial number) and start listening.
    pub fn open(
        &mut self,
        identifier: &str,
        listener: Box<dyn SessionListener>,
    ) -> Result<(), ProtocolError> {
        if self.state != SessionState::Closed {
            return Err(ProtocolError::AlreadyOpen);
        }

        let identifier = if identifier.is_empty() {
            self.config.port_name.clone()
        } else {
            identifier.to_string()
        };
        let name = resolve_port(&identifier, &list_ports()).unwrap_or(identifier);

        let mut port = open_port(&name, self.config.baud_rate, self.config.read_timeout())?;
        // Drop whatever the device sent before we were listening
        clear_buffers(port.as_mut())?;
        configure_port(port.as_mut(), self.config.flow_control_rts_cts)?;
        tracing::info!("opened {} at {} baud", name, self.config.baud_rate);

        self.open_with_transport(Box::new(SerialTransport::new(port)), listener)
    }

    /// Start a session on an already-open transport
    pub fn open_with_transport(
        &mut self,
        transport: Box<dyn Transport>,
        listener: Box<dyn SessionListener>,
    ) -> Result<(), ProtocolError> {
        if self.state != SessionState::Closed {
            return Err(ProtocolError::AlreadyOpen);
        }

        let writer = transport.try_clone()?;
        let worker_writer = transport.try_clone()?;
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            transport,
            writer: worker_writer,
            decoder: FrameDecoder::new(),
            listener,
            shared: shared.clone(),
            config: self.config.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("ami-receive".to_string())
            .spawn(move || worker.run())?;

        self.session_id = Uuid::new_v4();
        self.shared = shared;
        self.writer = Some(writer);
        self.worker = Some(handle);
        self.state = SessionState::Open;
        Ok(())
    }

    /// Stop listening and release the link. Device info, battery status and
    /// counters are discarded. Calling it again is a no-op.
    pub fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.state = SessionState::Closing;
        self.shared.closing.store(true, Ordering::SeqCst);

        match worker.join() {
            Ok(mut transport) => {
                if let Err(e) = transport.close() {
                    tracing::warn!("error closing transport: {}", e);
                }
            }
            Err(_) => tracing::error!("receive worker panicked"),
        }

        self.writer = None;
        // Device and battery snapshots do not outlive the session
        self.shared = Arc::new(Shared::default());
        self.state = SessionState::Closed;
        tracing::info!("session closed");
    }

    /// Send a command to the device
    pub fn send_command(&mut self, command: Command) -> Result<(), ProtocolError> {
        let writer = self.writer.as_mut().ok_or(ProtocolError::NotOpen)?;
        write_command(writer.as_mut(), &self.shared.counters, command)?;
        Ok(())
    }

    pub fn get_battery_status(&mut self) -> Result<(), ProtocolError> {
        self.send_command(Command::GetBatteryStatus)
    }

    pub fn get_device_info(&mut self) -> Result<(), ProtocolError> {
        self.send_command(Command::GetDeviceInfo)
    }

    pub fn switch_to_service_port(&mut self) -> Result<(), ProtocolError> {
        self.send_command(Command::SwitchToServicePort)
    }

    /// Switch the device's AC power relay
    pub fn set_ac_power(&mut self, on: bool) -> Result<(), ProtocolError> {
        self.send_command(Command::SetAcPower(on))
    }

    /// The consumer's liveness deadline expired.
    ///
    /// Returns `true` if this call took a connected device to disconnected.
    pub fn mark_disconnected(&self) -> bool {
        let was_connected = self.shared.dispatcher().mark_disconnected();
        if was_connected {
            tracing::info!("device marked disconnected");
        }
        was_connected
    }

    /// Snapshot of the device identity
    pub fn device_info(&self) -> DeviceInfo {
        self.shared.dispatcher().device_info().clone()
    }

    /// Snapshot of the battery state
    pub fn battery_status(&self) -> BatteryStatus {
        self.shared.dispatcher().battery_status().clone()
    }

    /// Samples in the averaging window, for progress displays
    pub fn sample_count(&self) -> usize {
        self.shared.dispatcher().window().sample_count()
    }

    pub fn averages_valid(&self) -> bool {
        self.shared.dispatcher().window().is_valid()
    }

    /// Time since the last battery status frame
    pub fn last_status_age(&self) -> Option<Duration> {
        self.shared
            .dispatcher()
            .last_status_at()
            .map(|t| t.elapsed())
    }

    /// Log record for `event`, taken from the current snapshots
    pub fn log_record(&self, event: DeviceEvent) -> BatteryLogRecord {
        let dispatcher = self.shared.dispatcher();
        BatteryLogRecord::new(
            event,
            dispatcher.device_info(),
            dispatcher.battery_status(),
            self.session_id,
        )
    }

    pub fn counters(&self) -> LinkCounters {
        self.shared.counters.snapshot()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// The background receive loop and everything it owns
struct Worker {
    transport: Box<dyn Transport>,
    writer: Box<dyn Transport>,
    decoder: FrameDecoder,
    listener: Box<dyn SessionListener>,
    shared: Arc<Shared>,
    config: SessionConfig,
}

impl Worker {
    fn run(mut self) -> Box<dyn Transport> {
        tracing::debug!("receive worker started");
        let poll = self.config.poll_interval();
        let read_timeout = self.config.read_timeout();

        loop {
            if self.shared.is_closing() {
                break;
            }

            match self.transport.wait_for_data(poll) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::debug!("wait for data failed: {}", e);
                    std::thread::sleep(poll);
                    continue;
                }
            }
            if self.shared.is_closing() {
                break;
            }

            let bytes = match self.transport.read_available(read_timeout) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!("read failed, retrying next cycle: {}", e);
                    continue;
                }
            };
            if bytes.is_empty() {
                continue;
            }

            self.shared
                .counters
                .rx_bytes
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            self.log(|| format!("Received : {}", String::from_utf8_lossy(&bytes)));

            for &b in &bytes {
                if self.shared.is_closing() {
                    break;
                }
                if let Some(frame) = self.decoder.push(b) {
                    self.handle_frame(frame);
                }
            }
            self.shared
                .counters
                .framing_errors
                .store(self.decoder.framing_errors(), Ordering::Relaxed);
        }

        tracing::debug!("receive worker stopped");
        self.transport
    }

    fn handle_frame(&mut self, frame: Frame) {
        self.shared.counters.rx_frames.fetch_add(1, Ordering::Relaxed);

        let result = self.shared.dispatcher().dispatch(&frame);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.shared
                    .counters
                    .malformed_frames
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("dropping {} frame: {}", frame.channel, e);
                self.decoder.reset();
                return;
            }
        };

        for &command in &outcome.commands {
            match write_command(self.writer.as_mut(), &self.shared.counters, command) {
                Ok(bytes) => self.log(|| format!("Send:{}", String::from_utf8_lossy(&bytes))),
                Err(e) => tracing::warn!("failed to send {}: {}", command.id(), e),
            }
        }

        self.notify(frame, outcome);
    }

    fn notify(&mut self, frame: Frame, outcome: DispatchOutcome) {
        if self.shared.is_closing() {
            return;
        }
        if outcome.averages_became_valid {
            self.listener.on_averages_valid();
        }
        if let Some(info) = &outcome.new_device {
            self.listener.on_new_device_connected(info);
        }
        let received = FrameReceived {
            channel: frame.channel,
            events: outcome.events,
            raw: frame.payload,
            text: outcome.text,
            command_id: outcome.command_id,
            json: outcome.json,
        };
        self.listener.on_frame_received(&received);
    }

    fn log(&mut self, line: impl FnOnce() -> String) {
        if self.config.debug_log && !self.shared.is_closing() {
            self.listener.on_log(&line());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NullListener;
    use crate::protocol::MemoryLink;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 921_600);
        assert!(config.flow_control_rts_cts);
        assert!(!config.debug_log);
    }

    #[test]
    fn test_session_config_from_partial_json() {
        let config = SessionConfig::from_json(r#"{"port_name": "FT5XK2QA", "debug_log": true}"#)
            .unwrap();
        assert_eq!(config.port_name, "FT5XK2QA");
        assert!(config.debug_log);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);

        assert!(SessionConfig::from_json("{").is_err());
    }

    #[test]
    fn test_new_session_is_closed() {
        let mut session = Session::new(SessionConfig::default());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.get_battery_status(),
            Err(ProtocolError::NotOpen)
        ));
        // Closing a closed session is harmless
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_double_open_is_rejected() {
        let link = MemoryLink::new();
        let mut session = Session::new(SessionConfig::default());
        session
            .open_with_transport(Box::new(link.transport()), Box::new(NullListener))
            .unwrap();
        assert!(matches!(
            session.open_with_transport(Box::new(link.transport()), Box::new(NullListener)),
            Err(ProtocolError::AlreadyOpen)
        ));
        assert!(matches!(
            session.open("/dev/does-not-matter", Box::new(NullListener)),
            Err(ProtocolError::AlreadyOpen)
        ));

        session.close();
        session.close();
        assert!(link.is_closed());
        assert_eq!(session.state(), SessionState::Closed);
    }
}
