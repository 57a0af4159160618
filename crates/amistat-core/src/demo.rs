//! Demo Mode - Simulated AMI device for testing
//!
//! Answers battery-status and device-info requests like a real device, with
//! a battery that slowly drains, gets put on the charger now and then, and
//! recharges. [`DemoTransport`] exposes it as a [`Transport`] so a whole
//! session runs without hardware.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::protocol::{
    Channel, Frame, FrameDecoder, ProtocolError, Transport, AC_POWER_VARIABLE,
    GET_BATTERY_STATUS_ID, GET_DEVICE_INFO_ID, SET_VARIABLE_ID,
};

/// Full-pack voltage of the simulated battery
const FULL_MV: f64 = 4200.0;
/// Empty-pack voltage of the simulated battery
const EMPTY_MV: f64 = 3300.0;

/// Simulated AMI device
pub struct DemoDevice {
    serial_number: String,
    /// State of charge, 0.0-100.0
    soc: f64,
    charging: bool,
    ac_power: bool,
    /// Status requests until the charger is plugged or unplugged
    flip_in: u32,
    rng: StdRng,
}

impl Default for DemoDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoDevice {
    /// Create a demo device with a random seed
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a demo device whose behavior is reproducible
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let soc = rng.gen_range(40.0..90.0);
        let flip_in = rng.gen_range(20..60);
        let serial_number = format!("DEMO{:06}", rng.gen_range(0..1_000_000));
        Self {
            serial_number,
            soc,
            charging: false,
            ac_power: true,
            flip_in,
            rng,
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    /// Liveness announcement
    pub fn heartbeat(&self) -> Frame {
        Frame::new(Channel::Heartbeat, Vec::new())
    }

    /// Respond to one host frame
    pub fn handle(&mut self, frame: &Frame) -> Vec<Frame> {
        if frame.channel != Channel::Command {
            return Vec::new();
        }
        let request: serde_json::Value = match serde_json::from_str(&frame.text()) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("demo device ignoring unparsable request: {}", e);
                return Vec::new();
            }
        };

        let response = match request["ID"].as_str() {
            Some(GET_BATTERY_STATUS_ID) => self.battery_status(),
            Some(GET_DEVICE_INFO_ID) => self.device_info(),
            Some(SET_VARIABLE_ID) => {
                if request["Content"]["Name"] == AC_POWER_VARIABLE {
                    self.ac_power = request["Content"]["Value"] == "1";
                    if !self.ac_power {
                        self.charging = false;
                    }
                }
                json!({ "ID": SET_VARIABLE_ID, "Content": { "Result": "OK" } })
            }
            _ => return Vec::new(),
        };
        vec![Frame::new(Channel::Command, response.to_string().into_bytes())]
    }

    fn battery_status(&mut self) -> serde_json::Value {
        self.step();
        let noise: f64 = self.rng.gen_range(-8.0..8.0);
        let voltage = EMPTY_MV + (FULL_MV - EMPTY_MV) * self.soc / 100.0 + noise;
        json!({
            "ID": GET_BATTERY_STATUS_ID,
            "Content": {
                "Charging": self.charging,
                "SOC": self.soc.round() as i64,
                "Voltage": voltage.round() as i64,
            }
        })
    }

    fn device_info(&self) -> serde_json::Value {
        json!({
            "ID": GET_DEVICE_INFO_ID,
            "Content": {
                "ProductNumber": "AMI-DEMO",
                "FwMainVersion": "1.0.0-demo",
                "SerialNumber": self.serial_number,
                "ProductType": 1,
            }
        })
    }

    /// Advance the battery simulation by one status request
    fn step(&mut self) {
        if self.charging {
            self.soc = (self.soc + 0.5).min(100.0);
        } else {
            self.soc = (self.soc - 0.2).max(0.0);
        }

        self.flip_in = self.flip_in.saturating_sub(1);
        if self.flip_in == 0 {
            self.charging = !self.charging && self.ac_power;
            self.flip_in = self.rng.gen_range(20..60);
        }
    }
}

struct DemoState {
    device: DemoDevice,
    decoder: FrameDecoder,
    outbound: VecDeque<u8>,
    heartbeat_interval: Option<Duration>,
    last_heartbeat: Instant,
}

/// A [`Transport`] backed by a [`DemoDevice`]
#[derive(Clone)]
pub struct DemoTransport {
    state: Arc<Mutex<DemoState>>,
}

impl DemoTransport {
    /// `heartbeat_interval` of `None` disables unsolicited heartbeats
    pub fn new(device: DemoDevice, heartbeat_interval: Option<Duration>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DemoState {
                device,
                decoder: FrameDecoder::new(),
                outbound: VecDeque::new(),
                heartbeat_interval,
                last_heartbeat: Instant::now(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DemoState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a heartbeat now
    pub fn send_heartbeat(&self) {
        let mut state = self.lock();
        let bytes = state.device.heartbeat().to_bytes();
        state.outbound.extend(bytes);
        state.last_heartbeat = Instant::now();
    }

    /// Queue an unsolicited event frame
    pub fn send_event(&self, text: &str) {
        let bytes = Frame::new(Channel::Event, text.as_bytes().to_vec()).to_bytes();
        self.lock().outbound.extend(bytes);
    }

    fn heartbeat_due(&self) -> bool {
        let state = self.lock();
        state
            .heartbeat_interval
            .is_some_and(|interval| state.last_heartbeat.elapsed() >= interval)
    }
}

impl Transport for DemoTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        let mut state = self.lock();
        let requests = state.decoder.feed(data);
        for request in requests {
            let responses = state.device.handle(&request);
            for response in responses {
                let bytes = response.to_bytes();
                state.outbound.extend(bytes);
            }
        }
        Ok(data.len())
    }

    fn read_available(&mut self, _timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.lock().outbound.drain(..).collect())
    }

    fn wait_for_data(&mut self, timeout: Duration) -> Result<bool, ProtocolError> {
        let start = Instant::now();
        loop {
            if self.heartbeat_due() {
                self.send_heartbeat();
            }
            if !self.lock().outbound.is_empty() {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, ProtocolError> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[test]
    fn test_device_answers_status_request() {
        let mut device = DemoDevice::with_seed(7);
        let responses = device.handle(&Command::GetBatteryStatus.to_frame());
        assert_eq!(responses.len(), 1);

        let value: serde_json::Value = serde_json::from_str(&responses[0].text()).unwrap();
        assert_eq!(value["ID"], "GetBatteryStatus");
        let soc = value["Content"]["SOC"].as_i64().unwrap();
        assert!((0..=100).contains(&soc));
        assert!(value["Content"]["Voltage"].as_i64().unwrap() > 3000);
    }

    #[test]
    fn test_device_ignores_other_channels() {
        let mut device = DemoDevice::with_seed(7);
        assert!(device.handle(&Frame::new(Channel::Debug, b"{}".to_vec())).is_empty());
        assert!(device.handle(&Frame::new(Channel::Command, b"garbage".to_vec())).is_empty());
    }

    #[test]
    fn test_charger_eventually_flips() {
        let mut device = DemoDevice::with_seed(11);
        let request = Command::GetBatteryStatus.to_frame();
        let flipped = (0..100).any(|_| {
            device.handle(&request);
            device.is_charging()
        });
        assert!(flipped);
    }

    #[test]
    fn test_ac_power_off_stops_charging() {
        let mut device = DemoDevice::with_seed(3);
        device.charging = true;
        device.handle(&Command::SetAcPower(false).to_frame());
        assert!(!device.is_charging());
    }

    #[test]
    fn test_transport_round_trip() {
        let mut transport = DemoTransport::new(DemoDevice::with_seed(1), None);
        transport
            .write_bytes(&Command::GetDeviceInfo.to_frame().to_bytes())
            .unwrap();
        assert!(transport.wait_for_data(Duration::from_millis(5)).unwrap());

        let bytes = transport.read_available(Duration::from_millis(1)).unwrap();
        let frames = FrameDecoder::new().feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].text().contains("AMI-DEMO"));
    }
}
