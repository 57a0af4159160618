//! Serial port handling
//!
//! Enumerates, opens and configures the FTDI service port of an AMI device.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::ProtocolError;

/// FTDI's USB vendor ID
pub const FTDI_VID: u16 = 0x0403;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Whether the port sits behind an FTDI bridge, as AMI service cables do
    pub fn is_ftdi(&self) -> bool {
        self.vid == Some(FTDI_VID)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// Sort key: ttyACM* first, then ttyUSB* (both numerically), then the rest by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

fn sort_ports(ports: &mut [PortInfo]) {
    ports.sort_by_key(|p| port_sort_key(&p.name));
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::warn!("port enumeration failed: {}", e),
    }

    // Linux: udev may not report ports that exist under /dev
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        manufacturer: None,
                        product: None,
                        serial_number: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    sort_ports(&mut v);
    v
}

/// Resolve an identifier to a port name.
///
/// The identifier may be a port name or the USB serial number of the FTDI
/// bridge, which is how the device list presents AMI cables.
pub fn resolve_port(identifier: &str, ports: &[PortInfo]) -> Option<String> {
    ports
        .iter()
        .find(|p| p.name == identifier)
        .or_else(|| {
            ports
                .iter()
                .find(|p| p.serial_number.as_deref() == Some(identifier))
        })
        .map(|p| p.name.clone())
}

/// Open a serial port
pub fn open_port(
    name: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    tracing::debug!("opening {} at {} baud", name, baud_rate);
    serialport::new(name, baud_rate)
        .timeout(read_timeout)
        .open()
        .map_err(ProtocolError::from)
}

/// Configure a serial port for the AMI service link: 8N1, optional RTS/CTS
/// flow control, RTS asserted.
pub fn configure_port(port: &mut dyn SerialPort, rts_cts: bool) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    let flow = if rts_cts {
        serialport::FlowControl::Hardware
    } else {
        serialport::FlowControl::None
    };
    port.set_flow_control(flow)?;

    // The device holds its UART transmitter off until RTS is asserted
    if let Err(e) = port.write_request_to_send(true) {
        tracing::warn!("configure_port: failed to set RTS high: {} (continuing)", e);
    } else {
        tracing::debug!("configure_port: RTS set high");
    }

    Ok(())
}

/// Discard anything buffered in either direction
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, serial: Option<&str>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid: serial.map(|_| FTDI_VID),
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: serial.map(str::to_string),
        }
    }

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.serial_number);
        }
    }

    #[test]
    fn test_port_sorting() {
        let mut ports: Vec<PortInfo> = [
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/ttyUSB0",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ]
        .into_iter()
        .map(|n| port(n, None))
        .collect();

        sort_ports(&mut ports);
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_resolve_by_name_or_serial() {
        let ports = vec![port("/dev/ttyUSB0", Some("FT5XK2QA")), port("COM7", None)];

        assert_eq!(resolve_port("COM7", &ports).as_deref(), Some("COM7"));
        assert_eq!(
            resolve_port("FT5XK2QA", &ports).as_deref(),
            Some("/dev/ttyUSB0")
        );
        assert_eq!(resolve_port("missing", &ports), None);
        assert!(ports[0].is_ftdi());
        assert!(!ports[1].is_ftdi());
    }
}
