//! Serial Protocol Communication
//!
//! Implements the AMI service-port protocol: SLIP-style framing with
//! multiplexed channels, JSON commands on the command channel, and
//! unsolicited heartbeat and event frames.

pub mod channel;
pub mod commands;
mod decoder;
mod error;
mod frame;
pub mod serial;
mod session;
mod transport;

pub use channel::Channel;
pub use commands::{
    Command, AC_POWER_VARIABLE, ERROR_STATUS_CHANGE, GET_BATTERY_STATUS_ID, GET_DEVICE_INFO_ID,
    SET_VARIABLE_ID, SWITCH_TO_SERVICE_PORT_ID,
};
pub use decoder::{DecoderState, FrameDecoder};
pub use error::ProtocolError;
pub use frame::{encode_frame, Frame};
pub use serial::{list_ports, PortInfo};
pub use session::{LinkCounters, Session, SessionConfig, SessionState};
pub use transport::{MemoryLink, MemoryTransport, SerialTransport, TcpTransport, Transport};

/// Frame start/end marker
pub const END: u8 = 0xC0;
/// Escape marker
pub const ESC: u8 = 0xDB;
/// `ESC ESC_END` stands for a literal END
pub const ESC_END: u8 = 0xDC;
/// `ESC ESC_ESC` stands for a literal ESC
pub const ESC_ESC: u8 = 0xDD;

/// Baud rate of the AMI service port
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Timeout of each read while draining the port, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10;

/// Longest the receive loop waits before re-checking for shutdown, in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5;
