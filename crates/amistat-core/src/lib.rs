//! # amistat Core Library
//!
//! Communication core for AMI battery monitors.
//!
//! This library provides:
//! - SLIP-style framing with multiplexed channels
//! - A background receive loop that keeps device and battery state current
//! - Automatic replies to heartbeats and error-status events
//! - A sliding-window average of battery percentage and voltage
//! - Battery log records and the logging policy around them
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::mpsc;
//! use amistat_core::prelude::*;
//!
//! let (tx, rx) = mpsc::channel();
//! let mut session = Session::new(SessionConfig::default());
//! session.open("/dev/ttyUSB0", Box::new(tx))?;
//!
//! for event in rx {
//!     if let SessionEvent::FrameReceived(frame) = event {
//!         println!("{}: {}", frame.channel, frame.text);
//!     }
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod datalog;
pub mod demo;
pub mod device;
pub mod dispatch;
pub mod listener;
pub mod protocol;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::datalog::{BatteryLogRecord, EventRecorder};
    pub use crate::demo::{DemoDevice, DemoTransport};
    pub use crate::device::{BatteryStatus, DeviceEvent, DeviceInfo};
    pub use crate::listener::{FrameReceived, NullListener, SessionEvent, SessionListener};
    pub use crate::protocol::{
        Channel, Command, Frame, FrameDecoder, ProtocolError, Session, SessionConfig,
        SessionState, Transport,
    };
    pub use crate::telemetry::{Averages, TelemetryWindow};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
