//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to an AMI device
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Session already open")]
    AlreadyOpen,

    #[error("No session open")]
    NotOpen,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Missing or mistyped field '{0}' in frame content")]
    MissingField(&'static str),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ProtocolError {
    /// True for errors produced by bad input on the wire.
    ///
    /// These never leave the receive loop.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedFrame(_)
                | ProtocolError::MissingField(_)
                | ProtocolError::JsonError(_)
        )
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(e.description),
            _ => ProtocolError::SerialError(e.to_string()),
        }
    }
}
