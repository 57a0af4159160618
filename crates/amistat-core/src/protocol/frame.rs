//! Frame encoding
//!
//! Implements the SLIP-style framing used on the AMI service port.
//!
//! Frame format:
//! - 1 byte: END (0xC0)
//! - 1 byte: channel tag
//! - N bytes: payload
//! - 1 byte: END (0xC0)
//!
//! Inside the tag and payload, END is sent as `ESC ESC_END` and ESC as
//! `ESC ESC_ESC`. Decoding happens incrementally in [`super::FrameDecoder`].

use super::{Channel, END, ESC, ESC_END, ESC_ESC};

/// A decoded (or to-be-encoded) protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical channel
    pub channel: Channel,
    /// Unescaped payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given payload
    pub fn new(channel: Channel, payload: Vec<u8>) -> Self {
        Self { channel, payload }
    }

    /// Encode the frame to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_frame(self.channel, &self.payload)
    }

    /// Payload as text with NUL padding removed
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).replace('\0', "")
    }
}

/// Encode a channel tag and payload into an escaped wire frame
pub fn encode_frame(channel: Channel, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + 4);

    bytes.push(END);
    push_escaped(&mut bytes, channel.tag());
    for &b in payload {
        push_escaped(&mut bytes, b);
    }
    bytes.push(END);

    bytes
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    match b {
        END => {
            out.push(ESC);
            out.push(ESC_END);
        }
        ESC => {
            out.push(ESC);
            out.push(ESC_ESC);
        }
        _ => out.push(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_plain_payload() {
        let encoded = encode_frame(Channel::Command, b"{}");
        assert_eq!(encoded, vec![END, b'A', b'{', b'}', END]);
    }

    #[test]
    fn test_encode_escapes_framing_bytes() {
        let encoded = encode_frame(Channel::Binary, &[0x01, END, 0x02, ESC, 0x03]);
        assert_eq!(
            encoded,
            vec![END, b'B', 0x01, ESC, ESC_END, 0x02, ESC, ESC_ESC, 0x03, END]
        );

        // END only appears at the two boundaries
        let inner = &encoded[1..encoded.len() - 1];
        assert!(!inner.contains(&END));
    }

    #[test]
    fn test_empty_heartbeat() {
        let frame = Frame::new(Channel::Heartbeat, Vec::new());
        assert_eq!(frame.to_bytes(), vec![END, b'H', END]);
    }

    #[test]
    fn test_text_strips_nul_padding() {
        let frame = Frame::new(Channel::Event, b"Error\0Status\0\0".to_vec());
        assert_eq!(frame.text(), "ErrorStatus");
    }
}
