//! Receive state machine
//!
//! Turns the raw byte stream from the transport into complete frames, one
//! byte at a time. The machine never terminates; after each completed frame
//! it returns to [`DecoderState::WaitForStart`].

use super::{Channel, Frame, END, ESC, ESC_END, ESC_ESC};

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Discarding bytes until an END marker
    WaitForStart,
    /// Next byte is the channel tag
    GetChannel,
    /// Accumulating payload bytes
    GetData,
    /// Previous byte was ESC
    CheckEsc,
}

/// Incremental SLIP frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    channel: Channel,
    buffer: Vec<u8>,
    /// ESC followed by something other than ESC_END / ESC_ESC
    framing_errors: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder waiting for the first frame start
    pub fn new() -> Self {
        Self {
            state: DecoderState::WaitForStart,
            channel: Channel::Unknown,
            buffer: Vec::with_capacity(256),
            framing_errors: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Number of invalid escape sequences seen so far
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Drop any partial frame and wait for the next END
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = DecoderState::WaitForStart;
    }

    /// Process one byte, returning a frame when it completes one
    pub fn push(&mut self, b: u8) -> Option<Frame> {
        match self.state {
            DecoderState::WaitForStart => {
                if b == END {
                    self.buffer.clear();
                    self.state = DecoderState::GetChannel;
                }
            }
            DecoderState::GetChannel => {
                self.channel = Channel::from_tag(b);
                self.state = DecoderState::GetData;
            }
            DecoderState::GetData => match b {
                ESC => self.state = DecoderState::CheckEsc,
                END => {
                    let payload = std::mem::take(&mut self.buffer);
                    self.state = DecoderState::WaitForStart;
                    return Some(Frame::new(self.channel, payload));
                }
                _ => self.buffer.push(b),
            },
            DecoderState::CheckEsc => {
                match b {
                    ESC_END => self.buffer.push(END),
                    ESC_ESC => self.buffer.push(ESC),
                    other => {
                        self.framing_errors += 1;
                        tracing::debug!("invalid escape sequence ESC {:#04x}, dropped", other);
                    }
                }
                self.state = DecoderState::GetData;
            }
        }
        None
    }

    /// Process a batch of bytes, returning every frame completed in it
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }
}
