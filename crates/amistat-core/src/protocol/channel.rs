//! Logical channels multiplexed over the serial link
//!
//! The byte following a frame's opening END selects the channel. The device
//! uses ASCII letters, so tags never collide with the framing bytes.

use serde::{Deserialize, Serialize};

/// Channel tag carried by every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// JSON command requests and responses ('A')
    Command,
    /// Unsolicited device events ('E')
    Event,
    /// Raw binary transfers ('B')
    Binary,
    /// Firmware debug output ('Z')
    Debug,
    /// Liveness announcements ('H')
    Heartbeat,
    /// File transfer ('F')
    File,
    /// Update notifications ('Q')
    UpdateNotify,
    /// Upgrade notifications ('P')
    UpgradeNotify,
    /// Upload channel ('U')
    Upload,
    /// Any tag the host does not recognize ('K' on the way out)
    Unknown,
}

impl Channel {
    /// Every known channel, in tag order of the device documentation
    pub const ALL: [Channel; 10] = [
        Channel::Unknown,
        Channel::Command,
        Channel::Event,
        Channel::Binary,
        Channel::Debug,
        Channel::Heartbeat,
        Channel::File,
        Channel::UpdateNotify,
        Channel::UpgradeNotify,
        Channel::Upload,
    ];

    /// Wire tag for this channel
    pub fn tag(&self) -> u8 {
        match self {
            Channel::Unknown => b'K',
            Channel::Command => b'A',
            Channel::Event => b'E',
            Channel::Binary => b'B',
            Channel::Debug => b'Z',
            Channel::Heartbeat => b'H',
            Channel::File => b'F',
            Channel::UpdateNotify => b'Q',
            Channel::UpgradeNotify => b'P',
            Channel::Upload => b'U',
        }
    }

    /// Map a received tag to a channel. Unrecognized tags become `Unknown`.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            b'A' => Channel::Command,
            b'E' => Channel::Event,
            b'B' => Channel::Binary,
            b'Z' => Channel::Debug,
            b'H' => Channel::Heartbeat,
            b'F' => Channel::File,
            b'Q' => Channel::UpdateNotify,
            b'P' => Channel::UpgradeNotify,
            b'U' => Channel::Upload,
            _ => Channel::Unknown,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Channel::Command => "COMMAND",
            Channel::Event => "EVENT",
            Channel::Binary => "BIN",
            Channel::Debug => "DEBUG",
            Channel::Heartbeat => "HEARTBEAT",
            Channel::File => "FILE",
            Channel::UpdateNotify => "UPDATE",
            Channel::UpgradeNotify => "UPGRADE",
            Channel::Upload => "UPLOAD",
            Channel::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_roundtrip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_tag(channel.tag()), channel);
        }
    }

    #[test]
    fn test_unrecognized_tag_is_unknown() {
        assert_eq!(Channel::from_tag(b'x'), Channel::Unknown);
        assert_eq!(Channel::from_tag(0x00), Channel::Unknown);
    }
}
