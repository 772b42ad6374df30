//! Wire protocol shared by the device and the desktop peer
//!
//! Control traffic is a handful of short ASCII tokens. Anything on the
//! streaming port that is not a token is an audio payload: little-endian
//! signed 16-bit PCM, one capture batch per datagram.

/// Control message exchanged over either UDP port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Peer probes for a responder (pairing port, peer → device)
    Discover,
    /// Probe acknowledged (pairing port, device → peer)
    Hi,
    /// Handshake confirmed (pairing port, peer → device)
    Ok,
    /// Liveness ping (streaming port, device → peer)
    Heartbeat,
    /// Liveness ack (streaming port, peer → device)
    KeepAlive,
    /// Graceful close (streaming port, either direction)
    Bye,
}

impl ControlMessage {
    pub const ALL: [ControlMessage; 6] = [
        ControlMessage::Discover,
        ControlMessage::Hi,
        ControlMessage::Ok,
        ControlMessage::Heartbeat,
        ControlMessage::KeepAlive,
        ControlMessage::Bye,
    ];

    /// Token as it appears on the wire
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            ControlMessage::Discover => b"MANGEO_DISCOVER",
            ControlMessage::Hi => b"MANGEO_HI",
            ControlMessage::Ok => b"MANGEO_OK",
            ControlMessage::Heartbeat => b"MANGOVAR",
            ControlMessage::KeepAlive => b"MANGOHI",
            ControlMessage::Bye => b"MANGEO_BYE",
        }
    }

    /// Match a datagram payload against the known tokens.
    ///
    /// Surrounding ASCII whitespace is ignored, so a peer that appends a
    /// newline still pairs.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let trimmed = payload.trim_ascii();
        Self::ALL
            .into_iter()
            .find(|msg| msg.as_bytes() == trimmed)
    }
}
