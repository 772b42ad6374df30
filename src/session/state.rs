//! Session state, stop reasons and the matched peer

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Lifecycle of a microphone session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    /// Listening on the pairing port
    Discovering,
    /// Peer known; watchdog and streamer running
    Matched,
    /// Torn down; `start()` may be called again
    Stopped,
}

impl SessionState {
    /// Idle and Stopped both accept `start()`
    pub fn is_idle(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Idle, Discovering)
                | (Discovering, Matched)
                | (Discovering, Stopped)
                | (Matched, Stopped)
                | (Stopped, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Discovering => "discovering",
            SessionState::Matched => "matched",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// `stop()` was called
    UserRequested,
    /// No keep-alive within the watchdog threshold
    PeerLost,
    /// Peer sent a disconnect token
    PeerClosed,
    /// The capture stream ended underneath the streamer
    CaptureFailed,
    /// Unrecoverable I/O error while pairing
    PairingFailed,
    /// The streaming port could not be bound after matching
    StreamingBindFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::UserRequested => "stopped by user",
            StopReason::PeerLost => "peer lost",
            StopReason::PeerClosed => "peer disconnected",
            StopReason::CaptureFailed => "capture failed",
            StopReason::PairingFailed => "pairing failed",
            StopReason::StreamingBindFailed => "streaming port unavailable",
        };
        f.write_str(text)
    }
}

/// The matched counterpart, fixed for the session's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    ip: IpAddr,
    streaming_port: u16,
}

impl PeerEndpoint {
    pub fn new(ip: IpAddr, streaming_port: u16) -> Self {
        Self { ip, streaming_port }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn streaming_port(&self) -> u16 {
        self.streaming_port
    }

    /// Destination for heartbeats, audio and the disconnect token
    pub fn streaming_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.streaming_port)
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.streaming_addr())
    }
}
