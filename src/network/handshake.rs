//! Pairing handshake (device side)
//!
//! The device never probes. It answers `DISCOVER` with `HI` and treats the
//! first `OK` as confirmation, taking the sender as its peer. One socket
//! serves both roles.
//!
//! The latency sample is the time from the start of the receive that
//! returned `OK` until `OK` arrived, not a true probe round trip.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::udp::{bind_socket, recv_timeout};
use crate::protocol::ControlMessage;
use crate::session::{PeerEndpoint, RunSignal};

/// Result of a completed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingOutcome {
    pub peer: PeerEndpoint,
    pub latency: Duration,
}

/// What to do with one received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingAction {
    /// Send `HI` to this address
    Reply(SocketAddr),
    /// Handshake complete
    Matched(PairingOutcome),
    Ignore,
}

/// Protocol decisions of the handshake, free of I/O
#[derive(Debug, Clone, Copy)]
pub struct PairingResponder {
    peer_pairing_port: u16,
    peer_streaming_port: u16,
}

impl PairingResponder {
    pub fn new(peer_pairing_port: u16, peer_streaming_port: u16) -> Self {
        Self {
            peer_pairing_port,
            peer_streaming_port,
        }
    }

    /// Decide on a datagram from `src`; `elapsed` is the time spent in the
    /// receive that produced it.
    pub fn on_datagram(&self, payload: &[u8], src: SocketAddr, elapsed: Duration) -> PairingAction {
        match ControlMessage::parse(payload) {
            Some(ControlMessage::Discover) => {
                PairingAction::Reply(SocketAddr::new(src.ip(), self.peer_pairing_port))
            }
            Some(ControlMessage::Ok) => PairingAction::Matched(PairingOutcome {
                peer: PeerEndpoint::new(src.ip(), self.peer_streaming_port),
                latency: elapsed,
            }),
            _ => PairingAction::Ignore,
        }
    }
}

/// Bound pairing socket plus responder
pub struct Handshake {
    socket: UdpSocket,
    responder: PairingResponder,
    recv_timeout: Duration,
}

impl Handshake {
    /// Bind the pairing port
    pub fn bind(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let socket = bind_socket(config.pairing_bind_addr(), true)?;
        debug!("Pairing socket bound on {:?}", socket.local_addr());

        Ok(Self {
            socket,
            responder: PairingResponder::new(config.peer_pairing_port, config.peer_streaming_port),
            recv_timeout: config.pairing_recv_timeout(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Answer probes until a peer confirms or `signal` is cancelled.
    ///
    /// Returns `Ok(None)` on cancellation. The socket is closed when this
    /// returns.
    pub async fn run(self, signal: &RunSignal) -> Result<Option<PairingOutcome>, NetworkError> {
        let mut buf = [0u8; 256];
        info!("Waiting for discovery on {:?}", self.local_addr());

        while signal.is_running() {
            let started = Instant::now();

            let (len, src) = match recv_timeout(&self.socket, &mut buf, self.recv_timeout).await {
                Ok(received) => received,
                Err(e) if e.is_transient() => {
                    trace!("Pairing receive: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.responder.on_datagram(&buf[..len], src, started.elapsed()) {
                PairingAction::Reply(target) => {
                    debug!("DISCOVER from {}, replying HI to {}", src, target);
                    if let Err(e) = self.socket.send_to(ControlMessage::Hi.as_bytes(), target).await {
                        warn!("Failed to answer discovery from {}: {}", src, e);
                    }
                }
                PairingAction::Matched(outcome) => {
                    info!(
                        "Paired with {} ({} ms)",
                        outcome.peer.ip(),
                        outcome.latency.as_millis()
                    );
                    return Ok(Some(outcome));
                }
                PairingAction::Ignore => {
                    trace!("Ignoring {} byte datagram from {}", len, src);
                }
            }
        }

        debug!("Pairing cancelled");
        Ok(None)
    }
}
