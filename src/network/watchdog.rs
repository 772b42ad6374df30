//! Liveness watchdog
//!
//! Sends a heartbeat every interval and listens briefly for the peer's
//! keep-alive. Independent of the audio path: a peer that stops acking is
//! declared lost even while audio datagrams still leave fine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::WatchdogConfig;
use crate::network::udp::recv_timeout;
use crate::protocol::ControlMessage;
use crate::session::{PeerEndpoint, RunSignal};

/// Liveness verdict after one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    /// Silent for longer than the threshold
    Dead { silent_for: Duration },
    /// Peer sent a disconnect token
    Closed,
}

/// Tracks the last acknowledgment against a silence threshold
#[derive(Debug, Clone)]
pub struct Liveness {
    last_ack: Instant,
    threshold: Duration,
}

impl Liveness {
    pub fn new(now: Instant, threshold: Duration) -> Self {
        Self {
            last_ack: now,
            threshold,
        }
    }

    /// Feed a datagram received from the peer
    pub fn on_datagram(&mut self, payload: &[u8], now: Instant) -> Verdict {
        match ControlMessage::parse(payload) {
            Some(ControlMessage::KeepAlive) => {
                self.last_ack = now;
                Verdict::Alive
            }
            Some(ControlMessage::Bye) => Verdict::Closed,
            _ => self.check(now),
        }
    }

    /// Evaluate silence when nothing useful arrived
    pub fn check(&self, now: Instant) -> Verdict {
        let silent_for = now.saturating_duration_since(self.last_ack);
        if silent_for > self.threshold {
            Verdict::Dead { silent_for }
        } else {
            Verdict::Alive
        }
    }

    pub fn last_ack(&self) -> Instant {
        self.last_ack
    }
}

/// Why the watchdog returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExit {
    Cancelled,
    PeerLost { silent_for: Duration },
    PeerClosed,
}

/// Heartbeat loop bound to the session's streaming socket
pub struct Watchdog {
    socket: Arc<UdpSocket>,
    peer: PeerEndpoint,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(socket: Arc<UdpSocket>, peer: PeerEndpoint, config: WatchdogConfig) -> Self {
        Self {
            socket,
            peer,
            config,
        }
    }

    pub async fn run(self, signal: RunSignal) -> WatchdogExit {
        let target = self.peer.streaming_addr();
        let heartbeat = ControlMessage::Heartbeat.as_bytes();
        let mut liveness = Liveness::new(Instant::now(), self.config.peer_timeout());
        let mut buf = [0u8; 64];

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Watchdog started for {}", target);

        loop {
            ticker.tick().await;
            if !signal.is_running() {
                debug!("Watchdog cancelled");
                return WatchdogExit::Cancelled;
            }

            if let Err(e) = self.socket.send_to(heartbeat, target).await {
                trace!("Heartbeat to {} failed: {}", target, e);
            }

            let verdict = match recv_timeout(&self.socket, &mut buf, self.config.ack_timeout()).await {
                Ok((len, src)) if is_from_peer(src, target) => {
                    liveness.on_datagram(&buf[..len], Instant::now())
                }
                Ok((_, src)) => {
                    trace!("Ignoring datagram from stranger {}", src);
                    liveness.check(Instant::now())
                }
                Err(e) => {
                    if !e.is_transient() {
                        warn!("Watchdog receive error: {}", e);
                    }
                    liveness.check(Instant::now())
                }
            };

            match verdict {
                Verdict::Alive => {}
                Verdict::Dead { silent_for } => {
                    warn!("Peer {} silent for {} ms, declaring it lost", target, silent_for.as_millis());
                    return WatchdogExit::PeerLost { silent_for };
                }
                Verdict::Closed => {
                    info!("Peer {} closed the session", target);
                    return WatchdogExit::PeerClosed;
                }
            }
        }
    }
}

fn is_from_peer(src: SocketAddr, target: SocketAddr) -> bool {
    src.ip() == target.ip()
}
