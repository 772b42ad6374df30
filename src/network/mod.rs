//! Network subsystem: pairing, liveness and UDP audio transport

pub mod handshake;
pub mod receiver;
pub mod streamer;
pub mod udp;
pub mod watchdog;

pub use handshake::{Handshake, PairingOutcome, PairingResponder};
pub use receiver::{discover, DeviceLink, LinkExit};
pub use streamer::{AudioStreamer, StreamStats, StreamStatsSnapshot, StreamerExit};
pub use udp::bind_socket;
pub use watchdog::{Liveness, Watchdog, WatchdogExit};
