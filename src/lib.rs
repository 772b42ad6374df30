//! # LAN Wireless Mic
//!
//! Turns a capture device into a wireless microphone for a desktop peer on the
//! same subnet.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               MIC DEVICE                                  │
//! │                                                                           │
//! │  ┌────────────────────────────────────────────────────────────────────┐  │
//! │  │              Session Controller (session::controller)               │  │
//! │  │        Idle ──► Discovering ──► Matched ──► Stopped ──► Idle        │  │
//! │  └───────┬──────────────────────────┬──────────────────────┬─────────┘  │
//! │          │ 1. pair                  │ 2. watch             │ 2. stream   │
//! │          ▼                          ▼                      ▼             │
//! │  ┌──────────────┐          ┌─────────────────┐    ┌─────────────────┐    │
//! │  │  Handshake   │          │    Watchdog     │    │  Audio Streamer │    │
//! │  │ (pairing     │          │ heartbeat / ack │    │ gain ► s16le ►  │    │
//! │  │  port)       │          │                 │    │ datagram        │    │
//! │  └──────┬───────┘          └────────┬────────┘    └───────┬─────────┘    │
//! │         │                           │  streaming port     │  ▲           │
//! │         │                           └──────────┬──────────┘  │ frames    │
//! │         │                                      │   ┌─────────┴───────┐   │
//! │         │                                      │   │ Capture thread  │   │
//! │         │                                      │   │ (audio::capture)│   │
//! │         │                                      │   └─────────────────┘   │
//! └─────────┼──────────────────────────────────────┼─────────────────────────┘
//!           │ UDP 50004                            │ UDP 50006
//!           ▼                                      ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              DESKTOP PEER                                 │
//! │   DISCOVER (broadcast) ► HI ► OK      keep-alive / BYE ◄► PCM playback    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Capture sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Capture channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Samples carried by one audio datagram
    pub const DEFAULT_SAMPLES_PER_PACKET: usize = 1024;

    /// UDP port used for discovery and the pairing handshake
    pub const DEFAULT_PAIRING_PORT: u16 = 50004;

    /// UDP port used for heartbeats and audio
    pub const DEFAULT_STREAMING_PORT: u16 = 50006;

    /// Receive timeout while waiting for pairing traffic
    pub const DEFAULT_PAIRING_RECV_TIMEOUT_MS: u64 = 1000;

    /// Interval between heartbeats sent to the peer
    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 500;

    /// How long the watchdog waits for an ack after each heartbeat
    pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 500;

    /// Silence after which the peer is declared lost
    pub const DEFAULT_PEER_TIMEOUT_MS: u64 = 10_000;

    /// Initial gain applied to captured samples
    pub const DEFAULT_SENSITIVITY: f32 = 0.7;

    /// Upper bound accepted for the gain
    pub const DEFAULT_MAX_SENSITIVITY: f32 = 2.0;

    /// Number of round-trip samples kept for charting
    pub const LATENCY_HISTORY_CAPACITY: usize = 20;

    /// Frames queued between the capture thread and the streamer
    pub const FRAME_QUEUE_CAPACITY: usize = 32;

    /// Largest datagram read from either socket
    pub const MAX_DATAGRAM_SIZE: usize = 4096;

    /// Receiver side: interval between discovery broadcasts
    pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 1000;

    /// Receiver side: interval between keep-alives sent to the device
    pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 500;

    /// Receiver side: silence after which the device is declared lost
    pub const DEFAULT_DEVICE_TIMEOUT_MS: u64 = 5000;

    /// Receiver side: inter-packet gaps kept for charting
    pub const RECEIVER_HISTORY_CAPACITY: usize = 50;
}
