//! Session lifecycle: state, run flag, latency history and the controller

pub mod controller;
pub mod flag;
pub mod latency;
pub mod state;

pub use controller::SessionController;
pub use flag::{RunFlag, RunSignal};
pub use latency::LatencyHistory;
pub use state::{PeerEndpoint, SessionState, StopReason};
