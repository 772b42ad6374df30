//! Session controller
//!
//! Single owner of [`SessionState`]. `start()` opens capture and the pairing
//! socket, then hands the session to a supervisor task that pairs, runs the
//! watchdog and streamer side by side, and tears everything down when one of
//! them ends or `stop()` is called.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audio::{AudioSource, CaptureFormat, CaptureHandle, Sensitivity};
use crate::config::AppConfig;
use crate::error::{Result, SessionError};
use crate::network::udp::{bind_socket, send_best_effort};
use crate::network::{
    AudioStreamer, Handshake, PairingOutcome, StreamStats, StreamStatsSnapshot, StreamerExit,
    Watchdog, WatchdogExit,
};
use crate::protocol::ControlMessage;
use crate::session::{LatencyHistory, PeerEndpoint, RunFlag, RunSignal, SessionState, StopReason};

/// Upper bound on the disconnect send
const BYE_SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// State readable by observers and written by the controller and its supervisor
struct Shared {
    state: watch::Sender<SessionState>,
    peer: RwLock<Option<PeerEndpoint>>,
    latency: RwLock<LatencyHistory>,
    last_stop: Mutex<Option<StopReason>>,
    pairing_addr: Mutex<Option<SocketAddr>>,
    streaming_addr: Mutex<Option<SocketAddr>>,
    capture_permitted: AtomicBool,
    sensitivity: Sensitivity,
    stats: Arc<StreamStats>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                info!("Session {} -> {}", current, next);
                *current = next;
                true
            } else {
                warn!("Ignoring invalid transition {} -> {}", current, next);
                false
            }
        });
    }

    /// Final step of every teardown
    fn finish(&self, reason: StopReason) {
        *self.last_stop.lock() = Some(reason);
        self.latency.write().clear();
        *self.pairing_addr.lock() = None;
        *self.streaming_addr.lock() = None;
        self.transition(SessionState::Stopped);
        info!("Session ended: {}", reason);
    }
}

/// First reason recorded wins; later ones are ignored
#[derive(Debug, Default)]
struct StopSlot(Mutex<Option<StopReason>>);

impl StopSlot {
    fn set_if_empty(&self, reason: StopReason) {
        self.0.lock().get_or_insert(reason);
    }

    fn get(&self) -> Option<StopReason> {
        *self.0.lock()
    }
}

/// Handle on a running supervisor
struct SessionTask {
    id: Uuid,
    flag: RunFlag,
    stop_reason: Arc<StopSlot>,
    handle: JoinHandle<()>,
}

/// Drives one microphone session at a time
pub struct SessionController {
    config: AppConfig,
    source: Arc<dyn AudioSource>,
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<SessionTask>>,
}

impl SessionController {
    pub fn new(config: AppConfig, source: Arc<dyn AudioSource>) -> Result<Self> {
        config.validate()?;

        let (state, _) = watch::channel(SessionState::Idle);
        let shared = Shared {
            state,
            peer: RwLock::new(None),
            latency: RwLock::new(LatencyHistory::default()),
            last_stop: Mutex::new(None),
            pairing_addr: Mutex::new(None),
            streaming_addr: Mutex::new(None),
            capture_permitted: AtomicBool::new(true),
            sensitivity: Sensitivity::new(config.audio.sensitivity, config.audio.max_sensitivity),
            stats: Arc::new(StreamStats::new()),
        };

        Ok(Self {
            config,
            source,
            shared: Arc::new(shared),
            task: tokio::sync::Mutex::new(None),
        })
    }

    /// Begin discovery. Valid from Idle or Stopped.
    ///
    /// Capture and the pairing socket are opened before anything else, so a
    /// missing microphone or a busy port leaves the session idle.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.task.lock().await;

        if let Some(previous) = slot.take() {
            let state = self.shared.state();
            if !state.is_idle() {
                *slot = Some(previous);
                return Err(SessionError::AlreadyActive(state).into());
            }
            // Already torn down; reap the finished supervisor
            if let Err(e) = previous.handle.await {
                error!("Session {} task failed: {}", previous.id, e);
            }
        }

        let state = self.shared.state();
        if !state.is_idle() {
            return Err(SessionError::AlreadyActive(state).into());
        }
        if !self.capture_permitted() {
            warn!("Refusing to start: audio capture not permitted");
            return Err(SessionError::PermissionDenied.into());
        }

        let capture = self
            .source
            .open(CaptureFormat::from_config(&self.config.audio))
            .inspect_err(|e| error!("Cannot open capture: {}", e))?;
        let handshake = Handshake::bind(&self.config.network)
            .inspect_err(|e| error!("Cannot bind pairing socket: {}", e))?;

        if state == SessionState::Stopped {
            self.shared.transition(SessionState::Idle);
        }
        *self.shared.peer.write() = None;
        *self.shared.last_stop.lock() = None;
        *self.shared.pairing_addr.lock() = handshake.local_addr();
        self.shared.latency.write().clear();
        self.shared.stats.reset();

        let id = Uuid::new_v4();
        let flag = RunFlag::new();
        let stop_reason = Arc::new(StopSlot::default());
        let supervisor = Supervisor {
            shared: self.shared.clone(),
            config: self.config.clone(),
            flag: flag.clone(),
            signal: flag.signal(),
            stop_reason: stop_reason.clone(),
        };

        self.shared.transition(SessionState::Discovering);
        let handle = tokio::spawn(
            supervisor
                .run(handshake, capture)
                .instrument(info_span!("session", id = %id)),
        );
        info!("Session {} started", id);

        *slot = Some(SessionTask {
            id,
            flag,
            stop_reason,
            handle,
        });
        Ok(())
    }

    /// Stop the current session and wait for teardown.
    ///
    /// Calling it with no session running, or twice, is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.task.lock().await;

        let Some(task) = slot.take() else {
            debug!("Stop requested with no session running");
            return Ok(());
        };

        task.stop_reason.set_if_empty(StopReason::UserRequested);
        task.flag.cancel();

        if let Err(e) = task.handle.await {
            error!("Session {} task failed: {}", task.id, e);
            self.shared.state.send_replace(SessionState::Stopped);
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Most recent latency sample of the current session
    pub fn current_latency(&self) -> Option<Duration> {
        self.shared.latency.read().latest()
    }

    /// Latency samples, oldest first
    pub fn latency_history(&self) -> Vec<Duration> {
        self.shared.latency.read().to_vec()
    }

    /// Peer of the current (or most recent) session
    pub fn peer(&self) -> Option<PeerEndpoint> {
        *self.shared.peer.read()
    }

    pub fn last_stop_reason(&self) -> Option<StopReason> {
        *self.shared.last_stop.lock()
    }

    /// Gain handle; changes apply to the running stream immediately
    pub fn sensitivity(&self) -> Sensitivity {
        self.shared.sensitivity.clone()
    }

    pub fn stream_stats(&self) -> StreamStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Local address of the pairing socket while discovering
    pub fn pairing_addr(&self) -> Option<SocketAddr> {
        *self.shared.pairing_addr.lock()
    }

    /// Local address of the streaming socket while matched
    pub fn streaming_addr(&self) -> Option<SocketAddr> {
        *self.shared.streaming_addr.lock()
    }

    /// Permission host hook; a denied capture makes `start()` fail
    pub fn set_capture_permitted(&self, permitted: bool) {
        self.shared.capture_permitted.store(permitted, Ordering::SeqCst);
    }

    pub fn capture_permitted(&self) -> bool {
        self.shared.capture_permitted.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Runs one session from pairing to teardown
struct Supervisor {
    shared: Arc<Shared>,
    config: AppConfig,
    flag: RunFlag,
    signal: RunSignal,
    stop_reason: Arc<StopSlot>,
}

impl Supervisor {
    async fn run(self, handshake: Handshake, capture: CaptureHandle) {
        let reason = match handshake.run(&self.signal).await {
            Ok(Some(outcome)) if self.signal.is_running() => self.stream(outcome, capture).await,
            Ok(_) => {
                capture.close();
                None
            }
            Err(e) => {
                error!("Pairing failed: {}", e);
                capture.close();
                Some(StopReason::PairingFailed)
            }
        };

        if let Some(reason) = reason {
            self.stop_reason.set_if_empty(reason);
        }
        self.flag.cancel();
        self.shared
            .finish(self.stop_reason.get().unwrap_or(StopReason::UserRequested));
    }

    async fn stream(&self, outcome: PairingOutcome, capture: CaptureHandle) -> Option<StopReason> {
        let peer = outcome.peer;

        let socket = match bind_socket(self.config.network.streaming_bind_addr(), false) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                error!("Cannot bind streaming socket: {}", e);
                capture.close();
                return Some(StopReason::StreamingBindFailed);
            }
        };

        // Published before the loops exist, so they only ever see the final peer
        self.shared.latency.write().record(outcome.latency);
        *self.shared.peer.write() = Some(peer);
        *self.shared.streaming_addr.lock() = socket.local_addr().ok();
        self.shared.transition(SessionState::Matched);

        let mut watchdog = tokio::spawn(
            Watchdog::new(socket.clone(), peer, self.config.watchdog.clone())
                .run(self.signal.clone())
                .in_current_span(),
        );
        let mut streamer = tokio::spawn(
            AudioStreamer::new(
                socket.clone(),
                peer,
                self.shared.sensitivity.clone(),
                self.shared.stats.clone(),
            )
            .run(capture, self.signal.clone())
            .in_current_span(),
        );

        let reason = tokio::select! {
            exit = &mut watchdog => {
                let reason = self.on_watchdog_exit(exit);
                self.flag.cancel();
                if let Err(e) = streamer.await {
                    error!("Streamer task failed: {}", e);
                }
                reason
            }
            exit = &mut streamer => {
                let reason = self.on_streamer_exit(exit);
                self.flag.cancel();
                if let Err(e) = watchdog.await {
                    error!("Watchdog task failed: {}", e);
                }
                reason
            }
        };

        send_best_effort(&socket, ControlMessage::Bye.as_bytes(), peer.streaming_addr(), BYE_SEND_TIMEOUT).await;
        debug!("Disconnect sent to {}", peer);

        reason
    }

    fn on_watchdog_exit(&self, exit: std::result::Result<WatchdogExit, tokio::task::JoinError>) -> Option<StopReason> {
        match exit {
            Ok(WatchdogExit::Cancelled) => None,
            Ok(WatchdogExit::PeerLost { silent_for }) => {
                warn!("Peer lost after {:?} of silence", silent_for);
                Some(StopReason::PeerLost)
            }
            Ok(WatchdogExit::PeerClosed) => Some(StopReason::PeerClosed),
            Err(e) => {
                error!("Watchdog task failed: {}", e);
                Some(StopReason::PeerLost)
            }
        }
    }

    fn on_streamer_exit(&self, exit: std::result::Result<StreamerExit, tokio::task::JoinError>) -> Option<StopReason> {
        match exit {
            Ok(StreamerExit::Cancelled) => None,
            Ok(StreamerExit::CaptureEnded) => Some(StopReason::CaptureFailed),
            Err(e) => {
                error!("Streamer task failed: {}", e);
                Some(StopReason::CaptureFailed)
            }
        }
    }
}
