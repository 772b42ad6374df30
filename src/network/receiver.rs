//! Desktop side of the link
//!
//! Probes the subnet for a device, confirms the first `HI`, then keeps the
//! device alive and collects its audio.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::audio::gain::decode_frame;
use crate::config::ReceiverConfig;
use crate::constants::{MAX_DATAGRAM_SIZE, RECEIVER_HISTORY_CAPACITY};
use crate::error::NetworkError;
use crate::network::udp::{bind_socket, recv_timeout, send_best_effort};
use crate::protocol::ControlMessage;
use crate::session::{LatencyHistory, RunSignal};

/// Receive window of the streaming socket between keep-alive checks
const LINK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often link statistics are logged
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Broadcast `DISCOVER` until a device answers `HI`, then confirm with `OK`.
///
/// Returns the device address, or `None` if `signal` was cancelled first.
pub async fn discover(
    socket: &UdpSocket,
    config: &ReceiverConfig,
    signal: &RunSignal,
) -> Result<Option<IpAddr>, NetworkError> {
    let probe = ControlMessage::Discover.as_bytes();
    let mut buf = [0u8; 256];

    info!("Searching for a device via {}", config.discovery_target);

    while signal.is_running() {
        if let Err(e) = socket.send_to(probe, config.discovery_target).await {
            debug!("Discovery probe failed: {}", e);
        }

        let deadline = Instant::now() + config.discovery_interval();
        while let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            if !signal.is_running() {
                return Ok(None);
            }

            let (len, src) = match recv_timeout(socket, &mut buf, wait).await {
                Ok(received) => received,
                Err(e) if e.is_transient() => break,
                Err(e) => return Err(e),
            };

            if ControlMessage::parse(&buf[..len]) == Some(ControlMessage::Hi) {
                socket
                    .send_to(ControlMessage::Ok.as_bytes(), src)
                    .await
                    .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
                info!("Paired with device {}", src.ip());
                return Ok(Some(src.ip()));
            }
            trace!("Ignoring {} byte datagram from {}", len, src);
        }
    }

    Ok(None)
}

/// Why a device link ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkExit {
    Cancelled,
    /// Device sent a disconnect token
    DeviceClosed,
    /// Nothing heard within the device timeout
    DeviceLost,
}

/// Counters of a device link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub packets: u64,
    pub bytes: u64,
    /// Batches dropped because the sink was full
    pub sink_drops: u64,
}

/// Streaming-port session with one device
pub struct DeviceLink {
    socket: UdpSocket,
    target: SocketAddr,
    config: ReceiverConfig,
    history: LatencyHistory,
    stats: LinkStats,
}

impl DeviceLink {
    /// Bind the local streaming port for `device`
    pub fn bind(config: &ReceiverConfig, device: IpAddr) -> Result<Self, NetworkError> {
        let socket = bind_socket(SocketAddr::new(config.bind_address, config.streaming_port), false)?;

        Ok(Self {
            socket,
            target: SocketAddr::new(device, config.device_streaming_port),
            config: config.clone(),
            history: LatencyHistory::new(RECEIVER_HISTORY_CAPACITY),
            stats: LinkStats::default(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Current destination for keep-alives
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Gaps between consecutive audio datagrams
    pub fn history(&self) -> &LatencyHistory {
        &self.history
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Keep the device alive and forward decoded audio to `sink`
    pub async fn run(&mut self, sink: &Sender<Vec<i16>>, signal: &RunSignal) -> LinkExit {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let device_ip = self.target.ip();
        let mut last_heard = Instant::now();
        let mut last_packet: Option<Instant> = None;
        let mut last_keep_alive: Option<Instant> = None;
        let mut last_stats = Instant::now();

        info!("Listening for audio from {} on {:?}", device_ip, self.local_addr());

        while signal.is_running() {
            if last_keep_alive.map_or(true, |t| t.elapsed() >= self.config.keep_alive_interval()) {
                if let Err(e) = self
                    .socket
                    .send_to(ControlMessage::KeepAlive.as_bytes(), self.target)
                    .await
                {
                    trace!("Keep-alive to {} failed: {}", self.target, e);
                }
                last_keep_alive = Some(Instant::now());
            }

            match recv_timeout(&self.socket, &mut buf, LINK_POLL_INTERVAL).await {
                Ok((len, src)) if src.ip() == device_ip => {
                    // Reply to wherever the device actually sends from
                    self.target = src;
                    last_heard = Instant::now();

                    match ControlMessage::parse(&buf[..len]) {
                        Some(ControlMessage::Bye) => {
                            info!("Device {} disconnected", device_ip);
                            return LinkExit::DeviceClosed;
                        }
                        Some(_) => {}
                        None => self.on_audio(&buf[..len], last_heard, &mut last_packet, sink),
                    }
                }
                Ok((_, src)) => trace!("Ignoring datagram from stranger {}", src),
                Err(e) if !e.is_transient() => warn!("Link receive error: {}", e),
                Err(_) => {}
            }

            if last_heard.elapsed() > self.config.device_timeout() {
                warn!("No packets from {} for {:?}, link lost", device_ip, last_heard.elapsed());
                return LinkExit::DeviceLost;
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                last_stats = Instant::now();
                info!(
                    "Link stats: {} packets, {:.1} KB, {} dropped, last gap {:?}",
                    self.stats.packets,
                    self.stats.bytes as f64 / 1024.0,
                    self.stats.sink_drops,
                    self.history.latest()
                );
            }
        }

        LinkExit::Cancelled
    }

    fn on_audio(
        &mut self,
        payload: &[u8],
        now: Instant,
        last_packet: &mut Option<Instant>,
        sink: &Sender<Vec<i16>>,
    ) {
        if let Some(previous) = last_packet.replace(now) {
            self.history.record(now.duration_since(previous));
        }
        self.stats.packets += 1;
        self.stats.bytes += payload.len() as u64;

        match sink.try_send(decode_frame(payload)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.stats.sink_drops += 1,
            Err(TrySendError::Disconnected(_)) => trace!("Audio sink closed"),
        }
    }

    /// Tell the device the desktop is leaving
    pub async fn send_disconnect(&self) {
        send_best_effort(
            &self.socket,
            ControlMessage::Bye.as_bytes(),
            self.target,
            Duration::from_millis(200),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RunFlag;
    use std::net::Ipv4Addr;

    fn loopback_config() -> ReceiverConfig {
        ReceiverConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            pairing_port: 0,
            streaming_port: 0,
            discovery_target: "127.0.0.1:9".parse().unwrap(),
            device_streaming_port: 9,
            discovery_interval_ms: 50,
            keep_alive_interval_ms: 20,
            device_timeout_ms: 300,
        }
    }

    #[tokio::test]
    async fn test_discover_confirms_hi() {
        let device = bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let mut config = loopback_config();
        config.discovery_target = device.local_addr().unwrap();

        let desktop = bind_socket("127.0.0.1:0".parse().unwrap(), true).unwrap();
        let flag = RunFlag::new();
        let signal = flag.signal();
        let task = tokio::spawn(async move { discover(&desktop, &config, &signal).await });

        let mut buf = [0u8; 64];
        let (len, src) = recv_timeout(&device, &mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..len], b"MANGEO_DISCOVER");
        device.send_to(b"MANGEO_HI", src).await.unwrap();

        // Later probes may still be queued ahead of the confirmation
        let confirmed = loop {
            let (len, _) = recv_timeout(&device, &mut buf, Duration::from_secs(1)).await.unwrap();
            if &buf[..len] == b"MANGEO_OK" {
                break true;
            }
        };
        assert!(confirmed);

        let found = task.await.unwrap().unwrap();
        assert_eq!(found, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn test_link_forwards_audio_and_acks() {
        let device = bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let mut link = DeviceLink::bind(&loopback_config(), IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        let link_addr = link.local_addr().unwrap();
        let (tx, rx) = crossbeam_channel::bounded(8);
        let flag = RunFlag::new();
        let signal = flag.signal();

        let task = tokio::spawn(async move {
            let exit = link.run(&tx, &signal).await;
            (exit, link.stats(), link.target())
        });

        device.send_to(b"MANGOVAR", link_addr).await.unwrap();
        device.send_to(&[0x01, 0x00, 0xFF, 0xFF], link_addr).await.unwrap();
        device.send_to(&[0x02, 0x00], link_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let mut got_keep_alive = false;
        for _ in 0..10 {
            if let Ok((len, _)) = recv_timeout(&device, &mut buf, Duration::from_millis(100)).await {
                if &buf[..len] == b"MANGOHI" {
                    got_keep_alive = true;
                    break;
                }
            }
        }
        assert!(got_keep_alive);

        device.send_to(b"MANGEO_BYE", link_addr).await.unwrap();
        let (exit, stats, target) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, LinkExit::DeviceClosed);
        assert_eq!(stats.packets, 2);
        assert_eq!(target, device.local_addr().unwrap());
        assert_eq!(rx.try_recv().unwrap(), vec![1, -1]);
        assert_eq!(rx.try_recv().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_stranger_traffic_does_not_keep_link_alive() {
        let stranger = bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap();
        // Device lives on another loopback address, so strangers never match it
        let mut link = DeviceLink::bind(&loopback_config(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))).unwrap();
        let link_addr = link.local_addr().unwrap();
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let flag = RunFlag::new();
        let signal = flag.signal();

        let chatter = tokio::spawn(async move {
            loop {
                let _ = stranger.send_to(&[0x01, 0x00], link_addr).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let exit = tokio::time::timeout(Duration::from_secs(2), link.run(&tx, &signal)).await;
        chatter.abort();

        assert_eq!(exit.unwrap(), LinkExit::DeviceLost);
        assert_eq!(link.stats().packets, 0);
    }

    #[tokio::test]
    async fn test_silent_device_is_lost() {
        let mut link = DeviceLink::bind(&loopback_config(), IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let flag = RunFlag::new();

        let exit = tokio::time::timeout(Duration::from_secs(2), link.run(&tx, &flag.signal()))
            .await
            .unwrap();
        assert_eq!(exit, LinkExit::DeviceLost);
    }
}
