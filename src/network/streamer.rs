//! Audio streaming loop
//!
//! One capture batch becomes one datagram. Sends are fire-and-forget: a
//! failed send drops that batch and the loop carries on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::audio::gain::encode_frame;
use crate::audio::{CaptureHandle, Sensitivity};
use crate::session::{PeerEndpoint, RunSignal};

/// Longest a single capture read may block the loop
const READ_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Counters shared with the controller
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    capture_drops: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn set_capture_drops(&self, dropped: u64) {
        self.capture_drops.store(dropped, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.send_failures.store(0, Ordering::Relaxed);
        self.capture_drops.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            capture_drops: self.capture_drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    /// Batches the capture queue dropped because the streamer fell behind
    pub capture_drops: u64,
}

/// Why the streamer returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerExit {
    Cancelled,
    /// The capture source closed underneath us
    CaptureEnded,
}

pub struct AudioStreamer {
    socket: Arc<UdpSocket>,
    peer: PeerEndpoint,
    sensitivity: Sensitivity,
    stats: Arc<StreamStats>,
}

impl AudioStreamer {
    pub fn new(
        socket: Arc<UdpSocket>,
        peer: PeerEndpoint,
        sensitivity: Sensitivity,
        stats: Arc<StreamStats>,
    ) -> Self {
        Self {
            socket,
            peer,
            sensitivity,
            stats,
        }
    }

    /// Forward capture batches until cancelled. Consumes and closes `capture`.
    pub async fn run(self, mut capture: CaptureHandle, signal: RunSignal) -> StreamerExit {
        let target = self.peer.streaming_addr();
        let stale = capture.discard_pending();
        if stale > 0 {
            debug!("Discarded {} batches captured before pairing", stale);
        }

        let mut packet = BytesMut::with_capacity(capture.format().samples_per_batch * 2);
        debug!("Streaming audio to {}", target);

        let exit = loop {
            if !signal.is_running() {
                break StreamerExit::Cancelled;
            }

            let frame = match capture.read(READ_POLL_INTERVAL).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Capture ended: {}", e);
                    break StreamerExit::CaptureEnded;
                }
            };

            if !signal.is_running() {
                break StreamerExit::Cancelled;
            }

            packet.clear();
            encode_frame(&frame.samples, self.sensitivity.get(), &mut packet);

            match self.socket.send_to(&packet, target).await {
                Ok(sent) => self.stats.record_sent(sent),
                Err(e) => {
                    self.stats.record_failure();
                    trace!("Dropped batch {}: {}", frame.sequence, e);
                }
            }
            self.stats.set_capture_drops(capture.dropped_frames());
        };

        capture.close();
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::gain::decode_frame;
    use crate::audio::{frame_queue, CaptureFormat};
    use crate::network::udp::{bind_socket, recv_timeout};
    use crate::session::RunFlag;

    fn format() -> CaptureFormat {
        CaptureFormat {
            sample_rate: 44_100,
            channels: 1,
            samples_per_batch: 4,
            queue_capacity: 8,
        }
    }

    #[tokio::test]
    async fn test_batches_are_scaled_and_sent() {
        let device = Arc::new(bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap());
        let peer = bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (mut tx, rx) = frame_queue(8, 1);
        let capture = CaptureHandle::new(rx, format(), None);
        let stats = Arc::new(StreamStats::new());
        let flag = RunFlag::new();

        let streamer = AudioStreamer::new(
            device,
            PeerEndpoint::new(peer_addr.ip(), peer_addr.port()),
            Sensitivity::new(2.0, 2.0),
            stats.clone(),
        );
        let task = tokio::spawn(streamer.run(capture, flag.signal()));

        // Let the streamer drain stale batches before feeding it
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.push(vec![100, -100, 30000, -30000]);

        let mut buf = [0u8; 64];
        let (len, _) = recv_timeout(&peer, &mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(decode_frame(&buf[..len]), vec![200, -200, 32767, -32768]);

        flag.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(exit, StreamerExit::Cancelled);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.bytes_sent, 8);
        assert_eq!(snapshot.send_failures, 0);
    }

    #[tokio::test]
    async fn test_closed_capture_ends_stream() {
        let device = Arc::new(bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap());
        let (tx, rx) = frame_queue(8, 1);
        let capture = CaptureHandle::new(rx, format(), None);
        let flag = RunFlag::new();

        let streamer = AudioStreamer::new(
            device,
            PeerEndpoint::new("127.0.0.1".parse().unwrap(), 9),
            Sensitivity::new(1.0, 2.0),
            Arc::new(StreamStats::new()),
        );
        drop(tx);

        let exit = tokio::time::timeout(Duration::from_secs(1), streamer.run(capture, flag.signal()))
            .await
            .unwrap();
        assert_eq!(exit, StreamerExit::CaptureEnded);
    }

    #[tokio::test]
    async fn test_stale_batches_are_discarded() {
        let device = Arc::new(bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap());
        let peer = bind_socket("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let (mut tx, rx) = frame_queue(8, 1);
        tx.push(vec![1, 1, 1, 1]);
        tx.push(vec![2, 2, 2, 2]);
        let capture = CaptureHandle::new(rx, format(), None);
        let flag = RunFlag::new();

        let streamer = AudioStreamer::new(
            device,
            PeerEndpoint::new(peer_addr.ip(), peer_addr.port()),
            Sensitivity::new(1.0, 2.0),
            Arc::new(StreamStats::new()),
        );
        let task = tokio::spawn(streamer.run(capture, flag.signal()));

        let mut buf = [0u8; 64];
        assert!(recv_timeout(&peer, &mut buf, Duration::from_millis(100)).await.is_err());

        flag.cancel();
        task.await.unwrap();
    }
}
