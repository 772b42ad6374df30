//! Frame queue between the capture thread and the streamer
//!
//! Bounded and lossy on the producer side: a capture callback must never
//! block, so a full queue drops the newest batch and counts it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::AudioError;

/// One capture batch of interleaved signed 16-bit samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub channels: u16,
    /// Batch sequence number assigned by the producer
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, channels: u16, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / sample_rate.max(1) as u64
    }
}

/// Create a bounded frame queue
pub fn frame_queue(capacity: usize, channels: u16) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    (
        FrameSender {
            tx,
            channels,
            sequence: 0,
            dropped: dropped.clone(),
        },
        FrameReceiver { rx, dropped },
    )
}

/// Producer half, owned by a capture callback
pub struct FrameSender {
    tx: mpsc::Sender<AudioFrame>,
    channels: u16,
    sequence: u32,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Queue a batch without blocking.
    /// Returns false if the batch was dropped (queue full or consumer gone).
    pub fn push(&mut self, samples: Vec<i16>) -> bool {
        let frame = AudioFrame::new(samples, self.channels, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// True once the consumer half has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by the capture handle
pub struct FrameReceiver {
    rx: mpsc::Receiver<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameReceiver {
    /// Wait up to `wait` for the next batch.
    ///
    /// `Ok(None)` means nothing arrived in time; `StreamClosed` means every
    /// producer is gone and no batch will ever arrive again.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<AudioFrame>, AudioError> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(AudioError::StreamClosed),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Throw away everything queued so far, returning how many batches went
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Batches dropped because the queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
