//! Audio capture capability
//!
//! The session only sees [`AudioSource`] and [`CaptureHandle`]. The cpal
//! backend runs the input stream on a dedicated thread (cpal streams are not
//! `Send`) and hands batches over a [`frame_queue`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, FrameReceiver};
use crate::error::AudioError;

#[cfg(feature = "cpal-capture")]
pub use self::cpal_backend::CpalSource;

/// Format requested from a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per delivered batch
    pub samples_per_batch: usize,
    /// Batches buffered before the source starts dropping
    pub queue_capacity: usize,
}

impl CaptureFormat {
    pub fn from_config(audio: &crate::config::AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            samples_per_batch: audio.samples_per_packet,
            queue_capacity: audio.frame_queue_capacity,
        }
    }
}

/// Something that can be opened to yield PCM batches
pub trait AudioSource: Send + Sync {
    /// Open the device. Fails with [`AudioError::CaptureUnavailable`] (or a
    /// more specific error) when nothing can be captured.
    fn open(&self, format: CaptureFormat) -> Result<CaptureHandle, AudioError>;
}

/// An open capture stream.
///
/// Dropping the handle (or calling [`close`](Self::close)) releases the
/// underlying device.
pub struct CaptureHandle {
    frames: FrameReceiver,
    format: CaptureFormat,
    _keepalive: Option<Box<dyn Send>>,
}

impl CaptureHandle {
    /// Wrap a frame queue; `keepalive` is dropped when the handle closes
    pub fn new(frames: FrameReceiver, format: CaptureFormat, keepalive: Option<Box<dyn Send>>) -> Self {
        Self {
            frames,
            format,
            _keepalive: keepalive,
        }
    }

    /// Wait up to `wait` for the next batch
    pub async fn read(&mut self, wait: Duration) -> Result<Option<AudioFrame>, AudioError> {
        self.frames.recv_timeout(wait).await
    }

    /// Drop batches captured before the consumer was ready
    pub fn discard_pending(&mut self) -> usize {
        self.frames.discard_pending()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.frames.dropped_frames()
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn close(self) {
        tracing::debug!("Capture handle closed");
    }
}

/// Stops the capture thread on drop.
///
/// Handles are usually dropped from inside a tokio task, and tearing down a
/// device stream can take a while, so the join goes to the blocking pool
/// whenever a runtime is present.
#[cfg_attr(not(feature = "cpal-capture"), allow(dead_code))]
pub(crate) struct CaptureGuard {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

#[cfg_attr(not(feature = "cpal-capture"), allow(dead_code))]
impl CaptureGuard {
    pub(crate) fn new(running: Arc<AtomicBool>, thread_handle: JoinHandle<()>) -> Self {
        Self {
            running,
            thread_handle: Some(thread_handle),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        let join = move || {
            if handle.join().is_err() {
                tracing::warn!("Capture thread panicked");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(join);
            }
            Err(_) => join(),
        }
    }
}

#[cfg(feature = "cpal-capture")]
mod cpal_backend {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
    use crossbeam_channel::bounded;

    use super::{AudioSource, CaptureFormat, CaptureGuard, CaptureHandle};
    use crate::audio::buffer::{frame_queue, FrameSender};
    use crate::audio::device::find_input_device;
    use crate::error::AudioError;

    /// Microphone capture through the default cpal host
    #[derive(Debug, Clone, Default)]
    pub struct CpalSource {
        /// Input device name; `None` picks the host default
        device: Option<String>,
    }

    impl CpalSource {
        pub fn new(device: Option<String>) -> Self {
            Self { device }
        }
    }

    impl AudioSource for CpalSource {
        fn open(&self, format: CaptureFormat) -> Result<CaptureHandle, AudioError> {
            let device = find_input_device(self.device.as_deref())?;
            let sample_format = device.default_input_config()?.sample_format();

            let config = StreamConfig {
                channels: format.channels,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let (sender, receiver) = frame_queue(format.queue_capacity, format.channels);
            let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
            let running = Arc::new(AtomicBool::new(true));
            let running_for_loop = running.clone();

            let handle = thread::Builder::new()
                .name("mic-capture".to_string())
                .spawn(move || {
                    let cpal_device = device.into_inner();
                    let stream = match sample_format {
                        SampleFormat::I16 => build_stream::<i16>(&cpal_device, &config, sender, format.samples_per_batch),
                        SampleFormat::F32 => build_stream::<f32>(&cpal_device, &config, sender, format.samples_per_batch),
                        SampleFormat::U16 => build_stream::<u16>(&cpal_device, &config, sender, format.samples_per_batch),
                        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                    };

                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::CaptureUnavailable(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    // Keep thread alive while running
                    while running_for_loop.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }

                    // Stream is dropped here, stopping capture
                })
                .map_err(|e| AudioError::StreamError(e.to_string()))?;

            let guard = CaptureGuard::new(running, handle);

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    tracing::info!(
                        "Capture started: {}Hz, {} channel(s), {} samples/batch",
                        format.sample_rate,
                        format.channels,
                        format.samples_per_batch
                    );
                    Ok(CaptureHandle::new(receiver, format, Some(Box::new(guard))))
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AudioError::CaptureUnavailable(
                    "capture thread exited during setup".into(),
                )),
            }
        }
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut sender: FrameSender,
        batch: usize,
    ) -> Result<cpal::Stream, AudioError>
    where
        T: SizedSample,
        i16: FromSample<T>,
    {
        let batch = batch.max(1);
        let mut pending: Vec<i16> = Vec::with_capacity(batch * 2);

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if sender.is_closed() {
                        return;
                    }

                    pending.extend(data.iter().map(|&s| s.to_sample::<i16>()));
                    while pending.len() >= batch {
                        let rest = pending.split_off(batch);
                        let full = std::mem::replace(&mut pending, rest);
                        sender.push(full);
                    }
                },
                move |err| {
                    tracing::warn!("Capture stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::CaptureUnavailable(e.to_string()))
    }
}
