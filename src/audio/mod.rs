//! Audio subsystem module

pub mod buffer;
pub mod capture;
#[cfg(feature = "cpal-capture")]
pub mod device;
pub mod gain;

pub use buffer::{frame_queue, AudioFrame, FrameReceiver, FrameSender};
pub use capture::{AudioSource, CaptureFormat, CaptureHandle};
#[cfg(feature = "cpal-capture")]
pub use capture::CpalSource;
#[cfg(feature = "cpal-capture")]
pub use device::{find_input_device, list_input_devices, InputDeviceInfo};
pub use gain::Sensitivity;
