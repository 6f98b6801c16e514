//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod meter;
pub mod playback;

pub use buffer::{AudioFrame, RingBuffer};
pub use device::{platform_device, AudioDevice, Backend, DesktopAudio, MobileAudio};
pub use meter::amplitude;
