pub mod backend;
pub mod codec;
pub mod file;
pub mod playback;

#[cfg(feature = "cpal-audio")]
pub mod system;

pub use backend::{
    AudioDevices, AudioDevicesFactory, AudioFrame, AudioSource, CaptureConfig, CaptureDevice,
    PlaybackDevice, CAPTURE_SAMPLE_RATE, DEFAULT_BUFFER_SIZE, PLAYBACK_SAMPLE_RATE,
};
pub use codec::PlaybackBuffer;
pub use file::{AudioFile, WavCapture, WavFileDevices, WavPlayback};
pub use playback::PlaybackScheduler;
