use async_trait::async_trait;
use tokio::sync::mpsc;

use super::codec::PlaybackBuffer;
use crate::error::Result;

/// Microphone sample rate required by the Live API
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of the audio the Live API sends back
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// One captured frame of microphone audio
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono float samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn silence(len: usize, sample_rate: u32, timestamp_ms: u64) -> Self {
        Self {
            samples: vec![0.0; len],
            sample_rate,
            channels: 1,
            timestamp_ms,
        }
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels.max(1) as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// Configuration for the capture device
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate (fixed by the remote protocol)
    pub sample_rate: u32,
    /// Channel count (1 = mono)
    pub channels: u16,
    /// Samples per frame handed to the session
    pub buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Microphone capture device
///
/// Implementations:
/// - WAV file replay (`WavCapture`)
/// - System microphone via cpal (`cpal-audio` feature)
/// - In-memory fake (`testing::FakeCapture`)
#[async_trait]
pub trait CaptureDevice: Send {
    /// Start the frame tap
    ///
    /// Returns a channel receiver that will receive audio frames in capture order
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device
    ///
    /// Must be safe to call repeatedly.
    async fn stop(&mut self) -> Result<()>;

    /// Check if the tap is currently running
    fn is_capturing(&self) -> bool;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Speaker device with its own clock
///
/// `current_time` is in seconds on the device clock; buffers are scheduled
/// against that clock.
pub trait PlaybackDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Current device clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule a buffer to start playing at `start_at`
    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<()>;

    /// Number of scheduled buffers that have not finished playing
    fn pending(&self) -> usize;

    /// Drop everything that is scheduled but not yet played
    fn clear(&mut self);

    /// Close the device; must be safe to call repeatedly
    fn close(&mut self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Access to the platform's audio devices
#[async_trait]
pub trait AudioDevices: Send + Sync {
    /// Request the microphone (may prompt for permission or be denied)
    async fn open_capture(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>>;

    /// Open a playback context at the given sample rate
    async fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackDevice>>;
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// System microphone and speaker (`cpal-audio` feature)
    System,
    /// Replay a WAV file as the microphone, optionally record replies to a WAV file
    File {
        input: String,
        output: Option<String>,
    },
}

/// Audio device factory
pub struct AudioDevicesFactory;

impl AudioDevicesFactory {
    /// Create device access for the requested source
    pub fn create(source: AudioSource) -> anyhow::Result<std::sync::Arc<dyn AudioDevices>> {
        match source {
            AudioSource::System => {
                #[cfg(feature = "cpal-audio")]
                {
                    Ok(std::sync::Arc::new(super::system::SystemDevices::new()))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    anyhow::bail!("System audio requires the `cpal-audio` feature")
                }
            }

            AudioSource::File { input, output } => Ok(std::sync::Arc::new(
                super::file::WavFileDevices::new(input, output),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_config_default() {
        let config = CaptureConfig::default();

        assert_eq!(config.sample_rate, 16000, "Live API expects 16kHz input");
        assert_eq!(config.channels, 1, "Default should be mono");
        assert_eq!(config.buffer_size, 4096);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(4096, 16000, 0);
        assert_eq!(frame.duration_ms(), 256);
        assert!(frame.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_system_source_without_feature() {
        #[cfg(not(feature = "cpal-audio"))]
        assert!(AudioDevicesFactory::create(AudioSource::System).is_err());
    }
}
