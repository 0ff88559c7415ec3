use std::time::Duration;

use crate::audio::{CaptureConfig, PLAYBACK_SAMPLE_RATE};
use crate::config::Config;
use crate::live::LiveSetup;

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Microphone format and frame size
    pub capture: CaptureConfig,

    /// Sample rate of reply audio (Live API sends 24kHz)
    pub playback_sample_rate: u32,

    /// Persona, model and voice sent when the stream opens
    pub setup: LiveSetup,

    /// How long to wait for the remote side to accept the setup
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            setup: LiveSetup::default(),
            handshake_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            capture: CaptureConfig {
                sample_rate: cfg.audio.capture_sample_rate,
                channels: 1,
                buffer_size: cfg.audio.buffer_size,
            },
            playback_sample_rate: cfg.audio.playback_sample_rate,
            setup: LiveSetup::from(&cfg.live),
            handshake_timeout: Duration::from_secs(cfg.live.handshake_timeout_secs),
        }
    }
}
