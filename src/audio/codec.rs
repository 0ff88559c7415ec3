// PCM codec for the Live API wire format
//
// Capture frames are f32 samples in [-1, 1]. On the wire they travel as
// 16-bit little-endian signed PCM, base64-encoded inside JSON messages.

use base64::Engine;

use crate::error::{Result, VoiceError};

/// Decoded reply audio, ready to be scheduled on a playback device
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (always 1 for Live API replies)
    pub channels: u16,
}

impl PlaybackBuffer {
    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels.max(1) as f64)
    }
}

/// Encode float samples as 16-bit little-endian PCM
///
/// Output is exactly `2 * samples.len()` bytes.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| float_to_i16(s).to_le_bytes())
        .collect()
}

/// Decode 16-bit little-endian PCM into a playable mono buffer
pub fn decode(bytes: &[u8], sample_rate: u32) -> Result<PlaybackBuffer> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::decode(format!(
            "PCM chunk has odd length ({} bytes)",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlaybackBuffer {
        samples,
        sample_rate,
        channels: 1,
    })
}

/// Base64 text form used inside JSON messages
pub fn text_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn text_decode(text: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| VoiceError::decode(format!("invalid base64 audio: {}", e)))
}

/// MIME type attached to outgoing PCM chunks
pub fn mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Root-mean-square amplitude of a frame
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Visual level in [0, 1] derived from the frame RMS
pub fn level(samples: &[f32]) -> f32 {
    let level = rms(samples) * 5.0;
    if level.is_finite() {
        level.min(1.0)
    } else {
        0.0
    }
}

fn float_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}
