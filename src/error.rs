//! Error types for the voice session.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// Missing credential or invalid setup; raised before anything is acquired
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Microphone/speaker denied, missing, or failed to start
    #[error("Audio device unavailable ({device}): {message}")]
    DeviceUnavailable { device: String, message: String },

    /// Remote stream rejected or never completed the opening handshake
    #[error("Live API handshake failed: {message}")]
    Handshake { message: String },

    /// Remote stream failed after it was open
    #[error("Live API transport error: {message}")]
    Transport { message: String },

    /// Malformed audio chunk
    #[error("Audio decode error: {message}")]
    Decode { message: String },

    /// `disconnect()` was called while `connect()` was still in flight
    #[error("Connection cancelled")]
    Cancelled,
}

impl VoiceError {
    pub fn device(device: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            message: message.to_string(),
        }
    }

    pub fn handshake(message: impl std::fmt::Display) -> Self {
        Self::Handshake {
            message: message.to_string(),
        }
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: message.to_string(),
        }
    }

    /// Whether this error ends the session (everything except a bad chunk or a cancel)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode { .. } | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
