use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle of the voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    /// Remote stream accepted the setup
    Opened,
    /// Any fatal failure: configuration, device, handshake, transport
    Failed,
    /// Remote stream closed
    Closed,
    DisconnectRequested,
}

impl SessionStatus {
    /// The single place where status changes are decided
    pub fn apply(self, event: SessionEvent) -> SessionStatus {
        use SessionEvent::*;
        use SessionStatus::*;

        match (self, event) {
            (Disconnected | Error, ConnectRequested) => Connecting,
            (Connecting | Connected, ConnectRequested) => self,

            (Connecting, Opened) => Connected,
            (_, Opened) => self,

            (_, Failed) => Error,

            (Error, Closed) => Error,
            (_, Closed) => Disconnected,

            (_, DisconnectRequested) => Disconnected,
        }
    }

    /// A session is open or being opened
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// What the UI observes
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Visual level in [0, 1]
    pub volume: f32,
    pub is_ai_speaking: bool,
}
