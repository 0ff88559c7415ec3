//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - The connection lifecycle (`SessionStatus` state machine)
//! - Microphone capture and upstream PCM streaming
//! - Gapless scheduling of the model's spoken reply
//! - The observable `{status, volume, is_ai_speaking}` snapshot

mod config;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use session::VoiceSession;
pub use state::{SessionEvent, SessionSnapshot, SessionStatus};
pub use stats::SessionStats;
