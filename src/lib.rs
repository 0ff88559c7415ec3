pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;
pub mod testing;
pub mod visualizer;

pub use assistant::{AssistantView, VoiceAssistant};
pub use audio::{
    AudioDevices, AudioDevicesFactory, AudioFile, AudioFrame, AudioSource, CaptureConfig,
    PlaybackScheduler,
};
pub use config::{ApiKey, Config, Credentials};
pub use error::{Result, VoiceError};
pub use http::{create_router, AppState};
pub use live::{LiveSetup, LiveTransport, WebSocketTransport};
pub use session::{SessionConfig, SessionSnapshot, SessionStats, SessionStatus, VoiceSession};
pub use visualizer::{TerminalBars, VisualizerLoop};
