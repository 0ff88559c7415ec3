use async_trait::async_trait;
use tokio::sync::mpsc;

use super::messages::{
    Blob, ClientMessage, Content, GenerationConfig, Modality, PrebuiltVoiceConfig, ServerMessage,
    Setup, SpeechConfig, VoiceConfig,
};
use crate::config::{ApiKey, LiveConfig};
use crate::error::Result;

/// What the session asks for when it opens a stream
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub voice: String,
    pub system_prompt: String,
    pub response_modality: Modality,
}

impl LiveSetup {
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::Setup(Setup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![self.response_modality],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content::text(self.system_prompt.clone()),
        })
    }
}

impl From<&LiveConfig> for LiveSetup {
    fn from(config: &LiveConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_prompt: config.system_prompt.clone(),
            response_modality: Modality::Audio,
        }
    }
}

impl Default for LiveSetup {
    fn default() -> Self {
        Self::from(&LiveConfig::default())
    }
}

/// Events delivered by an open stream, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The remote side accepted the setup
    Opened,
    Message(ServerMessage),
    /// The remote side closed the stream
    Closed { reason: Option<String> },
    Error(String),
}

/// Sending half of an open stream
#[async_trait]
pub trait LiveSink: Send {
    async fn send_audio(&mut self, chunk: Blob) -> Result<()>;

    /// Close the stream; must be safe to call repeatedly
    async fn close(&mut self) -> Result<()>;
}

pub struct LiveConnection {
    pub sink: Box<dyn LiveSink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens bidirectional audio streams to the remote model
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Connect and send the setup; `Opened` arrives on `events` once the
    /// remote side accepts it
    async fn open(&self, api_key: &ApiKey, setup: &LiveSetup) -> Result<LiveConnection>;
}
