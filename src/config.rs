use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Zephyr";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are \"Mosaed\" (Assistant), a helpful and friendly AI assistant for \"Sufra\", a popular food delivery application in the Middle East.
Your role is to help customers find food, check their order status, and resolve issues.
Speak in a friendly, conversational tone. You can speak English or Arabic depending on the user.
Current available categories: Burgers, Pizza, Shawarma, Sushi, Desserts.
If asked about order status, ask for an order ID.
Keep responses concise and helpful.";

/// Environment variables holding the Live API key, in lookup order
pub const API_KEY_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "sufra-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    /// Samples per microphone frame
    pub buffer_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: crate::audio::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: crate::audio::PLAYBACK_SAMPLE_RATE,
            buffer_size: crate::audio::DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_prompt: String,
    pub handshake_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            handshake_timeout_secs: 15,
        }
    }
}

impl Config {
    /// Load configuration from built-in defaults, an optional file and
    /// `SUFRA_*` environment overrides (e.g. `SUFRA_LIVE__VOICE=Puck`)
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path.unwrap_or("config/sufra-voice");
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("SUFRA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", file))?;

        Ok(settings.try_deserialize()?)
    }
}

/// Live API key; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Where the session reads its key from at connect time
#[derive(Debug, Clone)]
pub enum Credentials {
    /// `API_KEY`, then `GEMINI_API_KEY`
    Environment,
    Static(ApiKey),
    Missing,
}

impl Credentials {
    pub fn resolve(&self) -> Option<ApiKey> {
        match self {
            Self::Environment => API_KEY_VARS
                .iter()
                .filter_map(|var| std::env::var(var).ok())
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
                .map(ApiKey),
            Self::Static(key) => Some(key.clone()),
            Self::Missing => None,
        }
    }
}
