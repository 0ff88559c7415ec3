use crate::assistant::VoiceAssistant;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one assistant this instance serves
    pub assistant: Arc<VoiceAssistant>,
}

impl AppState {
    pub fn new(assistant: VoiceAssistant) -> Self {
        Self {
            assistant: Arc::new(assistant),
        }
    }
}
