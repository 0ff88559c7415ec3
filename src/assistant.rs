//! The voice assistant panel: open/close lifecycle around one session and
//! the labels shown to the shopper.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::error::Result;
use crate::session::{SessionSnapshot, SessionStats, SessionStatus, VoiceSession};

pub const TITLE: &str = "مساعد سفرة";
pub const CONNECTING: &str = "جاري الاتصال...";
pub const AI_SPEAKING: &str = "يتحدث الآن...";
pub const LISTENING: &str = "استمع إليك...";
pub const ERROR: &str = "حدث خطأ";
pub const CONNECTION_FAILED: &str = "عذراً، فشل الاتصال";
pub const RETRY: &str = "إعادة المحاولة";
pub const END_CONVERSATION: &str = "إنهاء المحادثة";
pub const START_CONVERSATION: &str = "بدء المحادثة";
pub const FOOTER: &str = "مدعوم بواسطة Gemini Live Audio";

/// Microphone level above which the user counts as speaking
pub const USER_SPEAKING_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryAction {
    pub kind: ActionKind,
    pub label: &'static str,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPanel {
    pub message: &'static str,
    pub retry_label: &'static str,
}

/// Everything the panel displays for one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantView {
    pub is_open: bool,
    pub title: &'static str,
    pub status: SessionStatus,
    pub subtitle: Option<&'static str>,
    /// Replaces the visualizer while in `Error`
    pub error: Option<ErrorPanel>,
    pub action: PrimaryAction,
    pub is_ai_speaking: bool,
    pub is_user_speaking: bool,
    pub volume: f32,
    pub footer: &'static str,
}

impl AssistantView {
    pub fn new(is_open: bool, snapshot: &SessionSnapshot) -> Self {
        let status = snapshot.status;

        let subtitle = match status {
            SessionStatus::Disconnected => None,
            SessionStatus::Connecting => Some(CONNECTING),
            SessionStatus::Connected if snapshot.is_ai_speaking => Some(AI_SPEAKING),
            SessionStatus::Connected => Some(LISTENING),
            SessionStatus::Error => Some(ERROR),
        };

        let error = (status == SessionStatus::Error).then_some(ErrorPanel {
            message: CONNECTION_FAILED,
            retry_label: RETRY,
        });

        let action = match status {
            SessionStatus::Connected => PrimaryAction {
                kind: ActionKind::End,
                label: END_CONVERSATION,
                enabled: true,
            },
            SessionStatus::Connecting => PrimaryAction {
                kind: ActionKind::Start,
                label: CONNECTING,
                enabled: false,
            },
            SessionStatus::Disconnected | SessionStatus::Error => PrimaryAction {
                kind: ActionKind::Start,
                label: START_CONVERSATION,
                enabled: true,
            },
        };

        Self {
            is_open,
            title: TITLE,
            status,
            subtitle,
            error,
            action,
            is_ai_speaking: snapshot.is_ai_speaking,
            is_user_speaking: !snapshot.is_ai_speaking
                && snapshot.volume > USER_SPEAKING_THRESHOLD,
            volume: snapshot.volume,
            footer: FOOTER,
        }
    }
}

/// One assistant panel driving one voice session
pub struct VoiceAssistant {
    session: VoiceSession,
    is_open: AtomicBool,
}

impl VoiceAssistant {
    pub fn new(session: VoiceSession) -> Self {
        Self {
            session,
            is_open: AtomicBool::new(false),
        }
    }

    /// Show the panel and connect if nothing is running
    pub async fn open(&self) -> Result<()> {
        self.is_open.store(true, Ordering::SeqCst);
        info!("Assistant opened");

        if self.session.status() == SessionStatus::Disconnected {
            self.session.connect().await?;
        }
        Ok(())
    }

    /// Hide the panel and end any session
    pub async fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
        info!("Assistant closed");

        if self.session.status() != SessionStatus::Disconnected {
            self.session.disconnect().await;
        }
    }

    /// Try again after a failure
    pub async fn retry(&self) -> Result<()> {
        info!("Assistant retrying connection");
        self.session.connect().await
    }

    /// The panel's main button: start or end the conversation
    pub async fn primary_action(&self) -> Result<()> {
        let view = self.view();
        if !view.action.enabled {
            return Ok(());
        }
        match view.action.kind {
            ActionKind::Start => self.session.connect().await,
            ActionKind::End => {
                self.session.disconnect().await;
                Ok(())
            }
        }
    }

    pub fn view(&self) -> AssistantView {
        AssistantView::new(self.is_open(), &self.session.snapshot())
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> &VoiceSession {
        &self.session
    }

    pub async fn stats(&self) -> SessionStats {
        self.session.stats().await
    }
}
