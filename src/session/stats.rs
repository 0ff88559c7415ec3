use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Statistics about the current (or last) voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier, if a session was ever opened
    pub session_id: Option<String>,

    /// When the session was opened
    pub started_at: Option<DateTime<Utc>>,

    /// Microphone frames sent to the remote model
    pub frames_sent: usize,

    /// Reply chunks scheduled for playback
    pub chunks_played: usize,

    /// Reply chunks dropped because they could not be decoded
    pub chunks_dropped: usize,

    /// Seconds of reply audio scheduled so far
    pub reply_audio_secs: f64,
}

/// Counters shared between the session driver and readers
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub frames_sent: AtomicUsize,
    pub chunks_played: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    /// Microseconds, to keep the counter atomic
    pub reply_audio_us: AtomicU64,
}

impl Counters {
    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::SeqCst);
        self.chunks_played.store(0, Ordering::SeqCst);
        self.chunks_dropped.store(0, Ordering::SeqCst);
        self.reply_audio_us.store(0, Ordering::SeqCst);
    }

    pub fn add_reply_audio(&self, seconds: f64) {
        self.reply_audio_us
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::SeqCst);
    }

    pub fn snapshot(
        &self,
        session_id: Option<String>,
        started_at: Option<DateTime<Utc>>,
    ) -> SessionStats {
        SessionStats {
            session_id,
            started_at,
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            chunks_played: self.chunks_played.load(Ordering::SeqCst),
            chunks_dropped: self.chunks_dropped.load(Ordering::SeqCst),
            reply_audio_secs: self.reply_audio_us.load(Ordering::SeqCst) as f64 / 1_000_000.0,
        }
    }
}
