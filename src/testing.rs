//! In-memory devices and transport for exercising sessions without hardware
//! or network.
//!
//! Every fake hands out a cloneable handle so a test can drive the
//! microphone, advance the speaker clock, inject server events and inspect
//! what was sent.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::{
    AudioDevices, AudioFrame, CaptureConfig, CaptureDevice, PlaybackBuffer, PlaybackDevice,
};
use crate::config::ApiKey;
use crate::error::{Result, VoiceError};
use crate::live::{Blob, LiveConnection, LiveSetup, LiveSink, LiveTransport, TransportEvent};

const POLL: Duration = Duration::from_millis(5);
const WAIT: Duration = Duration::from_secs(5);

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Poll `check` until it holds or the wait expires
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    check()
}

#[derive(Default)]
struct MicState {
    denied: Option<String>,
    opened: usize,
    stopped: usize,
    sender: Option<mpsc::Sender<AudioFrame>>,
}

/// Test side of the fake microphone
#[derive(Clone, Default)]
pub struct FakeMic {
    state: Arc<Mutex<MicState>>,
}

impl FakeMic {
    /// Deliver one frame to the running tap; false if nothing is listening
    pub fn push(&self, frame: AudioFrame) -> bool {
        let sender = lock(&self.state).sender.clone();
        sender.is_some_and(|tx| tx.try_send(frame).is_ok())
    }

    /// Deliver `samples` as one 16kHz frame
    pub fn speak(&self, samples: &[f32]) -> bool {
        self.push(AudioFrame {
            samples: samples.to_vec(),
            sample_rate: crate::audio::CAPTURE_SAMPLE_RATE,
            channels: 1,
            timestamp_ms: 0,
        })
    }

    pub fn is_capturing(&self) -> bool {
        lock(&self.state).sender.is_some()
    }

    pub fn opened(&self) -> usize {
        lock(&self.state).opened
    }

    pub fn stopped(&self) -> usize {
        lock(&self.state).stopped
    }

    pub async fn wait_capturing(&self) -> bool {
        eventually(|| self.is_capturing()).await
    }
}

struct FakeCapture {
    state: Arc<Mutex<MicState>>,
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(64);
        lock(&self.state).sender = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.sender.take().is_some() {
            state.stopped += 1;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        lock(&self.state).sender.is_some()
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

/// One buffer handed to the fake speaker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub start_at: f64,
    pub duration: f64,
}

impl Scheduled {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Default)]
struct SpeakerState {
    now: f64,
    opened: usize,
    closed: usize,
    cleared: usize,
    history: Vec<Scheduled>,
    queue: Vec<Scheduled>,
}

/// Test side of the fake speaker; its clock only moves when told to
#[derive(Clone, Default)]
pub struct FakeSpeaker {
    state: Arc<Mutex<SpeakerState>>,
}

impl FakeSpeaker {
    pub fn set_time(&self, seconds: f64) {
        lock(&self.state).now = seconds;
    }

    pub fn advance(&self, seconds: f64) {
        lock(&self.state).now += seconds;
    }

    /// Every buffer ever scheduled, in order
    pub fn scheduled(&self) -> Vec<Scheduled> {
        lock(&self.state).history.clone()
    }

    pub fn pending(&self) -> usize {
        let state = lock(&self.state);
        state.queue.iter().filter(|s| s.end() > state.now).count()
    }

    pub fn cleared(&self) -> usize {
        lock(&self.state).cleared
    }

    pub fn opened(&self) -> usize {
        lock(&self.state).opened
    }

    pub fn closed(&self) -> usize {
        lock(&self.state).closed
    }

    pub async fn wait_scheduled(&self, count: usize) -> bool {
        eventually(|| lock(&self.state).history.len() >= count).await
    }
}

struct FakePlayback {
    sample_rate: u32,
    state: Arc<Mutex<SpeakerState>>,
    closed: bool,
}

impl PlaybackDevice for FakePlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).now
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        if self.closed {
            return Err(VoiceError::device("fake speaker", "device is closed"));
        }
        let entry = Scheduled {
            start_at,
            duration: buffer.duration(),
        };
        let mut state = lock(&self.state);
        state.history.push(entry);
        state.queue.push(entry);
        Ok(())
    }

    fn pending(&self) -> usize {
        let state = lock(&self.state);
        state.queue.iter().filter(|s| s.end() > state.now).count()
    }

    fn clear(&mut self) {
        let mut state = lock(&self.state);
        state.queue.clear();
        state.cleared += 1;
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            lock(&self.state).closed += 1;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake speaker"
    }
}

/// Fake microphone and speaker
#[derive(Clone, Default)]
pub struct FakeDevices {
    mic: FakeMic,
    speaker: FakeSpeaker,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every microphone request fail as if permission was refused
    pub fn deny_microphone(self, reason: impl Into<String>) -> Self {
        lock(&self.mic.state).denied = Some(reason.into());
        self
    }

    pub fn mic(&self) -> FakeMic {
        self.mic.clone()
    }

    pub fn speaker(&self) -> FakeSpeaker {
        self.speaker.clone()
    }
}

#[async_trait]
impl AudioDevices for FakeDevices {
    async fn open_capture(&self, _config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
        let mut state = lock(&self.mic.state);
        if let Some(reason) = &state.denied {
            return Err(VoiceError::device("fake microphone", reason));
        }
        state.opened += 1;
        Ok(Box::new(FakeCapture {
            state: Arc::clone(&self.mic.state),
        }))
    }

    async fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackDevice>> {
        lock(&self.speaker.state).opened += 1;
        Ok(Box::new(FakePlayback {
            sample_rate,
            state: Arc::clone(&self.speaker.state),
            closed: false,
        }))
    }
}

/// How the fake remote side answers `open`
#[derive(Debug, Clone, Default)]
enum Handshake {
    /// Accept the setup right away
    #[default]
    Accept,
    /// Fail the connection attempt
    Reject(String),
    /// Connect but never accept the setup
    Stall,
}

#[derive(Default)]
struct TransportState {
    handshake: Handshake,
    opened: usize,
    closed: usize,
    last_setup: Option<LiveSetup>,
    last_key: Option<String>,
    sent: Vec<Blob>,
    events: Option<mpsc::Sender<TransportEvent>>,
}

/// Fake Live API endpoint
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        let transport = Self::default();
        lock(&transport.state).handshake = Handshake::Reject(reason.into());
        transport
    }

    pub fn stalling() -> Self {
        let transport = Self::default();
        lock(&transport.state).handshake = Handshake::Stall;
        transport
    }

    /// Inject an event on the most recently opened stream
    pub fn emit(&self, event: TransportEvent) -> bool {
        let sender = lock(&self.state).events.clone();
        sender.is_some_and(|tx| tx.try_send(event).is_ok())
    }

    /// Audio chunks the session sent upstream
    pub fn sent(&self) -> Vec<Blob> {
        lock(&self.state).sent.clone()
    }

    pub fn opened(&self) -> usize {
        lock(&self.state).opened
    }

    pub fn closed(&self) -> usize {
        lock(&self.state).closed
    }

    pub fn last_setup(&self) -> Option<LiveSetup> {
        lock(&self.state).last_setup.clone()
    }

    pub fn last_key(&self) -> Option<String> {
        lock(&self.state).last_key.clone()
    }

    pub async fn wait_sent(&self, count: usize) -> bool {
        eventually(|| lock(&self.state).sent.len() >= count).await
    }
}

struct FakeSink {
    state: Arc<Mutex<TransportState>>,
    closed: bool,
}

#[async_trait]
impl LiveSink for FakeSink {
    async fn send_audio(&mut self, chunk: Blob) -> Result<()> {
        if self.closed {
            return Err(VoiceError::transport("stream is closed"));
        }
        lock(&self.state).sent.push(chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            lock(&self.state).closed += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl LiveTransport for FakeTransport {
    async fn open(&self, api_key: &ApiKey, setup: &LiveSetup) -> Result<LiveConnection> {
        let mut state = lock(&self.state);
        state.last_key = Some(api_key.expose().to_string());
        state.last_setup = Some(setup.clone());

        let (tx, rx) = mpsc::channel(64);
        match &state.handshake {
            Handshake::Reject(reason) => return Err(VoiceError::handshake(reason)),
            Handshake::Accept => {
                let _ = tx.try_send(TransportEvent::Opened);
            }
            Handshake::Stall => {}
        }

        state.opened += 1;
        state.events = Some(tx);

        Ok(LiveConnection {
            sink: Box::new(FakeSink {
                state: Arc::clone(&self.state),
                closed: false,
            }),
            events: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_speaker_pending_follows_clock() {
        let devices = FakeDevices::new();
        let speaker = devices.speaker();
        let mut playback = devices.open_playback(24000).await.unwrap();

        let buffer = PlaybackBuffer {
            samples: vec![0.0; 24000],
            sample_rate: 24000,
            channels: 1,
        };
        playback.schedule(buffer, 0.0).unwrap();
        assert_eq!(speaker.pending(), 1);

        speaker.advance(1.5);
        assert_eq!(speaker.pending(), 0);
        assert_eq!(speaker.scheduled().len(), 1);
    }

    #[tokio::test]
    async fn test_denied_microphone() {
        let devices = FakeDevices::new().deny_microphone("NotAllowedError");
        let result = devices.open_capture(&CaptureConfig::default()).await;
        assert!(matches!(result, Err(VoiceError::DeviceUnavailable { .. })));
    }
}
