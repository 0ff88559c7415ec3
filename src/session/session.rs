use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::state::{SessionEvent, SessionSnapshot, SessionStatus};
use super::stats::{Counters, SessionStats};
use crate::audio::codec;
use crate::audio::{AudioDevices, AudioFrame, CaptureDevice, PlaybackDevice, PlaybackScheduler};
use crate::config::{ApiKey, Credentials};
use crate::error::{Result, VoiceError};
use crate::live::{Blob, LiveConnection, LiveSink, LiveTransport, ServerMessage, TransportEvent};

/// Poll interval while the speaker lags behind the wall clock
const MIN_SPEAKING_RECHECK: Duration = Duration::from_millis(10);

/// Realtime voice session: microphone -> Live API -> speaker
///
/// At most one stream is open at a time. All device and stream handles are
/// owned by a single driver task; this handle only starts it, signals it to
/// stop, and exposes the observable snapshot.
pub struct VoiceSession {
    config: SessionConfig,
    credentials: Credentials,
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn LiveTransport>,
    signals: Arc<watch::Sender<SessionSnapshot>>,
    counters: Arc<Counters>,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        credentials: Credentials,
        devices: Arc<dyn AudioDevices>,
        transport: Arc<dyn LiveTransport>,
    ) -> Self {
        let (signals, _) = watch::channel(SessionSnapshot::default());

        Self {
            config,
            credentials,
            devices,
            transport,
            signals: Arc::new(signals),
            counters: Arc::new(Counters::default()),
            active: Mutex::new(None),
        }
    }

    /// Open the stream and start talking
    ///
    /// Resolves once the session is connected, has failed, or was cancelled
    /// by `disconnect()`. Ignored while a session is already connecting or
    /// connected. Failures are also reflected as `SessionStatus::Error`.
    pub async fn connect(&self) -> Result<()> {
        let mut active = self.active.lock().await;

        if let Some(session) = active.as_ref() {
            if self.status().is_active() && !session.task.is_finished() {
                warn!(
                    "connect() ignored: session {} is already {}",
                    session.id,
                    self.status()
                );
                return Ok(());
            }
        }

        // Reap a session that ended on its own (remote close or error);
        // its driver has already published the final status
        if let Some(finished) = active.take() {
            if let Err(e) = finished.task.await {
                error!("Session task panicked: {}", e);
            }
        }

        let api_key = match self.credentials.resolve() {
            Some(key) => key,
            None => {
                error!("Live API key not found; set API_KEY");
                transition(&self.signals, SessionEvent::Failed);
                return Err(VoiceError::Configuration {
                    message: "API key not found (API_KEY)".to_string(),
                });
            }
        };

        transition(&self.signals, SessionEvent::ConnectRequested);
        self.counters.reset();

        let id = Uuid::new_v4();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        info!("Opening voice session {}", id);

        let driver = Driver {
            id,
            config: self.config.clone(),
            api_key,
            devices: Arc::clone(&self.devices),
            transport: Arc::clone(&self.transport),
            signals: Arc::clone(&self.signals),
            counters: Arc::clone(&self.counters),
            shutdown: shutdown_rx,
            playback: None,
            capture: None,
            sink: None,
            scheduler: PlaybackScheduler::new(0.0),
            speaking_until: None,
        };
        let task = tokio::spawn(driver.run(ready_tx));

        *active = Some(ActiveSession {
            id,
            started_at: Utc::now(),
            shutdown: shutdown_tx,
            task,
        });
        drop(active);

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(VoiceError::Cancelled),
        }
    }

    /// Close everything and return to `Disconnected`
    ///
    /// Safe in every state, including mid-handshake and when already
    /// disconnected.
    pub async fn disconnect(&self) {
        let session = self.active.lock().await.take();

        if let Some(session) = session {
            info!("Disconnecting voice session {}", session.id);
            let _ = session.shutdown.send(true);
            if let Err(e) = session.task.await {
                error!("Session task panicked: {}", e);
            }
        }

        transition(&self.signals, SessionEvent::DisconnectRequested);
    }

    pub fn status(&self) -> SessionStatus {
        self.signals.borrow().status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.signals.borrow()
    }

    /// Watch `{status, volume, is_ai_speaking}` for changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.signals.subscribe()
    }

    pub async fn session_id(&self) -> Option<Uuid> {
        self.active.lock().await.as_ref().map(|s| s.id)
    }

    pub async fn stats(&self) -> SessionStats {
        let active = self.active.lock().await;
        let (id, started_at) = match active.as_ref() {
            Some(s) => (Some(s.id.to_string()), Some(s.started_at)),
            None => (None, None),
        };
        self.counters.snapshot(id, started_at)
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        // The driver tears itself down once it sees the signal
        if let Some(session) = self.active.get_mut().take() {
            let _ = session.shutdown.send(true);
        }
    }
}

/// Apply an event to the published status
fn transition(signals: &watch::Sender<SessionSnapshot>, event: SessionEvent) -> SessionStatus {
    let mut next = SessionStatus::Disconnected;
    signals.send_modify(|snapshot| {
        let from = snapshot.status;
        snapshot.status = from.apply(event);
        if snapshot.status != SessionStatus::Connected {
            snapshot.volume = 0.0;
            snapshot.is_ai_speaking = false;
        }
        if from != snapshot.status {
            info!("Voice session status: {} -> {}", from, snapshot.status);
        }
        next = snapshot.status;
    });
    next
}

/// Wait until `disconnect()` (or drop) asks the driver to stop
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means stop
    let _ = shutdown.wait_for(|&stop| stop).await;
}

/// Run one acquisition step unless a shutdown arrives first
async fn until_shutdown<T>(
    shutdown: &mut watch::Receiver<bool>,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    if *shutdown.borrow() {
        return Err(VoiceError::Cancelled);
    }
    tokio::select! {
        result = work => result,
        _ = shutdown_requested(shutdown) => Err(VoiceError::Cancelled),
    }
}

/// Wait for the remote side to accept the setup
async fn wait_for_open(
    events: &mut mpsc::Receiver<TransportEvent>,
    deadline: Instant,
) -> Result<()> {
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) => return Err(VoiceError::handshake("timed out waiting for setup")),
            Ok(None) => return Err(VoiceError::handshake("stream ended during setup")),
            Ok(Some(TransportEvent::Opened)) => return Ok(()),
            Ok(Some(TransportEvent::Closed { reason })) => {
                return Err(VoiceError::handshake(format!(
                    "closed during setup ({})",
                    reason.unwrap_or_else(|| "no reason".to_string())
                )))
            }
            Ok(Some(TransportEvent::Error(e))) => return Err(VoiceError::handshake(e)),
            Ok(Some(TransportEvent::Message(_))) => {
                debug!("Ignoring message received before setup completed")
            }
        }
    }
}

enum Outcome {
    Shutdown,
    Closed(Option<String>),
    Failed(VoiceError),
}

/// Owns every resource of one session; the only writer of the cursor
struct Driver {
    id: Uuid,
    config: SessionConfig,
    api_key: ApiKey,
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn LiveTransport>,
    signals: Arc<watch::Sender<SessionSnapshot>>,
    counters: Arc<Counters>,
    shutdown: watch::Receiver<bool>,

    playback: Option<Box<dyn PlaybackDevice>>,
    capture: Option<Box<dyn CaptureDevice>>,
    sink: Option<Box<dyn LiveSink>>,
    scheduler: PlaybackScheduler,
    /// Wall-clock moment the last scheduled reply chunk finishes
    speaking_until: Option<Instant>,
}

impl Driver {
    async fn run(mut self, ready: oneshot::Sender<Result<()>>) {
        let (frames, events) = match self.establish().await {
            Ok(streams) => streams,
            Err(e) => {
                self.teardown().await;
                if e.is_fatal() {
                    error!("Voice session {} failed to connect: {}", self.id, e);
                    transition(&self.signals, SessionEvent::Failed);
                } else {
                    info!("Voice session {} cancelled while connecting", self.id);
                }
                let _ = ready.send(Err(e));
                return;
            }
        };

        transition(&self.signals, SessionEvent::Opened);
        let _ = ready.send(Ok(()));

        let outcome = self.pump(frames, events).await;
        self.teardown().await;

        match outcome {
            // disconnect() publishes the final status
            Outcome::Shutdown => info!("Voice session {} stopped", self.id),
            Outcome::Closed(reason) => {
                info!(
                    "Live API closed voice session {} ({})",
                    self.id,
                    reason.as_deref().unwrap_or("no reason")
                );
                transition(&self.signals, SessionEvent::Closed);
            }
            Outcome::Failed(e) => {
                error!("Voice session {} failed: {}", self.id, e);
                transition(&self.signals, SessionEvent::Failed);
            }
        }
    }

    /// Acquire playback, microphone and stream; start the tap once open
    async fn establish(
        &mut self,
    ) -> Result<(mpsc::Receiver<AudioFrame>, mpsc::Receiver<TransportEvent>)> {
        let mut shutdown = self.shutdown.clone();

        let playback = until_shutdown(
            &mut shutdown,
            self.devices.open_playback(self.config.playback_sample_rate),
        )
        .await?;
        self.scheduler = PlaybackScheduler::new(playback.current_time());
        info!("Playback device opened: {}", playback.name());
        self.playback = Some(playback);

        let capture =
            until_shutdown(&mut shutdown, self.devices.open_capture(&self.config.capture)).await?;
        info!("Microphone acquired: {}", capture.name());
        self.capture = Some(capture);

        let deadline = Instant::now() + self.config.handshake_timeout;
        let transport = Arc::clone(&self.transport);
        let api_key = self.api_key.clone();
        let setup = self.config.setup.clone();
        let open = async move {
            tokio::time::timeout_at(deadline, transport.open(&api_key, &setup))
                .await
                .map_err(|_| VoiceError::handshake("timed out connecting"))?
        };
        let LiveConnection { sink, mut events } = until_shutdown(&mut shutdown, open).await?;
        self.sink = Some(sink);

        until_shutdown(&mut shutdown, wait_for_open(&mut events, deadline)).await?;

        let frames = match self.capture.as_mut() {
            Some(capture) => until_shutdown(&mut shutdown, capture.start()).await?,
            None => return Err(VoiceError::device("microphone", "released during setup")),
        };

        Ok((frames, events))
    }

    async fn pump(
        &mut self,
        mut frames: mpsc::Receiver<AudioFrame>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> Outcome {
        let mut shutdown = self.shutdown.clone();
        let mut capture_open = true;

        loop {
            let speaking_until = self.speaking_until;

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return Outcome::Shutdown,

                event = events.recv() => match event {
                    Some(TransportEvent::Message(msg)) => self.on_message(msg),
                    Some(TransportEvent::Opened) => debug!("Duplicate open event ignored"),
                    Some(TransportEvent::Closed { reason }) => return Outcome::Closed(reason),
                    Some(TransportEvent::Error(e)) => {
                        return Outcome::Failed(VoiceError::transport(e))
                    }
                    None => return Outcome::Closed(None),
                },

                frame = frames.recv(), if capture_open => match frame {
                    Some(frame) => {
                        if let Err(e) = self.on_frame(frame).await {
                            return Outcome::Failed(e);
                        }
                    }
                    None => {
                        info!("Microphone stream ended");
                        capture_open = false;
                    }
                },

                _ = tokio::time::sleep_until(speaking_until.unwrap_or_else(Instant::now)),
                    if speaking_until.is_some() =>
                {
                    self.on_speaking_deadline();
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: AudioFrame) -> Result<()> {
        // Reply playback owns the volume signal while it lasts
        let ai_speaking = self.signals.borrow().is_ai_speaking;
        if !ai_speaking {
            let level = codec::level(&frame.samples);
            self.signals.send_if_modified(|s| {
                if s.volume != level {
                    s.volume = level;
                    true
                } else {
                    false
                }
            });
        }

        let chunk = Blob {
            mime_type: codec::mime_type(frame.sample_rate),
            data: codec::text_encode(&codec::encode(&frame.samples)),
        };

        match self.sink.as_mut() {
            Some(sink) => sink.send_audio(chunk).await?,
            None => return Err(VoiceError::transport("stream is not open")),
        }

        self.counters.frames_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_message(&mut self, msg: ServerMessage) {
        if msg.interrupted() {
            self.interrupt();
        }

        for chunk in msg.audio_chunks() {
            self.play_chunk(chunk);
        }

        if msg.turn_complete() {
            debug!("Model turn complete");
            self.speaking_until = None;
            self.set_speaking(false);
        }

        if msg.go_away.is_some() {
            warn!("Live API announced the stream will close soon");
        }
    }

    /// Decode one reply chunk and queue it right after the previous one
    fn play_chunk(&mut self, chunk: &Blob) {
        let buffer = match codec::text_decode(&chunk.data)
            .and_then(|bytes| codec::decode(&bytes, self.config.playback_sample_rate))
        {
            Ok(buffer) => buffer,
            Err(e) => {
                // One corrupt chunk does not end the conversation
                warn!("Dropping reply chunk: {}", e);
                self.counters.chunks_dropped.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let Some(playback) = self.playback.as_mut() else {
            return;
        };

        let duration = buffer.duration();
        let level = codec::level(&buffer.samples);
        let now = playback.current_time();
        let start_at = self.scheduler.schedule(now, duration);

        if let Err(e) = playback.schedule(buffer, start_at) {
            warn!("Failed to schedule reply chunk: {}", e);
            self.counters.chunks_dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        self.counters.chunks_played.fetch_add(1, Ordering::SeqCst);
        self.counters.add_reply_audio(duration);

        let remaining = self.scheduler.remaining(now);
        self.speaking_until = Some(Instant::now() + Duration::from_secs_f64(remaining));
        self.signals.send_modify(|s| {
            s.is_ai_speaking = true;
            s.volume = level;
        });

        debug!(
            "Scheduled {:.3}s reply chunk at {:.3} (device clock {:.3})",
            duration, start_at, now
        );
    }

    /// The wall-clock deadline is only an estimate of the device clock;
    /// keep the flag until the speaker has actually rendered the queue
    fn on_speaking_deadline(&mut self) {
        let remaining = self
            .playback
            .as_ref()
            .map(|playback| self.scheduler.remaining(playback.current_time()))
            .unwrap_or(0.0);

        if remaining > 0.0 {
            let recheck = Duration::from_secs_f64(remaining).max(MIN_SPEAKING_RECHECK);
            self.speaking_until = Some(Instant::now() + recheck);
            return;
        }

        self.speaking_until = None;
        self.set_speaking(false);
    }

    /// The user talked over the reply: drop what is still queued
    fn interrupt(&mut self) {
        if let Some(playback) = self.playback.as_mut() {
            playback.clear();
            self.scheduler.reset(playback.current_time());
        }
        self.speaking_until = None;
        self.set_speaking(false);
        info!("Reply interrupted");
    }

    fn set_speaking(&self, speaking: bool) {
        self.signals.send_if_modified(|s| {
            if s.is_ai_speaking != speaking {
                s.is_ai_speaking = speaking;
                if !speaking {
                    s.volume = 0.0;
                }
                true
            } else {
                false
            }
        });
    }

    /// Release everything acquired so far; safe to call repeatedly
    async fn teardown(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                warn!("Failed to close Live API stream: {}", e);
            }
        }

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop().await {
                warn!("Failed to stop microphone {}: {}", capture.name(), e);
            }
        }

        if let Some(mut playback) = self.playback.take() {
            playback.clear();
            if let Err(e) = playback.close() {
                warn!("Failed to close playback device {}: {}", playback.name(), e);
            }
        }

        self.scheduler.reset(0.0);
        self.speaking_until = None;
        self.signals.send_modify(|s| {
            s.volume = 0.0;
            s.is_ai_speaking = false;
        });

        debug!("Voice session {} resources released", self.id);
    }
}
