// System microphone and speaker via CPAL
//
// Capture asks for f32/16kHz/mono and falls back to i16. The data callback
// only copies samples and hands complete frames to the session with
// `try_send`, so it never blocks the audio thread.
//
// Playback keeps its own clock: the number of samples the output callback
// has rendered. Scheduled buffers are mixed in when the clock reaches them.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioDevices, AudioFrame, CaptureConfig, CaptureDevice, PlaybackDevice};
use super::codec::PlaybackBuffer;
use crate::error::{Result, VoiceError};

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only created, paused and dropped by the owning
/// device, which the session driver task owns exclusively.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Default system input/output devices
pub struct SystemDevices;

impl SystemDevices {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioDevices for SystemDevices {
    async fn open_capture(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(CpalCapture::new(config.clone())?))
    }

    async fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackDevice>> {
        Ok(Box::new(CpalPlayback::new(sample_rate)?))
    }
}

pub struct CpalCapture {
    device: cpal::Device,
    name: String,
    config: CaptureConfig,
    stream: Option<SendableStream>,
}

impl CpalCapture {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| VoiceError::device("default microphone", "no input device found"))?;
        let name = device.name().unwrap_or_else(|_| "microphone".to_string());

        info!("Microphone selected: {}", name);

        Ok(Self {
            device,
            name,
            config,
            stream: None,
        })
    }

    fn build_stream(&self, tx: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream> {
        let stream_config = cpal::StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            error!("Microphone stream error: {}", err);
        };

        let framer = Arc::new(Mutex::new(Framer::new(self.config.clone(), tx)));

        let f32_framer = Arc::clone(&framer);
        if let Ok(stream) = self.device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut framer) = f32_framer.lock() {
                    framer.push(data.iter().copied());
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let i16_framer = Arc::clone(&framer);
        self.device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut framer) = i16_framer.lock() {
                        framer.push(data.iter().map(|&s| s as f32 / 32768.0));
                    }
                },
                err_callback,
                None,
            )
            .map_err(|e| VoiceError::device(&self.name, e))
    }
}

/// Accumulates callback samples into fixed-size frames
struct Framer {
    config: CaptureConfig,
    buffer: Vec<f32>,
    timestamp_ms: u64,
    tx: mpsc::Sender<AudioFrame>,
}

impl Framer {
    fn new(config: CaptureConfig, tx: mpsc::Sender<AudioFrame>) -> Self {
        Self {
            buffer: Vec::with_capacity(config.buffer_size),
            config,
            timestamp_ms: 0,
            tx,
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = f32>) {
        for sample in samples {
            self.buffer.push(sample);
            if self.buffer.len() >= self.config.buffer_size {
                let frame = AudioFrame {
                    samples: std::mem::replace(
                        &mut self.buffer,
                        Vec::with_capacity(self.config.buffer_size),
                    ),
                    sample_rate: self.config.sample_rate,
                    channels: self.config.channels,
                    timestamp_ms: self.timestamp_ms,
                };
                self.timestamp_ms += frame.duration_ms();
                if self.tx.try_send(frame).is_err() {
                    warn!("Session is not keeping up, dropping microphone frame");
                }
            }
        }
    }
}

#[async_trait]
impl CaptureDevice for CpalCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.stream.is_some() {
            return Err(VoiceError::device(&self.name, "already capturing"));
        }

        let (tx, rx) = mpsc::channel(32);
        let stream = self.build_stream(tx)?;
        stream
            .play()
            .map_err(|e| VoiceError::device(&self.name, e))?;
        self.stream = Some(SendableStream(stream));

        info!("Microphone capture started ({}Hz)", self.config.sample_rate);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.0.pause() {
                warn!("Failed to pause microphone stream: {}", e);
            }
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct OutputState {
    /// Samples rendered so far; the device clock
    position: u64,
    /// (start sample, samples) in start order
    queue: VecDeque<(u64, Vec<f32>)>,
}

impl OutputState {
    fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let start = self.position;
        let end = start + out.len() as u64;

        for (at, samples) in &self.queue {
            let item_end = at + samples.len() as u64;
            if *at >= end || item_end <= start {
                continue;
            }
            let from = start.max(*at);
            let to = end.min(item_end);
            for pos in from..to {
                out[(pos - start) as usize] += samples[(pos - at) as usize];
            }
        }

        self.position = end;
        while let Some((at, samples)) = self.queue.front() {
            if at + samples.len() as u64 <= self.position {
                self.queue.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct CpalPlayback {
    sample_rate: u32,
    state: Arc<Mutex<OutputState>>,
    stream: Option<SendableStream>,
}

impl CpalPlayback {
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::device("default speaker", "no output device found"))?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let state = Arc::new(Mutex::new(OutputState::default()));
        let callback_state = Arc::clone(&state);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if let Ok(mut state) = callback_state.lock() {
                        state.render(data);
                    }
                },
                |err| error!("Speaker stream error: {}", err),
                None,
            )
            .map_err(|e| VoiceError::device("default speaker", e))?;
        stream
            .play()
            .map_err(|e| VoiceError::device("default speaker", e))?;

        info!("Speaker opened at {}Hz", sample_rate);

        Ok(Self {
            sample_rate,
            state,
            stream: Some(SendableStream(stream)),
        })
    }
}

impl PlaybackDevice for CpalPlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        let position = self.state.lock().map(|s| s.position).unwrap_or(0);
        position as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        if self.stream.is_none() {
            return Err(VoiceError::device("default speaker", "device is closed"));
        }
        let at = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        let mut state = self
            .state
            .lock()
            .map_err(|_| VoiceError::device("default speaker", "playback state poisoned"))?;
        state.queue.push_back((at, buffer.samples));
        Ok(())
    }

    fn pending(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    fn clear(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.clear();
        }
    }

    fn close(&mut self) -> Result<()> {
        self.clear();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.0.pause() {
                warn!("Failed to pause speaker stream: {}", e);
            }
            info!("Speaker closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "default speaker"
    }
}
