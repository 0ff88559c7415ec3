// WAV file devices
//
// `WavCapture` replays a WAV file as if it were the microphone, paced at real
// time. `WavPlayback` stands in for a speaker: it keeps a wall-clock device
// clock and renders scheduled reply audio into a WAV file on close.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioDevices, AudioFrame, CaptureConfig, CaptureDevice, PlaybackDevice};
use super::codec::PlaybackBuffer;
use crate::error::VoiceError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let mono = mix_to_mono(&self.samples, self.channels);
        resample_nearest(&mono, self.sample_rate, target_rate)
    }
}

/// Average interleaved channels into one
fn mix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Nearest-neighbour resampling, good enough for speech prompts
fn resample_nearest(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || source_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * target_rate as u64 / source_rate as u64) as usize;
    (0..out_len)
        .map(|i| {
            let src = (i as u64 * source_rate as u64 / target_rate as u64) as usize;
            samples[src.min(samples.len() - 1)]
        })
        .collect()
}

/// Device access backed by WAV files
pub struct WavFileDevices {
    input: PathBuf,
    output: Option<PathBuf>,
}

impl WavFileDevices {
    pub fn new(input: impl Into<PathBuf>, output: Option<impl Into<PathBuf>>) -> Self {
        Self {
            input: input.into(),
            output: output.map(Into::into),
        }
    }
}

#[async_trait]
impl AudioDevices for WavFileDevices {
    async fn open_capture(
        &self,
        config: &CaptureConfig,
    ) -> crate::error::Result<Box<dyn CaptureDevice>> {
        let capture = WavCapture::open(&self.input, config.clone())
            .map_err(|e| VoiceError::device(self.input.display().to_string(), format!("{:#}", e)))?;
        Ok(Box::new(capture))
    }

    async fn open_playback(
        &self,
        sample_rate: u32,
    ) -> crate::error::Result<Box<dyn PlaybackDevice>> {
        Ok(Box::new(WavPlayback::new(sample_rate, self.output.clone())))
    }
}

/// Replays a WAV file in `buffer_size` frames at real-time pace
pub struct WavCapture {
    name: String,
    config: CaptureConfig,
    samples: Vec<f32>,
    task: Option<JoinHandle<()>>,
}

impl WavCapture {
    pub fn open(path: impl AsRef<Path>, config: CaptureConfig) -> Result<Self> {
        let file = AudioFile::open(path.as_ref())?;
        let samples = file.to_mono(config.sample_rate);

        Ok(Self {
            name: format!("WAV file {}", file.path),
            config,
            samples,
            task: None,
        })
    }
}

#[async_trait]
impl CaptureDevice for WavCapture {
    async fn start(&mut self) -> crate::error::Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            return Err(VoiceError::device(&self.name, "already capturing"));
        }

        let (tx, rx) = mpsc::channel(32);
        let samples = self.samples.clone();
        let config = self.config.clone();
        let buffer_size = config.buffer_size.max(1);
        let period = Duration::from_secs_f64(buffer_size as f64 / config.sample_rate.max(1) as f64);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut timestamp_ms = 0u64;

            for chunk in samples.chunks(buffer_size) {
                ticker.tick().await;

                let mut frame_samples = chunk.to_vec();
                frame_samples.resize(buffer_size, 0.0);
                let frame = AudioFrame {
                    samples: frame_samples,
                    sample_rate: config.sample_rate,
                    channels: 1,
                    timestamp_ms,
                };
                timestamp_ms += frame.duration_ms();

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            debug!("WAV capture reached end of file");
        });

        self.task = Some(task);
        info!("{} capture started ({} samples)", self.name, self.samples.len());

        Ok(rx)
    }

    async fn stop(&mut self) -> crate::error::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("{} capture stopped", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Speaker stand-in that renders scheduled audio into a WAV file
pub struct WavPlayback {
    sample_rate: u32,
    output: Option<PathBuf>,
    started: Instant,
    timeline: Vec<f32>,
    scheduled_ends: Vec<f64>,
    closed: bool,
}

impl WavPlayback {
    pub fn new(sample_rate: u32, output: Option<PathBuf>) -> Self {
        Self {
            sample_rate,
            output,
            started: Instant::now(),
            timeline: Vec::new(),
            scheduled_ends: Vec::new(),
            closed: false,
        }
    }

    fn offset(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate as f64).round() as usize
    }

    fn write_output(&self, path: &Path) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;
        for &sample in &self.timeline {
            writer
                .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV file")?;

        info!(
            "Wrote {:.1}s of reply audio to {}",
            self.timeline.len() as f64 / self.sample_rate as f64,
            path.display()
        );
        Ok(())
    }
}

impl PlaybackDevice for WavPlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> crate::error::Result<()> {
        if self.closed {
            return Err(VoiceError::device("WAV playback", "device is closed"));
        }

        let start = self.offset(start_at);
        let end = start + buffer.samples.len();
        if self.timeline.len() < end {
            self.timeline.resize(end, 0.0);
        }
        for (slot, sample) in self.timeline[start..end].iter_mut().zip(&buffer.samples) {
            *slot += sample;
        }

        self.scheduled_ends.push(start_at + buffer.duration());
        Ok(())
    }

    fn pending(&self) -> usize {
        let now = self.current_time();
        self.scheduled_ends.iter().filter(|&&end| end > now).count()
    }

    fn clear(&mut self) {
        let now = self.current_time();
        let cut = self.offset(now);
        if self.timeline.len() > cut {
            self.timeline.truncate(cut);
        }
        self.scheduled_ends.clear();
    }

    fn close(&mut self) -> crate::error::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(path) = self.output.take() {
            if let Err(e) = self.write_output(&path) {
                warn!("Failed to save reply audio: {:#}", e);
                return Err(VoiceError::device("WAV playback", format!("{:#}", e)));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "WAV playback"
    }
}
