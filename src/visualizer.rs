//! Animated level bars driven by the session snapshot
//!
//! `render` is a pure function of the snapshot and elapsed animation time.
//! `VisualizerLoop` redraws it on a fixed tick until stopped or dropped.

use owo_colors::OwoColorize;
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::session::{SessionSnapshot, SessionStatus};

/// What the visualizer reads each frame
pub type VisualizerInput = SessionSnapshot;

pub const BAR_COUNT: usize = 5;

/// Tallest bar `render` can produce (volume level 1.0)
pub const MAX_BAR_HEIGHT: f32 = 45.0;

const MIN_BAR_HEIGHT: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarColor {
    /// AI is speaking
    Emerald,
    /// User is speaking
    Amber,
    /// Idle baseline
    Slate,
}

impl BarColor {
    pub fn hex(self) -> &'static str {
        match self {
            Self::Emerald => "#10b981",
            Self::Amber => "#f59e0b",
            Self::Slate => "#cbd5e1",
        }
    }

    fn rgb(self) -> (u8, u8, u8) {
        match self {
            Self::Emerald => (0x10, 0xb9, 0x81),
            Self::Amber => (0xf5, 0x9e, 0x0b),
            Self::Slate => (0xcb, 0xd5, 0xe1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisualizerFrame {
    /// Flat line while disconnected
    Baseline,
    Bars {
        color: BarColor,
        heights: [f32; BAR_COUNT],
    },
}

pub fn render(input: &VisualizerInput, elapsed_ms: f64) -> VisualizerFrame {
    if input.status == SessionStatus::Disconnected {
        return VisualizerFrame::Baseline;
    }

    let volume = if input.volume.is_finite() {
        input.volume.clamp(0.0, 1.0) as f64
    } else {
        0.0
    };
    let active = if input.status == SessionStatus::Connecting {
        0.3
    } else {
        volume * 2.5
    };
    let elapsed = if elapsed_ms.is_finite() { elapsed_ms } else { 0.0 };

    let mut heights = [0.0; BAR_COUNT];
    for (i, height) in heights.iter_mut().enumerate() {
        let t = elapsed / 200.0 + i as f64;
        let wave = t.sin() * 10.0 * active;
        *height = (wave.abs() + 4.0 * active * 2.0).max(MIN_BAR_HEIGHT as f64) as f32;
    }

    VisualizerFrame::Bars {
        color: if input.is_ai_speaking {
            BarColor::Emerald
        } else {
            BarColor::Amber
        },
        heights,
    }
}

/// Receives each rendered frame
pub trait FrameSink: Send + 'static {
    fn draw(&mut self, frame: &VisualizerFrame);
}

impl<F> FrameSink for F
where
    F: FnMut(&VisualizerFrame) + Send + 'static,
{
    fn draw(&mut self, frame: &VisualizerFrame) {
        self(frame)
    }
}

/// Redraw loop; cancelled by `stop()` or drop
pub struct VisualizerLoop {
    task: Option<JoinHandle<()>>,
}

impl VisualizerLoop {
    pub fn spawn(
        mut snapshots: watch::Receiver<SessionSnapshot>,
        fps: u32,
        mut sink: impl FrameSink,
    ) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                // Session handle gone
                if snapshots.has_changed().is_err() {
                    break;
                }

                let snapshot = *snapshots.borrow_and_update();
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                sink.draw(&render(&snapshot, elapsed_ms));
            }

            debug!("Visualizer loop finished");
        });

        Self { task: Some(task) }
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for VisualizerLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Draws frames as one coloured line on stderr
#[derive(Debug, Default)]
pub struct TerminalBars;

impl TerminalBars {
    pub fn line(frame: &VisualizerFrame) -> String {
        match frame {
            VisualizerFrame::Baseline => {
                let (r, g, b) = BarColor::Slate.rgb();
                "─".repeat(BAR_COUNT * 2).truecolor(r, g, b).to_string()
            }
            VisualizerFrame::Bars { color, heights } => {
                let (r, g, b) = color.rgb();
                let bars: String = heights
                    .iter()
                    .flat_map(|&h| [block(h), ' '])
                    .collect();
                bars.truecolor(r, g, b).to_string()
            }
        }
    }
}

fn block(height: f32) -> char {
    let ratio = (height / MAX_BAR_HEIGHT).clamp(0.0, 1.0);
    let index = (ratio * (BLOCKS.len() - 1) as f32).round() as usize;
    BLOCKS[index.min(BLOCKS.len() - 1)]
}

impl FrameSink for TerminalBars {
    fn draw(&mut self, frame: &VisualizerFrame) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}  ", Self::line(frame));
        let _ = stderr.flush();
    }
}
