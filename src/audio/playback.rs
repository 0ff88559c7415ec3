// Gapless playback scheduling
//
// Reply chunks arrive independently. Each one is scheduled to start where the
// previous one ends, on the playback device's clock. If playback has fallen
// behind (the cursor is in the past) the next chunk snaps to "now" instead of
// building up a backlog of stale audio.

use tracing::debug;

#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    next_start_time: f64,
}

impl PlaybackScheduler {
    /// Create a scheduler whose cursor starts at the device clock `now`
    pub fn new(now: f64) -> Self {
        Self {
            next_start_time: now,
        }
    }

    /// Reserve `duration` seconds of playback and return when the chunk starts
    ///
    /// The returned start is never before `now` and never before the end of
    /// the previously scheduled chunk.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start_at = self.next_start_time.max(now);
        if start_at > self.next_start_time {
            debug!(
                "Playback fell behind by {:.3}s, snapping to device clock",
                start_at - self.next_start_time
            );
        }
        self.next_start_time = start_at + duration.max(0.0);
        start_at
    }

    /// Device-clock time at which everything scheduled so far has played
    pub fn playback_end(&self) -> f64 {
        self.next_start_time
    }

    /// Seconds of audio still queued at `now`
    pub fn remaining(&self, now: f64) -> f64 {
        (self.next_start_time - now).max(0.0)
    }

    /// Drop the queue position, e.g. after the reply was interrupted
    pub fn reset(&mut self, now: f64) {
        self.next_start_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_to_back_chunks() {
        let t0 = 3.25;
        let mut scheduler = PlaybackScheduler::new(t0);

        let starts: Vec<f64> = (0..5).map(|_| scheduler.schedule(t0, 0.5)).collect();

        assert_eq!(starts, vec![t0, t0 + 0.5, t0 + 1.0, t0 + 1.5, t0 + 2.0]);
        assert_eq!(scheduler.playback_end(), t0 + 2.5);
    }

    #[test]
    fn test_snaps_to_now_when_behind() {
        let mut scheduler = PlaybackScheduler::new(0.0);
        assert_eq!(scheduler.schedule(0.0, 0.2), 0.0);

        // Next chunk arrives long after the first finished
        let start = scheduler.schedule(5.0, 0.2);
        assert_eq!(start, 5.0);
        assert!((scheduler.playback_end() - 5.2).abs() < 1e-12);
    }

    #[test]
    fn test_never_overlaps_or_goes_backward() {
        let mut scheduler = PlaybackScheduler::new(1.0);
        let arrivals = [1.0, 1.05, 1.1, 2.9, 2.95, 7.0, 7.0, 7.01];
        let durations = [0.3, 0.25, 0.5, 0.1, 0.4, 0.2, 0.2, 0.05];

        let mut previous_end: Option<f64> = None;
        for (&now, &duration) in arrivals.iter().zip(&durations) {
            let start = scheduler.schedule(now, duration);
            assert!(start >= now, "scheduled in the past: {} < {}", start, now);
            if let Some(end) = previous_end {
                assert!(start >= end, "overlap: {} < {}", start, end);
            }
            previous_end = Some(start + duration);
        }
    }

    #[test]
    fn test_remaining_and_reset() {
        let mut scheduler = PlaybackScheduler::new(0.0);
        scheduler.schedule(0.0, 1.0);
        scheduler.schedule(0.0, 1.0);

        assert_eq!(scheduler.remaining(0.5), 1.5);
        assert_eq!(scheduler.remaining(9.0), 0.0);

        scheduler.reset(0.5);
        assert_eq!(scheduler.remaining(0.5), 0.0);
        assert_eq!(scheduler.schedule(0.6, 0.1), 0.6);
    }
}
