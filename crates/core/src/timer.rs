//! Frame timer.

use std::time::{Duration, Instant};

/// Measures total run time, per-frame delta and a rolling frame rate.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
    window_start: Instant,
    window_frames: u32,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Total time since the timer was created or reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Total time in seconds. Drives time-based update behaviors.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Marks the end of a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        self.window_frames += 1;
        delta
    }

    /// Number of completed ticks.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Returns the average frame rate once at least `interval` has passed
    /// since the last report, then starts a new measuring window.
    pub fn fps_report(&mut self, interval: Duration) -> Option<f32> {
        let span = self.last_tick.saturating_duration_since(self.window_start);
        if span < interval || self.window_frames == 0 {
            return None;
        }

        let fps = self.window_frames as f32 / span.as_secs_f32();
        self.window_start = self.last_tick;
        self.window_frames = 0;
        Some(fps)
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = Timer::new();
        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_fps_report_waits_for_interval() {
        let mut timer = Timer::new();
        timer.tick();
        assert!(timer.fps_report(Duration::from_secs(3600)).is_none());
    }

    #[test]
    fn test_fps_report_resets_window() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        timer.tick();
        let fps = timer.fps_report(Duration::ZERO);
        assert!(fps.is_some_and(|f| f > 0.0));
        // Nothing ticked since the last report.
        assert!(timer.fps_report(Duration::ZERO).is_none());
    }

    #[test]
    fn test_reset_clears_frames() {
        let mut timer = Timer::new();
        timer.tick();
        timer.reset();
        assert_eq!(timer.frame_count(), 0);
    }
}
