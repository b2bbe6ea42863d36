//! Rolling frame statistics for the scene pipeline

use std::collections::VecDeque;

use serde::Serialize;

pub const SAMPLE_COUNT: usize = 60;

/// Snapshot handed to hosts and overlays
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PerformanceMetrics {
    /// Time since the previous frame.
    pub frame_time_ms: f64,
    pub frame_rate: f64,
    pub average_frame_time_ms: f64,
    pub average_frame_rate: f64,
    pub min_frame_time_ms: f64,
    pub max_frame_time_ms: f64,
    /// Frames whose instantaneous rate fell below the target.
    pub dropped_frames: u64,
    pub total_frames: u64,
}

#[derive(Debug, Clone)]
pub struct FrameMetrics {
    frame_times: VecDeque<f64>,
    capacity: usize,
    target_frame_rate: f64,
    last_time: Option<f64>,
    current: PerformanceMetrics,
}

impl FrameMetrics {
    pub fn new(target_frame_rate: f64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frame_times: VecDeque::with_capacity(capacity),
            capacity,
            target_frame_rate,
            last_time: None,
            current: PerformanceMetrics {
                min_frame_time_ms: f64::MAX,
                ..PerformanceMetrics::default()
            },
        }
    }

    /// Record a frame at `time` (ms) and return the time since the previous
    /// one. The first frame only sets the baseline.
    pub fn record(&mut self, time: f64) -> Option<f64> {
        self.current.total_frames += 1;
        let last = self.last_time.replace(time)?;
        let frame_time = time - last;
        if frame_time <= 0.0 {
            return None;
        }

        self.frame_times.push_back(frame_time);
        if self.frame_times.len() > self.capacity {
            self.frame_times.pop_front();
        }

        let average = self.frame_times.iter().sum::<f64>() / self.frame_times.len() as f64;
        let rate = 1000.0 / frame_time;

        let m = &mut self.current;
        m.frame_time_ms = frame_time;
        m.frame_rate = rate;
        m.average_frame_time_ms = average;
        m.average_frame_rate = 1000.0 / average;
        m.min_frame_time_ms = m.min_frame_time_ms.min(frame_time);
        m.max_frame_time_ms = m.max_frame_time_ms.max(frame_time);
        if rate < self.target_frame_rate {
            m.dropped_frames += 1;
        }
        Some(frame_time)
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        let mut m = self.current;
        if self.frame_times.is_empty() {
            m.min_frame_time_ms = 0.0;
        }
        m
    }

    pub fn sample_count(&self) -> usize {
        self.frame_times.len()
    }

    /// Forget the previous frame time so the next frame is a new baseline.
    /// Collected samples and counters are kept.
    pub fn rebase(&mut self) {
        self.last_time = None;
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.target_frame_rate, self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_is_baseline() {
        let mut metrics = FrameMetrics::new(90.0, SAMPLE_COUNT);
        assert_eq!(metrics.record(100.0), None);
        let m = metrics.snapshot();
        assert_eq!(m.total_frames, 1);
        assert_eq!(m.frame_time_ms, 0.0);
        assert_eq!(m.min_frame_time_ms, 0.0);
        assert_eq!(metrics.sample_count(), 0);
    }

    #[test]
    fn test_dropped_frames_below_target() {
        let mut metrics = FrameMetrics::new(90.0, SAMPLE_COUNT);
        metrics.record(0.0);
        metrics.record(10.0); // 100 Hz
        metrics.record(30.0); // 50 Hz
        let m = metrics.snapshot();
        assert_eq!(m.dropped_frames, 1);
        assert_eq!(m.frame_time_ms, 20.0);
        assert_eq!(m.min_frame_time_ms, 10.0);
        assert_eq!(m.max_frame_time_ms, 20.0);
        assert!((m.average_frame_time_ms - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut metrics = FrameMetrics::new(90.0, SAMPLE_COUNT);
        for i in 0..200 {
            metrics.record(i as f64 * 10.0);
        }
        assert_eq!(metrics.sample_count(), SAMPLE_COUNT);
        assert_eq!(metrics.snapshot().total_frames, 200);
        assert!((metrics.snapshot().average_frame_rate - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_rebase_skips_the_gap() {
        let mut metrics = FrameMetrics::new(90.0, SAMPLE_COUNT);
        metrics.record(0.0);
        metrics.record(10.0);
        metrics.rebase();
        assert_eq!(metrics.record(60_000.0), None);
        assert_eq!(metrics.record(60_010.0), Some(10.0));

        let m = metrics.snapshot();
        assert_eq!(m.max_frame_time_ms, 10.0);
        assert_eq!(m.dropped_frames, 0);
        assert_eq!(m.total_frames, 4);
    }
}
