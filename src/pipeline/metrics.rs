use std::collections::VecDeque;
use std::time::Instant;

pub const DEFAULT_WINDOW: usize = 30;

/// Timing reported for one processed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingSample {
    pub fps: f64,
    pub latency_ms: f64,
}

/// Inter-frame timing over the most recent `capacity` intervals.
#[derive(Debug, Clone)]
pub struct RollingMetrics {
    latencies_ms: VecDeque<f64>,
    capacity: usize,
    last_tick: Option<Instant>,
}

impl RollingMetrics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            latencies_ms: VecDeque::with_capacity(capacity),
            capacity,
            last_tick: None,
        }
    }

    pub fn tick(&mut self) -> TimingSample {
        self.tick_at(Instant::now())
    }

    /// The first tick after `reset` has no previous sample and reports zeros.
    pub fn tick_at(&mut self, now: Instant) -> TimingSample {
        let Some(previous) = self.last_tick.replace(now) else {
            return TimingSample::default();
        };

        let interval = now.saturating_duration_since(previous).as_secs_f64();
        let latency_ms = interval * 1000.0;

        if self.latencies_ms.len() == self.capacity {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);

        let fps = if interval > 0.0 { 1.0 / interval } else { 0.0 };
        TimingSample { fps, latency_ms }
    }

    pub fn rolling_average_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    pub fn reset(&mut self) {
        self.latencies_ms.clear();
        self.last_tick = None;
    }

    pub fn len(&self) -> usize {
        self.latencies_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latencies_ms.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RollingMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
