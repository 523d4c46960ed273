use std::{fmt::Write, time::{Duration, Instant}};

/// Summary of one series of durations, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntervalStats {
    pub count: usize,
    pub mean_usec: f64,
    pub std_dev_usec: f64,
    pub min_usec: f64,
    pub max_usec: f64,
}

/// Running mean and variance (Welford) plus min and max, in constant memory.
#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    count: usize,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn summary(&self) -> IntervalStats {
        if self.count == 0 {
            return IntervalStats::default();
        }
        IntervalStats {
            count: self.count,
            mean_usec: self.mean,
            std_dev_usec: (self.m2 / self.count as f64).sqrt(),
            min_usec: self.min,
            max_usec: self.max,
        }
    }
}

/// Records per-burst render time and wakeup spacing.
#[derive(Debug, Default)]
pub struct JitterRecorder {
    render: RunningStats,
    wakeup: RunningStats,
    last_wakeup: Option<Instant>,
}

impl JitterRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear previous data.
    pub fn begin(&mut self) {
        *self = Self::default();
    }

    pub fn record_burst(&mut self, wakeup: Instant, render: Duration) {
        if let Some(prev) = self.last_wakeup {
            self.wakeup
                .push(wakeup.saturating_duration_since(prev).as_secs_f64() * 1e6);
        }
        self.last_wakeup = Some(wakeup);
        self.render.push(render.as_secs_f64() * 1e6);
    }

    pub fn render_stats(&self) -> IntervalStats {
        self.render.summary()
    }

    pub fn wakeup_stats(&self) -> IntervalStats {
        self.wakeup.summary()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (label, stats) in [("render", self.render_stats()), ("wakeup", self.wakeup_stats())] {
            let _ = writeln!(out, "jitter.{label}.count   = {}", stats.count);
            let _ = writeln!(out, "jitter.{label}.mean    = {:.1} usec", stats.mean_usec);
            let _ = writeln!(out, "jitter.{label}.stddev  = {:.1} usec", stats.std_dev_usec);
            let _ = writeln!(out, "jitter.{label}.min     = {:.1} usec", stats.min_usec);
            let _ = writeln!(out, "jitter.{label}.max     = {:.1} usec", stats.max_usec);
        }
        out
    }
}
