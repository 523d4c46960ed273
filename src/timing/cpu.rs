use std::{fmt::Write, time::Duration};

/// Fraction of real time spent rendering.
///
/// Load is render time divided by the duration of audio rendered; above
/// 100% the workload cannot keep up at any buffer size.
#[derive(Debug, Default)]
pub struct CpuMeter {
    busy: Duration,
    audio_frames: u64,
    peak_load: f64,
}

impl CpuMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record(&mut self, render: Duration, frames: u32, sample_rate: u32) {
        self.busy += render;
        self.audio_frames += frames as u64;
        let audio_secs = frames as f64 / sample_rate as f64;
        if audio_secs > 0.0 {
            self.peak_load = self.peak_load.max(render.as_secs_f64() / audio_secs);
        }
    }

    pub fn load(&self, sample_rate: u32) -> f64 {
        let audio_secs = self.audio_frames as f64 / sample_rate as f64;
        if audio_secs > 0.0 {
            self.busy.as_secs_f64() / audio_secs
        } else {
            0.0
        }
    }

    pub fn dump(&self, sample_rate: u32) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "cpu.load.mean.percent = {:.2}", 100.0 * self.load(sample_rate));
        let _ = writeln!(out, "cpu.load.peak.percent = {:.2}", 100.0 * self.peak_load);
        out
    }
}
