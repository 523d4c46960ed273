#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::{MarkError, Result},
    latency::load::{VoicesMode, NOTES_PER_STEP},
};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_FRAMES_PER_BURST: u32 = 192;
pub const DEFAULT_NUM_SECONDS: u32 = 10;
pub const DEFAULT_NUM_VOICES: u32 = 8;
pub const DEFAULT_NOTE_MS: u32 = 250;
pub const DEFAULT_MONITOR_PERIOD_MS: u64 = 80;
pub const MAX_VOICES: u32 = 256;

/// Parameters shared by every harness run.
///
/// `high_voices == 0` (or anything not above `low_voices`) means the load is
/// constant at `low_voices`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub sample_rate: u32,
    pub frames_per_burst: u32,
    pub num_seconds: u32,
    pub low_voices: u32,
    pub high_voices: u32,
    pub voices_mode: VoicesMode,
    /// Notes per full low/high cycle of the voices pattern.
    pub notes_per_step: u32,
    /// Seed for the `Random` voices pattern.
    pub seed: u64,
    /// Length of one note (one scheduling step of the harness)
    pub note_ms: u32,
    pub monitor_period_ms: u64,
    pub max_voices: u32,
    pub verbose: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frames_per_burst: DEFAULT_FRAMES_PER_BURST,
            num_seconds: DEFAULT_NUM_SECONDS,
            low_voices: DEFAULT_NUM_VOICES,
            high_voices: 0,
            voices_mode: VoicesMode::Switch,
            notes_per_step: NOTES_PER_STEP,
            seed: 0,
            note_ms: DEFAULT_NOTE_MS,
            monitor_period_ms: DEFAULT_MONITOR_PERIOD_MS,
            max_voices: MAX_VOICES,
            verbose: false,
        }
    }
}

impl HarnessConfig {
    pub fn with_timing(mut self, sample_rate: u32, frames_per_burst: u32, num_seconds: u32) -> Self {
        self.sample_rate = sample_rate;
        self.frames_per_burst = frames_per_burst;
        self.num_seconds = num_seconds;
        self
    }

    pub fn with_voices(mut self, low: u32, high: u32, mode: VoicesMode) -> Self {
        self.low_voices = low;
        self.high_voices = high;
        self.voices_mode = mode;
        self
    }

    pub fn with_notes_per_step(mut self, notes: u32) -> Self {
        self.notes_per_step = notes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Frames in one measurement window.
    pub fn total_frames(&self) -> u64 {
        self.num_seconds as u64 * self.sample_rate as u64
    }

    /// Frames per note, rounded up to a whole number of bursts.
    pub fn frames_per_note(&self) -> u64 {
        let raw = self.sample_rate as u64 * self.note_ms as u64 / 1000;
        let burst = self.frames_per_burst as u64;
        raw.div_ceil(burst).max(1) * burst
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(MarkError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.frames_per_burst == 0 {
            return Err(MarkError::InvalidConfig("frames per burst must be positive".into()));
        }
        if self.num_seconds == 0 {
            return Err(MarkError::InvalidConfig("run duration must be positive".into()));
        }
        if self.note_ms == 0 {
            return Err(MarkError::InvalidConfig("note duration must be positive".into()));
        }
        if self.notes_per_step < 2 {
            return Err(MarkError::InvalidConfig(format!(
                "notes per step must be at least 2, got {}",
                self.notes_per_step
            )));
        }
        if self.low_voices > self.max_voices || self.high_voices > self.max_voices {
            return Err(MarkError::InvalidConfig(format!(
                "voice count {} / {} exceeds maximum {}",
                self.low_voices, self.high_voices, self.max_voices
            )));
        }
        Ok(())
    }
}
