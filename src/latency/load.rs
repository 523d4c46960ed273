//! Synthetic voice load.
//!
//! The voice count only changes every half step (every 5 notes with the
//! default step of 10), so the load is stable for a few notes at a time.

use std::{fmt, str::FromStr};

use rand::{rngs::StdRng, Rng, SeedableRng};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const NOTES_PER_STEP: u32 = 10;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VoicesMode {
    /// `low` for the first half of each step, `high` for the second.
    #[default]
    Switch,
    /// Uniform in `[low, high]`, from a seeded generator.
    Random,
    /// Sawtooth ramp from `low` to `high`.
    LinearLoop,
}

impl FromStr for VoicesMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "switch" => Ok(VoicesMode::Switch),
            "random" => Ok(VoicesMode::Random),
            "linear" | "linear-loop" => Ok(VoicesMode::LinearLoop),
            other => Err(format!(
                "unknown voices mode {other:?} (expected switch, random or linear)"
            )),
        }
    }
}

impl fmt::Display for VoicesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoicesMode::Switch => "switch",
            VoicesMode::Random => "random",
            VoicesMode::LinearLoop => "linear-loop",
        })
    }
}

pub struct LoadGenerator {
    mode: VoicesMode,
    low: u32,
    high: u32,
    step: u32,
    seed: u64,
    last_voices: Option<u32>,
    rng: StdRng,
}

impl LoadGenerator {
    pub fn new(mode: VoicesMode, low: u32, high: u32, seed: u64) -> Self {
        Self {
            mode,
            low,
            high,
            step: NOTES_PER_STEP,
            seed,
            last_voices: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Notes per full low/high cycle. Values below 2 are raised to 2.
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step.max(2);
        self
    }

    /// Back to the state right after construction: no previous count and
    /// the generator re-seeded. Window restarts must not call this.
    pub fn reset(&mut self) {
        self.last_voices = None;
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    /// True when the generator modulates the load at all.
    pub fn is_modulated(&self) -> bool {
        self.high > self.low
    }

    /// Voice count for the note at `note_index` within the current window.
    pub fn voices_for_note(&mut self, note_index: u32) -> u32 {
        if !self.is_modulated() {
            return self.low;
        }

        let half = self.step / 2;
        if note_index % half != 0 {
            if let Some(last) = self.last_voices {
                return last;
            }
        }

        let voices = match self.mode {
            VoicesMode::Switch => {
                if note_index % self.step < half {
                    self.low
                } else {
                    self.high
                }
            }
            VoicesMode::LinearLoop => {
                let next = self.last_voices.map_or(self.low, |last| last + half);
                if next > self.high || next < self.low {
                    self.low
                } else {
                    next
                }
            }
            VoicesMode::Random => self.rng.gen_range(self.low..=self.high),
        };
        self.last_voices = Some(voices);
        voices
    }
}
