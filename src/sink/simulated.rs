//! Deterministic sink running on a virtual clock.
//!
//! Written frames advance the clock; nothing is played. Underruns come from
//! an [`UnderrunPlan`] instead of a driver, which makes a latency search
//! reproducible down to the frame.

use tracing::trace;

use super::{AudioSink, BufferSize, BufferSizeWatch};
use crate::error::{MarkError, Result};

/// When the simulated driver reports underruns.
#[derive(Debug, Clone, Default)]
pub enum UnderrunPlan {
    /// Never glitch.
    #[default]
    None,
    /// One underrun each time the write clock reaches one of these frame
    /// positions (counted from `open`).
    AtFrames(Vec<u64>),
    /// Glitch while the buffer is smaller than `bursts` bursts: one
    /// underrun for every `every_frames` frames written under that size.
    RequireBursts { bursts: u32, every_frames: u64 },
}

pub struct SimulatedSink {
    buffer_size: BufferSize,
    max_frames: u32,
    frames_per_burst: u32,
    plan: UnderrunPlan,
    next_scripted: usize,
    starved_frames: u64,
    frames_written: u64,
    underruns: u32,
    open: bool,
    resize_history: Vec<u32>,
}

impl SimulatedSink {
    pub fn new(max_frames: u32) -> Self {
        Self {
            buffer_size: BufferSize::new(max_frames),
            max_frames,
            frames_per_burst: 0,
            plan: UnderrunPlan::None,
            next_scripted: 0,
            starved_frames: 0,
            frames_written: 0,
            underruns: 0,
            open: false,
            resize_history: Vec::new(),
        }
    }

    pub fn with_plan(mut self, mut plan: UnderrunPlan) -> Self {
        if let UnderrunPlan::AtFrames(positions) = &mut plan {
            positions.sort_unstable();
        }
        self.plan = plan;
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Every size applied by `set_buffer_size_in_frames`, in order.
    pub fn resize_history(&self) -> &[u32] {
        &self.resize_history
    }

    fn advance_plan(&mut self, start: u64, end: u64) {
        match &self.plan {
            UnderrunPlan::None => {}
            UnderrunPlan::AtFrames(positions) => {
                while let Some(&pos) = positions.get(self.next_scripted) {
                    if pos > end {
                        break;
                    }
                    if pos >= start {
                        self.underruns += 1;
                        trace!(frame = pos, "scripted underrun");
                    }
                    self.next_scripted += 1;
                }
            }
            &UnderrunPlan::RequireBursts {
                bursts,
                every_frames,
            } => {
                let required = bursts.saturating_mul(self.frames_per_burst);
                if self.buffer_size.get() < required {
                    self.starved_frames += end - start;
                    if self.starved_frames >= every_frames.max(1) {
                        self.starved_frames = 0;
                        self.underruns += 1;
                        trace!(frame = end, "buffer too small, underrun");
                    }
                } else {
                    self.starved_frames = 0;
                }
            }
        }
    }
}

impl AudioSink for SimulatedSink {
    fn open(&mut self, _sample_rate: u32, frames_per_burst: u32) -> Result<()> {
        if frames_per_burst == 0 || frames_per_burst > self.max_frames {
            return Err(MarkError::Device(format!(
                "burst of {frames_per_burst} frames does not fit buffer capacity {}",
                self.max_frames
            )));
        }
        self.frames_per_burst = frames_per_burst;
        self.frames_written = 0;
        self.underruns = 0;
        self.next_scripted = 0;
        self.starved_frames = 0;
        self.open = true;
        Ok(())
    }

    fn write(&mut self, frames: &[f32]) -> Result<()> {
        if !self.open {
            return Err(MarkError::Device("write to a closed sink".into()));
        }
        let start = self.frames_written;
        let end = start + frames.len() as u64;
        self.advance_plan(start, end);
        self.frames_written = end;

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn buffer_size_in_frames(&self) -> u32 {
        self.buffer_size.get()
    }

    fn set_buffer_size_in_frames(&mut self, requested: u32) -> u32 {
        let actual = requested.clamp(1, self.max_frames);
        if actual != self.buffer_size.get() {
            self.resize_history.push(actual);
        }
        self.buffer_size.set(actual);
        actual
    }

    fn max_buffer_size_in_frames(&self) -> u32 {
        self.max_frames
    }

    fn underrun_count(&self) -> u32 {
        self.underruns
    }

    fn buffer_size_watch(&self) -> BufferSizeWatch {
        self.buffer_size.watch()
    }
}
