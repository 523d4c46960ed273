//! Timing collaborators: per-burst jitter and CPU load.

pub mod cpu;
pub mod jitter;

pub use cpu::CpuMeter;
pub use jitter::{IntervalStats, JitterRecorder};
