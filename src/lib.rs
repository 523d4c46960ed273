pub mod config;
pub mod error;
pub mod harness; // Generic note-by-note measurement loop
pub mod latency; // LatencyMark search, load patterns, glitch monitor
pub mod result;
pub mod sink; // Audio output abstraction
pub mod synth; // Workload voices
pub mod timing;

pub use config::HarnessConfig;
pub use error::{MarkError, Result};
pub use latency::LatencyMark;
pub use result::{MarkResult, ResultCode};

pub(crate) const MIN_TIME: f32 = 1.0 / 48_000.0;
