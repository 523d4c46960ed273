//! Error types for the benchmark harnesses.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarkError {
    /// The sink cannot grow the buffer while underruns persist. `actual` is
    /// the most the sink can apply.
    #[error("at maximum buffer size and still glitching (requested {requested} frames, sink allows {actual})")]
    BufferAtMaximum { requested: u32, actual: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Audio output device errors
    #[error("audio device error: {0}")]
    Device(String),

    #[error("failed to spawn glitch monitor: {0}")]
    MonitorSpawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MarkError>;
