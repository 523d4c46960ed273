//! Audio sinks: where rendered bursts go, and who owns the buffer size and
//! underrun counter.
//!
//! The harness only talks to a sink through [`AudioSink`]. Two sinks ship
//! with the crate:
//! - [`SimulatedSink`] runs on a virtual clock and injects underruns from a
//!   plan, so latency searches are deterministic in tests.
//! - `DeviceSink` (feature `rtrb`) plays through the default cpal output
//!   device and counts real underruns.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use crate::error::Result;

#[cfg(feature = "rtrb")]
pub mod device;
pub mod simulated;

#[cfg(feature = "rtrb")]
pub use device::DeviceSink;
pub use simulated::{SimulatedSink, UnderrunPlan};

/// Output stream the harness writes bursts into.
pub trait AudioSink: Send {
    fn open(&mut self, sample_rate: u32, frames_per_burst: u32) -> Result<()>;

    /// Write one mono burst. May block until the stream has room.
    fn write(&mut self, frames: &[f32]) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn buffer_size_in_frames(&self) -> u32;

    /// Request a new buffer size. Returns the size actually applied, which
    /// is below `requested` when the sink hits its maximum.
    fn set_buffer_size_in_frames(&mut self, requested: u32) -> u32;

    fn max_buffer_size_in_frames(&self) -> u32;

    /// Monotonic count of underruns since `open`.
    fn underrun_count(&self) -> u32;

    /// Read-only view of the buffer size for other threads.
    fn buffer_size_watch(&self) -> BufferSizeWatch;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn open(&mut self, sample_rate: u32, frames_per_burst: u32) -> Result<()> {
        (**self).open(sample_rate, frames_per_burst)
    }

    fn write(&mut self, frames: &[f32]) -> Result<()> {
        (**self).write(frames)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn buffer_size_in_frames(&self) -> u32 {
        (**self).buffer_size_in_frames()
    }

    fn set_buffer_size_in_frames(&mut self, requested: u32) -> u32 {
        (**self).set_buffer_size_in_frames(requested)
    }

    fn max_buffer_size_in_frames(&self) -> u32 {
        (**self).max_buffer_size_in_frames()
    }

    fn underrun_count(&self) -> u32 {
        (**self).underrun_count()
    }

    fn buffer_size_watch(&self) -> BufferSizeWatch {
        (**self).buffer_size_watch()
    }
}

/// Buffer size cell owned by a sink.
///
/// The sink is the only writer; readers on other threads get a
/// [`BufferSizeWatch`]. Relaxed ordering is enough since readers only
/// display the value.
#[derive(Debug, Default)]
pub struct BufferSize {
    frames: Arc<AtomicU32>,
}

impl BufferSize {
    pub fn new(frames: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU32::new(frames)),
        }
    }

    pub fn get(&self) -> u32 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn set(&self, frames: u32) {
        self.frames.store(frames, Ordering::Relaxed);
    }

    pub fn watch(&self) -> BufferSizeWatch {
        BufferSizeWatch {
            frames: Arc::clone(&self.frames),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BufferSizeWatch {
    frames: Arc<AtomicU32>,
}

impl BufferSizeWatch {
    pub fn get(&self) -> u32 {
        self.frames.load(Ordering::Relaxed)
    }
}
