//! Sink backed by a cpal output stream.
//!
//! Rendered mono bursts go into an rtrb ring; the device callback drains it.
//! The buffer size is the most frames the writer may keep queued, so it is
//! the latency the stream runs at. The ring capacity is the maximum buffer
//! size.
//!
//! `cpal::Stream` is not `Send` on every host, so the stream lives on its own
//! thread and the sink only holds the ring producer and a stop channel.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, warn};

use super::{AudioSink, BufferSize, BufferSizeWatch};
use crate::error::{MarkError, Result};

const WRITE_POLL: Duration = Duration::from_micros(250);
// Writer gives up when the callback stops draining for this long.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

pub struct DeviceSink {
    device_name: Option<String>,
    buffer_size: BufferSize,
    capacity: u32,
    underruns: Arc<AtomicU32>,
    primed: Arc<AtomicBool>,
    producer: Option<Producer<f32>>,
    stop_tx: Option<mpsc::Sender<()>>,
    stream_thread: Option<JoinHandle<()>>,
}

impl DeviceSink {
    /// `capacity` is the ring size in frames and caps the buffer size.
    pub fn new(device_name: Option<String>, capacity: u32) -> Self {
        Self {
            device_name,
            buffer_size: BufferSize::new(capacity),
            capacity,
            underruns: Arc::new(AtomicU32::new(0)),
            primed: Arc::new(AtomicBool::new(false)),
            producer: None,
            stop_tx: None,
            stream_thread: None,
        }
    }

    fn queued_frames(producer: &Producer<f32>, capacity: u32) -> u32 {
        capacity.saturating_sub(producer.slots() as u32)
    }
}

impl AudioSink for DeviceSink {
    fn open(&mut self, sample_rate: u32, frames_per_burst: u32) -> Result<()> {
        if self.producer.is_some() {
            return Err(MarkError::Device("device sink already open".into()));
        }
        let (producer, consumer) = RingBuffer::<f32>::new(self.capacity as usize);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        self.underruns.store(0, Ordering::Relaxed);
        self.primed.store(false, Ordering::Relaxed);
        let underruns = Arc::clone(&self.underruns);
        let primed = Arc::clone(&self.primed);
        let device_name = self.device_name.clone();

        let handle = thread::Builder::new()
            .name("latencymark-device".into())
            .spawn(move || {
                let stream = match build_stream(
                    device_name.as_deref(),
                    sample_rate,
                    frames_per_burst,
                    consumer,
                    underruns,
                    primed,
                ) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(MarkError::Device(err.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Returns on stop or when the sink is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|err| MarkError::Device(format!("failed to spawn stream thread: {err}")))?;

        ready_rx
            .recv()
            .map_err(|_| MarkError::Device("stream thread exited during setup".into()))??;

        self.producer = Some(producer);
        self.stop_tx = Some(stop_tx);
        self.stream_thread = Some(handle);
        info!(sample_rate, frames_per_burst, capacity = self.capacity, "device stream started");
        Ok(())
    }

    fn write(&mut self, frames: &[f32]) -> Result<()> {
        let capacity = self.capacity;
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| MarkError::Device("write to a closed sink".into()))?;

        let needed = frames.len() as u32;
        let mut last_progress = Instant::now();
        let mut last_queued = Self::queued_frames(producer, capacity);
        loop {
            let queued = Self::queued_frames(producer, capacity);
            let limit = self.buffer_size.get().max(needed);
            if queued + needed <= limit && producer.slots() >= frames.len() {
                break;
            }
            if queued != last_queued {
                last_queued = queued;
                last_progress = Instant::now();
            } else if last_progress.elapsed() > STALL_TIMEOUT {
                return Err(MarkError::Device("output stream stopped draining".into()));
            }
            thread::sleep(WRITE_POLL);
        }

        for &sample in frames {
            // Room was checked above; a race with the callback only frees slots
            let _ = producer.push(sample);
        }
        self.primed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.producer = None;
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.stream_thread.take() {
            handle
                .join()
                .map_err(|_| MarkError::Device("stream thread panicked".into()))?;
            debug!("device stream stopped");
        }
        Ok(())
    }

    fn buffer_size_in_frames(&self) -> u32 {
        self.buffer_size.get()
    }

    fn set_buffer_size_in_frames(&mut self, requested: u32) -> u32 {
        let actual = requested.clamp(1, self.capacity);
        self.buffer_size.set(actual);
        actual
    }

    fn max_buffer_size_in_frames(&self) -> u32 {
        self.capacity
    }

    fn underrun_count(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn buffer_size_watch(&self) -> BufferSizeWatch {
        self.buffer_size.watch()
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("closing device sink: {err}");
        }
    }
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    frames_per_burst: u32,
    mut consumer: Consumer<f32>,
    underruns: Arc<AtomicU32>,
    primed: Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|err| MarkError::Device(err.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| MarkError::Device(format!("no output device named {name:?}")))?,
        None => host
            .default_output_device()
            .ok_or_else(|| MarkError::Device("no default output device available".into()))?,
    };
    let default_config = device
        .default_output_config()
        .map_err(|err| MarkError::Device(format!("failed to fetch default output config: {err}")))?;
    if default_config.sample_format() != cpal::SampleFormat::F32 {
        return Err(MarkError::Device(format!(
            "unsupported sample format {:?}",
            default_config.sample_format()
        )));
    }
    let channels = default_config.channels() as usize;

    let config = cpal::StreamConfig {
        channels: default_config.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Fixed(frames_per_burst),
    };

    let mut underrun_active = false;
    let callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let mut short = false;
        for frame in data.chunks_mut(channels) {
            let sample = match consumer.pop() {
                Ok(sample) => sample,
                Err(_) => {
                    short = true;
                    0.0
                }
            };
            frame.fill(sample);
        }
        // Count underrun episodes, not missing frames
        if short && primed.load(Ordering::Relaxed) {
            if !underrun_active {
                underrun_active = true;
                underruns.fetch_add(1, Ordering::Relaxed);
            }
        } else if !short {
            underrun_active = false;
        }
    };

    device
        .build_output_stream(
            &config,
            callback,
            |err| warn!("audio stream error: {err}"),
            None,
        )
        .map_err(|err| match err {
            cpal::BuildStreamError::StreamConfigNotSupported => MarkError::Device(format!(
                "device does not support {sample_rate} Hz with {frames_per_burst}-frame bursts"
            )),
            other => MarkError::Device(other.to_string()),
        })
}
