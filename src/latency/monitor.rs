//! Background reporting of buffer-size changes.
//!
//! Printing from the note loop could itself cause a glitch, so the probe
//! hands every size it applies to a bounded channel and a separate thread
//! drains it, reporting each change. The monitor is advisory: it never
//! writes, and nothing it does affects a result.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

#[cfg(feature = "rtrb")]
use rtrb::Producer;
use tracing::{info, warn};

use crate::{config::DEFAULT_MONITOR_PERIOD_MS, error::Result, sink::BufferSizeWatch};

/// One buffer size applied by the measurement flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeChange {
    pub glitch_time_secs: f32,
    pub buffer_size: u32,
}

/// Sending half of the monitor's channel. Never blocks.
#[derive(Debug, Clone)]
pub struct SizeReporter {
    tx: SyncSender<SizeChange>,
}

impl SizeReporter {
    /// Returns false when the change was dropped (channel full or monitor
    /// gone).
    pub fn report(&self, change: SizeChange) -> bool {
        self.tx.try_send(change).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlitchNotice {
    pub glitch_time_secs: f32,
    pub buffer_size: u32,
    pub frames_per_burst: u32,
}

impl GlitchNotice {
    pub fn bursts(&self) -> u32 {
        self.buffer_size / self.frames_per_burst.max(1)
    }
}

impl fmt::Display for GlitchNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Audio glitch at {:.2}s, restarting test with buffer size {} = {} * {}",
            self.glitch_time_secs,
            self.buffer_size,
            self.bursts(),
            self.frames_per_burst
        )
    }
}

/// Receives notices on the monitor thread.
pub trait NoticeHandler: Send + 'static {
    fn notify(&mut self, notice: &GlitchNotice);
}

impl<F> NoticeHandler for F
where
    F: FnMut(&GlitchNotice) + Send + 'static,
{
    fn notify(&mut self, notice: &GlitchNotice) {
        self(notice)
    }
}

/// Forwards notices into a ring for another thread to drain. Drops the
/// notice when the ring is full.
#[cfg(feature = "rtrb")]
pub struct RingNotices(pub Producer<GlitchNotice>);

#[cfg(feature = "rtrb")]
impl NoticeHandler for RingNotices {
    fn notify(&mut self, notice: &GlitchNotice) {
        let _ = self.0.push(*notice);
    }
}

/// Writes every notice to the log at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotices;

impl NoticeHandler for LogNotices {
    fn notify(&mut self, notice: &GlitchNotice) {
        info!("{notice}");
    }
}

pub struct GlitchMonitor {
    watch: BufferSizeWatch,
    frames_per_burst: u32,
    period: Duration,
    reporter: SizeReporter,
    changes: Receiver<SizeChange>,
}

impl GlitchMonitor {
    /// `capacity` bounds the changes queued between two polls.
    pub fn new(watch: BufferSizeWatch, frames_per_burst: u32, capacity: usize) -> Self {
        let (tx, changes) = mpsc::sync_channel(capacity.max(1));
        Self {
            watch,
            frames_per_burst,
            period: Duration::from_millis(DEFAULT_MONITOR_PERIOD_MS),
            reporter: SizeReporter { tx },
            changes,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn reporter(&self) -> SizeReporter {
        self.reporter.clone()
    }

    /// Spawn the polling thread. The size seen right now is the baseline;
    /// only changes differing from the last reported size are notified.
    pub fn start<H: NoticeHandler>(self, mut handler: H) -> Result<MonitorGuard> {
        let enabled = Arc::new(AtomicBool::new(true));
        let thread_enabled = Arc::clone(&enabled);
        let Self {
            watch,
            frames_per_burst,
            period,
            reporter,
            changes,
        } = self;
        drop(reporter);
        let mut previous = watch.get();

        let handle = thread::Builder::new()
            .name("glitch-monitor".into())
            .spawn(move || {
                let mut emitted = 0usize;
                let mut drain = |previous: &mut u32| {
                    for change in changes.try_iter() {
                        if change.buffer_size == *previous {
                            continue;
                        }
                        handler.notify(&GlitchNotice {
                            glitch_time_secs: change.glitch_time_secs,
                            buffer_size: change.buffer_size,
                            frames_per_burst,
                        });
                        *previous = change.buffer_size;
                        emitted += 1;
                    }
                };
                while thread_enabled.load(Ordering::Acquire) {
                    thread::park_timeout(period);
                    drain(&mut previous);
                }
                // Catch changes sent just before stop
                drain(&mut previous);
                emitted
            })?;

        Ok(MonitorGuard {
            enabled,
            handle: Some(handle),
        })
    }
}

/// Running monitor. Dropping it stops the thread and waits for it.
pub struct MonitorGuard {
    enabled: Arc<AtomicBool>,
    handle: Option<JoinHandle<usize>>,
}

impl MonitorGuard {
    /// Stop and join. Returns the number of notices emitted; none are
    /// emitted after this returns.
    pub fn stop(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        self.enabled.store(false, Ordering::Release);
        handle.thread().unpark();
        match handle.join() {
            Ok(emitted) => emitted,
            Err(_) => {
                warn!("glitch monitor thread panicked");
                0
            }
        }
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}
