//! LatencyMark: the smallest buffer a synth workload can run on without
//! glitching for the whole run.
//!
//! # Example
//!
//! ```
//! use saavy_mark::{
//!     config::HarnessConfig,
//!     latency::LatencyMark,
//!     sink::{SimulatedSink, UnderrunPlan},
//! };
//!
//! let config = HarnessConfig::default().with_timing(48_000, 192, 2);
//! let sink = SimulatedSink::new(16 * 192).with_plan(UnderrunPlan::AtFrames(vec![48_000]));
//! let mut mark = LatencyMark::new(config, sink)?;
//! let result = mark.run()?;
//! assert_eq!(result.measurement(), 384.0);
//! # Ok::<(), saavy_mark::error::MarkError>(())
//! ```

pub mod load;
pub mod monitor;
pub mod probe;

use std::time::Duration;

use tracing::{error, warn};

pub use load::{LoadGenerator, VoicesMode, NOTES_PER_STEP};
pub use monitor::{
    GlitchMonitor, GlitchNotice, LogNotices, MonitorGuard, NoticeHandler, SizeChange, SizeReporter,
};
#[cfg(feature = "rtrb")]
pub use monitor::RingNotices;
pub use probe::{LatencyProbe, TEST_NAME};

use crate::{
    config::HarnessConfig,
    error::Result,
    harness::TestHarness,
    result::{MarkResult, ResultCode},
    sink::AudioSink,
};

pub struct LatencyMark<S: AudioSink> {
    harness: TestHarness<S>,
    probe: LatencyProbe,
}

impl<S: AudioSink> LatencyMark<S> {
    pub fn new(config: HarnessConfig, sink: S) -> Result<Self> {
        let probe = LatencyProbe::new(&config);
        let harness = TestHarness::new(config, sink)?;
        Ok(Self { harness, probe })
    }

    /// Run with glitch notices going to the log.
    pub fn run(&mut self) -> Result<MarkResult> {
        self.run_with_notices(LogNotices)
    }

    /// Run one search. The monitor is running for the whole window and is
    /// joined before this returns, on success and on error.
    pub fn run_with_notices<H: NoticeHandler>(&mut self, notices: H) -> Result<MarkResult> {
        let config = self.harness.config();
        let frames_per_burst = config.frames_per_burst;
        let period = Duration::from_millis(config.monitor_period_ms);

        // The search starts at one burst; make that the monitor's baseline
        let sink = self.harness.sink_mut();
        sink.set_buffer_size_in_frames(frames_per_burst);
        // One slot per possible growth, plus the pin
        let capacity = (sink.max_buffer_size_in_frames() / frames_per_burst) as usize + 1;
        let monitor = GlitchMonitor::new(sink.buffer_size_watch(), frames_per_burst, capacity)
            .with_period(period);
        let reporter = monitor.reporter();
        let guard = match monitor.start(notices) {
            Ok(guard) => {
                self.probe.attach_reporter(reporter);
                Some(guard)
            }
            Err(err) => {
                warn!("running without glitch notices: {err}");
                None
            }
        };

        let result = self.harness.run(&mut self.probe);
        self.probe.detach_reporter();
        drop(guard);

        if let Err(err) = &result {
            error!(code = ResultCode::from(err).code(), "{} failed: {err}", TEST_NAME);
        }
        result
    }

    pub fn probe(&self) -> &LatencyProbe {
        &self.probe
    }

    pub fn into_sink(self) -> S {
        self.harness.into_sink()
    }
}
