use std::fmt::Write;

use tracing::{debug, error, info};

use super::{
    load::LoadGenerator,
    monitor::{SizeChange, SizeReporter},
};
use crate::{
    config::HarnessConfig,
    error::{MarkError, Result},
    harness::{HarnessCtx, MeasurementHooks, NoteAction},
    result::{MarkResult, ResultCode},
};

pub const TEST_NAME: &str = "LatencyMark";

/// Searches for the smallest buffer, in whole bursts, that survives a full
/// window without a new underrun.
///
/// Starts at one burst. Every underrun adds one burst and restarts the
/// window; if the sink cannot grow any further the run fails.
pub struct LatencyProbe {
    sample_rate: u32,
    frames_per_burst: u32,
    low_voices: u32,
    high_voices: u32,
    verbose: bool,
    load: LoadGenerator,
    previous_underruns: u32,
    // Driver start-up noise: the first check after begin only takes a baseline
    skip_next_check: bool,
    last_glitch_secs: f32,
    reporter: Option<SizeReporter>,
    restarts: u32,
}

impl LatencyProbe {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frames_per_burst: config.frames_per_burst,
            low_voices: config.low_voices,
            high_voices: config.high_voices,
            verbose: config.verbose,
            load: LoadGenerator::new(
                config.voices_mode,
                config.low_voices,
                config.high_voices,
                config.seed,
            )
            .with_step(config.notes_per_step),
            previous_underruns: 0,
            skip_next_check: true,
            last_glitch_secs: 0.0,
            reporter: None,
            restarts: 0,
        }
    }

    /// Send every applied buffer size to a monitor from now on.
    pub fn attach_reporter(&mut self, reporter: SizeReporter) {
        self.reporter = Some(reporter);
    }

    pub fn detach_reporter(&mut self) {
        self.reporter = None;
    }

    pub fn last_glitch_secs(&self) -> f32 {
        self.last_glitch_secs
    }

    /// Window restarts since the measurement began.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    fn report(&self, buffer_size: u32) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let sent = reporter.report(SizeChange {
            glitch_time_secs: self.last_glitch_secs,
            buffer_size,
        });
        if !sent {
            debug!(buffer_size, "glitch notice dropped");
        }
    }
}

impl MeasurementHooks for LatencyProbe {
    fn test_name(&self) -> &str {
        TEST_NAME
    }

    fn on_begin_measurement(&mut self, ctx: &mut HarnessCtx<'_>) -> Result<()> {
        self.previous_underruns = 0;
        self.skip_next_check = true;
        self.restarts = 0;
        self.last_glitch_secs = 0.0;
        self.load.reset();

        let before = ctx.sink.buffer_size_in_frames();
        let pinned = ctx.sink.set_buffer_size_in_frames(self.frames_per_burst);
        if pinned != before {
            self.report(pinned);
        }
        info!(
            "---- Measure latency ---- #voices = {} / {}",
            self.low_voices, self.high_voices
        );
        ctx.jitter.begin();
        Ok(())
    }

    fn on_before_note(&mut self, ctx: &mut HarnessCtx<'_>) -> Result<NoteAction> {
        let underruns = ctx.sink.underrun_count();
        if std::mem::take(&mut self.skip_next_check) {
            self.previous_underruns = underruns;
            return Ok(NoteAction::Continue);
        }

        if underruns <= self.previous_underruns {
            return Ok(NoteAction::Continue);
        }
        self.previous_underruns = underruns;

        let glitch_secs = ctx.window.elapsed_secs(self.sample_rate) as f32;
        self.last_glitch_secs = glitch_secs;

        let size = ctx.sink.buffer_size_in_frames();
        let requested = size + self.frames_per_burst;
        let max = ctx.sink.max_buffer_size_in_frames();
        if requested > max {
            error!(requested, max, "at maximum buffer size and still glitching");
            return Err(MarkError::BufferAtMaximum {
                requested,
                actual: max,
            });
        }
        let actual = ctx.sink.set_buffer_size_in_frames(requested);
        if actual < requested {
            error!(requested, actual, "sink clamped the buffer below its maximum");
            ctx.sink.set_buffer_size_in_frames(size);
            return Err(MarkError::BufferAtMaximum { requested, actual });
        }
        self.report(actual);

        if self.verbose {
            debug!("detected glitch at {glitch_secs:5.2}s, buffer now {actual} frames");
        }
        ctx.window.restart();
        self.restarts += 1;
        Ok(NoteAction::Restarted)
    }

    fn on_end_measurement(&mut self, ctx: &mut HarnessCtx<'_>, result: &mut MarkResult) {
        let size_frames = ctx.sink.buffer_size_in_frames();
        let latency_msec = 1000.0 * size_frames as f64 / self.sample_rate as f64;

        let mut report = ctx.jitter.dump();
        let _ = writeln!(report, "frames.per.burst     = {}", self.frames_per_burst);
        let _ = writeln!(
            report,
            "audio.latency.bursts = {}",
            size_frames / self.frames_per_burst
        );
        let _ = writeln!(report, "audio.latency.frames = {size_frames}");
        let _ = writeln!(report, "audio.latency.msec   = {latency_msec:.2}");
        report.push_str(&ctx.cpu.dump(self.sample_rate));

        result.append_message(&report);
        result.set_result_code(ResultCode::Success);
        result.set_measurement(size_frames as f64);
    }

    fn current_num_voices(&mut self, ctx: &HarnessCtx<'_>) -> u32 {
        let voices = self.load.voices_for_note(ctx.window.note_counter());
        if self.verbose {
            debug!(note = ctx.window.note_counter(), voices, "current voices");
        }
        voices
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use super::*;
    use crate::{
        harness::MeasurementWindow,
        latency::{GlitchMonitor, GlitchNotice, VoicesMode},
        sink::{AudioSink, SimulatedSink, UnderrunPlan},
        timing::{CpuMeter, JitterRecorder},
    };

    struct Fixture {
        config: HarnessConfig,
        sink: SimulatedSink,
        window: MeasurementWindow,
        jitter: JitterRecorder,
        cpu: CpuMeter,
    }

    impl Fixture {
        fn new(max_frames: u32) -> Self {
            let mut sink = SimulatedSink::new(max_frames)
                .with_plan(UnderrunPlan::AtFrames(vec![0]));
            sink.open(48_000, 192).unwrap();
            Self {
                config: HarnessConfig::default().with_timing(48_000, 192, 5),
                sink,
                window: MeasurementWindow::new(),
                jitter: JitterRecorder::new(),
                cpu: CpuMeter::new(),
            }
        }

        fn ctx(&mut self) -> HarnessCtx<'_> {
            HarnessCtx {
                config: &self.config,
                sink: &mut self.sink,
                window: &mut self.window,
                jitter: &mut self.jitter,
                cpu: &self.cpu,
            }
        }
    }

    #[test]
    fn begin_pins_one_burst() {
        let mut fx = Fixture::new(3072);
        let mut probe = LatencyProbe::new(&fx.config);
        probe.on_begin_measurement(&mut fx.ctx()).unwrap();
        assert_eq!(fx.sink.buffer_size_in_frames(), 192);
    }

    #[test]
    fn startup_underruns_are_absorbed() {
        let mut fx = Fixture::new(3072);
        let mut probe = LatencyProbe::new(&fx.config);
        probe.on_begin_measurement(&mut fx.ctx()).unwrap();
        // Underrun already pending when the first check runs
        fx.sink.write(&[0.0; 192]).unwrap();
        assert_eq!(fx.sink.underrun_count(), 1);

        assert_eq!(probe.on_before_note(&mut fx.ctx()).unwrap(), NoteAction::Continue);
        assert_eq!(probe.on_before_note(&mut fx.ctx()).unwrap(), NoteAction::Continue);
        assert_eq!(fx.sink.buffer_size_in_frames(), 192);
        assert_eq!(probe.restarts(), 0);
    }

    #[test]
    fn growth_resets_window_and_records_glitch_time() {
        let mut fx = Fixture::new(3072);
        let mut probe = LatencyProbe::new(&fx.config);
        probe.on_begin_measurement(&mut fx.ctx()).unwrap();
        probe.on_before_note(&mut fx.ctx()).unwrap();

        fx.sink.write(&[0.0; 192]).unwrap();
        fx.window.advance_frames(24_000);
        fx.window.next_note();
        assert_eq!(probe.on_before_note(&mut fx.ctx()).unwrap(), NoteAction::Restarted);
        assert_eq!(fx.window, MeasurementWindow::new());
        assert_eq!(probe.last_glitch_secs(), 0.5);
        assert_eq!(probe.restarts(), 1);

        // Same count again: no growth
        assert_eq!(probe.on_before_note(&mut fx.ctx()).unwrap(), NoteAction::Continue);
        assert_eq!(fx.sink.buffer_size_in_frames(), 384);
    }

    #[test]
    fn fails_when_sink_cannot_grow() {
        let mut fx = Fixture::new(192);
        let mut probe = LatencyProbe::new(&fx.config);
        probe.on_begin_measurement(&mut fx.ctx()).unwrap();
        probe.on_before_note(&mut fx.ctx()).unwrap();
        fx.sink.write(&[0.0; 192]).unwrap();

        let err = probe.on_before_note(&mut fx.ctx()).unwrap_err();
        assert!(matches!(
            err,
            MarkError::BufferAtMaximum {
                requested: 384,
                actual: 192
            }
        ));
        assert_eq!(fx.sink.buffer_size_in_frames(), 192);
    }

    #[test]
    fn maximum_between_bursts_leaves_buffer_untouched() {
        let mut fx = Fixture::new(300);
        let mut probe = LatencyProbe::new(&fx.config);
        probe.on_begin_measurement(&mut fx.ctx()).unwrap();
        probe.on_before_note(&mut fx.ctx()).unwrap();
        fx.sink.write(&[0.0; 192]).unwrap();

        let err = probe.on_before_note(&mut fx.ctx()).unwrap_err();
        assert!(matches!(
            err,
            MarkError::BufferAtMaximum {
                requested: 384,
                actual: 300
            }
        ));
        assert_eq!(fx.sink.buffer_size_in_frames(), 192);
        assert_eq!(fx.sink.resize_history(), &[192]);
    }

    #[test]
    fn each_growth_is_reported() {
        let mut fx = Fixture::new(3072);
        fx.sink.set_buffer_size_in_frames(192);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&seen);
        let monitor = GlitchMonitor::new(fx.sink.buffer_size_watch(), 192, 4)
            .with_period(Duration::from_secs(30));
        let mut probe = LatencyProbe::new(&fx.config);
        probe.attach_reporter(monitor.reporter());
        let guard = monitor
            .start(move |n: &GlitchNotice| collected.lock().unwrap().push(*n))
            .unwrap();

        probe.on_begin_measurement(&mut fx.ctx()).unwrap();
        probe.on_before_note(&mut fx.ctx()).unwrap();
        fx.sink.write(&[0.0; 192]).unwrap();
        fx.window.advance_frames(12_000);
        probe.on_before_note(&mut fx.ctx()).unwrap();
        probe.detach_reporter();

        assert_eq!(guard.stop(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].buffer_size, 384);
        assert_eq!(seen[0].glitch_time_secs, 0.25);
    }

    #[test]
    fn load_pattern_restarts_with_each_run() {
        let mut fx = Fixture::new(3072);
        fx.config = fx
            .config
            .clone()
            .with_voices(10, 40, VoicesMode::LinearLoop);
        let mut probe = LatencyProbe::new(&fx.config);

        let mut first_per_run = Vec::new();
        for _ in 0..2 {
            fx.window.restart();
            probe.on_begin_measurement(&mut fx.ctx()).unwrap();
            first_per_run.push(probe.current_num_voices(&fx.ctx()));
            for _ in 0..5 {
                fx.window.next_note();
            }
            assert_eq!(probe.current_num_voices(&fx.ctx()), 15);
        }
        assert_eq!(first_per_run, vec![10, 10]);
    }

    #[test]
    fn step_comes_from_config() {
        let mut fx = Fixture::new(3072);
        fx.config = fx
            .config
            .clone()
            .with_voices(4, 20, VoicesMode::Switch)
            .with_notes_per_step(4);
        let mut probe = LatencyProbe::new(&fx.config);
        probe.on_begin_measurement(&mut fx.ctx()).unwrap();

        let mut seq = Vec::new();
        for _ in 0..4 {
            seq.push(probe.current_num_voices(&fx.ctx()));
            fx.window.next_note();
        }
        assert_eq!(seq, vec![4, 4, 20, 20]);
    }

    #[test]
    fn end_reports_latency() {
        let mut fx = Fixture::new(3072);
        let mut probe = LatencyProbe::new(&fx.config);
        probe.on_begin_measurement(&mut fx.ctx()).unwrap();
        fx.sink.set_buffer_size_in_frames(384);

        let mut result = MarkResult::new(TEST_NAME);
        probe.on_end_measurement(&mut fx.ctx(), &mut result);
        assert_eq!(result.result_code(), ResultCode::Success);
        assert_eq!(result.measurement(), 384.0);
        assert!(result.message().contains("audio.latency.bursts = 2"));
        assert!(result.message().contains("audio.latency.msec   = 8.00"));
        assert!(result.message().contains("cpu.load.mean.percent"));
    }
}
