//! Generic note-by-note measurement loop.
//!
//! The harness owns the sink, the workload synthesizer and the timing
//! collaborators. A measurement decides what to do at each lifecycle point by
//! implementing [`MeasurementHooks`]; the harness only schedules notes,
//! renders bursts and writes them until the window is full.

use std::time::Instant;

use tracing::{debug, info};

use crate::{
    config::HarnessConfig,
    error::Result,
    result::MarkResult,
    sink::AudioSink,
    synth::Synthesizer,
    timing::{CpuMeter, JitterRecorder},
};

/// Frame and note position inside the current measurement window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeasurementWindow {
    frame_counter: u64,
    note_counter: u32,
}

impl MeasurementWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the window over; the run then needs a full duration again.
    pub fn restart(&mut self) {
        self.frame_counter = 0;
        self.note_counter = 0;
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn note_counter(&self) -> u32 {
        self.note_counter
    }

    pub(crate) fn advance_frames(&mut self, frames: u64) {
        self.frame_counter += frames;
    }

    pub(crate) fn next_note(&mut self) {
        self.note_counter += 1;
    }

    pub fn elapsed_secs(&self, sample_rate: u32) -> f64 {
        self.frame_counter as f64 / sample_rate as f64
    }
}

/// What a pre-note check did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteAction {
    Continue,
    Restarted,
}

/// Everything a hook may look at or change.
pub struct HarnessCtx<'a> {
    pub config: &'a HarnessConfig,
    pub sink: &'a mut dyn AudioSink,
    pub window: &'a mut MeasurementWindow,
    pub jitter: &'a mut JitterRecorder,
    pub cpu: &'a CpuMeter,
}

/// Lifecycle hooks of one kind of measurement.
pub trait MeasurementHooks {
    fn test_name(&self) -> &str;

    fn on_begin_measurement(&mut self, ctx: &mut HarnessCtx<'_>) -> Result<()>;

    /// Called before every note. An error aborts the run.
    fn on_before_note(&mut self, _ctx: &mut HarnessCtx<'_>) -> Result<NoteAction> {
        Ok(NoteAction::Continue)
    }

    /// Called once the window completed; fills in the result.
    fn on_end_measurement(&mut self, ctx: &mut HarnessCtx<'_>, result: &mut MarkResult);

    /// Voices to start for the note at `ctx.window.note_counter()`.
    fn current_num_voices(&mut self, ctx: &HarnessCtx<'_>) -> u32 {
        ctx.config.low_voices
    }
}

pub struct TestHarness<S: AudioSink> {
    config: HarnessConfig,
    sink: S,
    synth: Synthesizer,
    window: MeasurementWindow,
    jitter: JitterRecorder,
    cpu: CpuMeter,
    burst: Vec<f32>,
}

// One context per hook call; borrows the harness fields only for that call.
macro_rules! ctx {
    ($config:expr, $sink:expr, $window:expr, $jitter:expr, $cpu:expr) => {
        HarnessCtx {
            config: &*$config,
            sink: &mut *$sink,
            window: &mut *$window,
            jitter: &mut *$jitter,
            cpu: &*$cpu,
        }
    };
}

impl<S: AudioSink> TestHarness<S> {
    pub fn new(config: HarnessConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let synth = Synthesizer::new(config.sample_rate as f32, config.max_voices as usize);
        let burst = vec![0.0; config.frames_per_burst as usize];
        Ok(Self {
            config,
            sink,
            synth,
            window: MeasurementWindow::new(),
            jitter: JitterRecorder::new(),
            cpu: CpuMeter::new(),
            burst,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn window(&self) -> MeasurementWindow {
        self.window
    }

    /// Open the sink, run one measurement, close the sink.
    ///
    /// The sink is closed on every exit path; a measurement error wins over
    /// a close error.
    pub fn run(&mut self, hooks: &mut dyn MeasurementHooks) -> Result<MarkResult> {
        let mut result = MarkResult::new(hooks.test_name());
        self.sink
            .open(self.config.sample_rate, self.config.frames_per_burst)?;
        let measured = self.measure(hooks, &mut result);
        let closed = self.sink.close();
        measured?;
        closed?;
        Ok(result)
    }

    fn measure(&mut self, hooks: &mut dyn MeasurementHooks, result: &mut MarkResult) -> Result<()> {
        let Self {
            config,
            sink,
            synth,
            window,
            jitter,
            cpu,
            burst,
        } = self;

        let total_frames = config.total_frames();
        let frames_per_note = config.frames_per_note();
        let burst_frames = config.frames_per_burst;

        *synth = Synthesizer::new(config.sample_rate as f32, config.max_voices as usize);
        window.restart();
        cpu.reset();

        hooks.on_begin_measurement(&mut ctx!(config, sink, window, jitter, cpu))?;
        info!(
            test = hooks.test_name(),
            sample_rate = config.sample_rate,
            frames_per_burst = burst_frames,
            seconds = config.num_seconds,
            "measurement started"
        );

        let mut frames_into_note = 0u64;
        let mut gate_open = false;
        while window.frame_counter() < total_frames {
            if frames_into_note == 0 {
                let action = hooks.on_before_note(&mut ctx!(config, sink, window, jitter, cpu))?;
                if action == NoteAction::Restarted {
                    debug!(buffer_size = sink.buffer_size_in_frames(), "window restarted");
                }
                let voices = hooks.current_num_voices(&ctx!(config, sink, window, jitter, cpu));
                synth.all_notes_off();
                synth.note_on(voices);
                gate_open = true;
                window.next_note();
            } else if gate_open && frames_into_note >= frames_per_note / 2 {
                synth.all_notes_off();
                gate_open = false;
            }

            let wakeup = Instant::now();
            synth.render(burst);
            let render = wakeup.elapsed();
            sink.write(burst)?;
            jitter.record_burst(wakeup, render);
            cpu.record(render, burst_frames, config.sample_rate);

            window.advance_frames(burst_frames as u64);
            frames_into_note += burst_frames as u64;
            if frames_into_note >= frames_per_note {
                frames_into_note = 0;
            }
        }

        hooks.on_end_measurement(&mut ctx!(config, sink, window, jitter, cpu), result);
        info!(
            test = hooks.test_name(),
            measurement = result.measurement(),
            "measurement finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{result::ResultCode, sink::SimulatedSink};

    /// Records the note indices it was asked about.
    struct CountingHooks {
        notes: Vec<u32>,
        begun: bool,
    }

    impl MeasurementHooks for CountingHooks {
        fn test_name(&self) -> &str {
            "Counting"
        }

        fn on_begin_measurement(&mut self, _ctx: &mut HarnessCtx<'_>) -> Result<()> {
            self.begun = true;
            Ok(())
        }

        fn on_end_measurement(&mut self, ctx: &mut HarnessCtx<'_>, result: &mut MarkResult) {
            result.set_measurement(ctx.window.frame_counter() as f64);
            result.set_result_code(ResultCode::Success);
        }

        fn current_num_voices(&mut self, ctx: &HarnessCtx<'_>) -> u32 {
            self.notes.push(ctx.window.note_counter());
            2
        }
    }

    #[test]
    fn fills_window_one_note_at_a_time() {
        let config = HarnessConfig::default().with_timing(48_000, 192, 1);
        let mut harness = TestHarness::new(config, SimulatedSink::new(3072)).unwrap();
        let mut hooks = CountingHooks {
            notes: Vec::new(),
            begun: false,
        };

        let result = harness.run(&mut hooks).unwrap();
        assert!(hooks.begun);
        assert_eq!(result.test_name(), "Counting");
        assert_eq!(result.measurement(), 48_000.0);
        // 48000 frames / 12096 frames per note, rounded up
        assert_eq!(hooks.notes, vec![0, 1, 2, 3]);
        assert_eq!(harness.sink().frames_written(), 48_000);
        assert_eq!(harness.window().note_counter(), 4);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = HarnessConfig::default().with_timing(0, 192, 1);
        assert!(TestHarness::new(config, SimulatedSink::new(3072)).is_err());
    }
}
