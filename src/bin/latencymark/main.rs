//! latencymark - find the smallest glitch-free output buffer
//!
//! Run with: cargo run --bin latencymark -- --voices 16 --voices-high 48 --voices-mode random

use clap::Parser;
use color_eyre::eyre::{eyre, Result as EyreResult};
use tracing::info;

use saavy_mark::{
    config::{
        HarnessConfig, DEFAULT_FRAMES_PER_BURST, DEFAULT_NOTE_MS, DEFAULT_NUM_SECONDS,
        DEFAULT_NUM_VOICES, DEFAULT_SAMPLE_RATE,
    },
    latency::{LatencyMark, VoicesMode, NOTES_PER_STEP},
    sink::{AudioSink, DeviceSink, SimulatedSink, UnderrunPlan},
    MarkError, ResultCode,
};

/// Measure the buffer latency a synth workload needs to run without glitches
#[derive(Parser, Debug)]
#[command(name = "latencymark", version)]
struct Args {
    #[arg(long, short = 'r', default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    #[arg(long, short = 'p', default_value_t = DEFAULT_FRAMES_PER_BURST)]
    frames_per_burst: u32,

    /// Glitch-free duration required, in seconds
    #[arg(long, short = 's', default_value_t = DEFAULT_NUM_SECONDS)]
    seconds: u32,

    /// Voices per note (the low end when modulating)
    #[arg(long, short = 'n', default_value_t = DEFAULT_NUM_VOICES)]
    voices: u32,

    /// High end of the voice range; 0 keeps the load constant
    #[arg(long, short = 'N', default_value_t = 0)]
    voices_high: u32,

    /// switch, random or linear
    #[arg(long, short = 'm', default_value_t = VoicesMode::Switch)]
    voices_mode: VoicesMode,

    /// Notes per full low/high cycle of the voices pattern
    #[arg(long, default_value_t = NOTES_PER_STEP)]
    notes_per_step: u32,

    /// Seed for the random voices pattern
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, default_value_t = DEFAULT_NOTE_MS)]
    note_ms: u32,

    /// Largest buffer the sink may grow to, in bursts
    #[arg(long, default_value_t = 64)]
    max_bursts: u32,

    /// Output device name (default device if omitted)
    #[arg(long)]
    device: Option<String>,

    /// Use a simulated sink instead of an audio device
    #[arg(long)]
    simulate: bool,

    /// Simulated sink glitches until the buffer holds this many bursts
    #[arg(long, default_value_t = 0, requires = "simulate")]
    sim_require_bursts: u32,

    /// Simulated sink glitches at these times, in seconds
    #[arg(long, value_delimiter = ',', requires = "simulate")]
    sim_glitch_at: Vec<f64>,

    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Args {
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            note_ms: self.note_ms,
            ..HarnessConfig::default()
        }
        .with_timing(self.sample_rate, self.frames_per_burst, self.seconds)
        .with_voices(self.voices, self.voices_high, self.voices_mode)
        .with_notes_per_step(self.notes_per_step)
        .with_seed(self.seed)
        .with_verbose(self.verbose)
    }

    fn underrun_plan(&self) -> UnderrunPlan {
        if self.sim_require_bursts > 0 {
            UnderrunPlan::RequireBursts {
                bursts: self.sim_require_bursts,
                every_frames: 8 * self.frames_per_burst as u64,
            }
        } else if !self.sim_glitch_at.is_empty() {
            let rate = self.sample_rate as f64;
            UnderrunPlan::AtFrames(
                self.sim_glitch_at
                    .iter()
                    .map(|secs| (secs.max(0.0) * rate) as u64)
                    .collect(),
            )
        } else {
            UnderrunPlan::None
        }
    }

    fn sink(&self) -> Result<Box<dyn AudioSink>, MarkError> {
        let capacity = self
            .max_bursts
            .max(1)
            .checked_mul(self.frames_per_burst)
            .ok_or_else(|| {
                MarkError::InvalidConfig(format!(
                    "{} bursts of {} frames overflow the buffer size",
                    self.max_bursts, self.frames_per_burst
                ))
            })?;
        Ok(if self.simulate {
            Box::new(SimulatedSink::new(capacity).with_plan(self.underrun_plan()))
        } else {
            Box::new(DeviceSink::new(self.device.clone(), capacity))
        })
    }
}

fn main() -> EyreResult<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = args.harness_config();
    info!(
        sample_rate = config.sample_rate,
        frames_per_burst = config.frames_per_burst,
        seconds = config.num_seconds,
        voices = config.low_voices,
        voices_high = config.high_voices,
        mode = %config.voices_mode,
        simulate = args.simulate,
        "LatencyMark"
    );

    let built = args
        .sink()
        .and_then(|sink| LatencyMark::new(config, sink));
    let mut mark = match built {
        Ok(mark) => mark,
        Err(err) => {
            eprintln!("LatencyMark failed: {err}");
            std::process::exit(ResultCode::from(&err).code());
        }
    };
    match mark.run() {
        Ok(result) => {
            print!("{}", result.message());
            let code = result.result_code();
            if !code.is_success() {
                return Err(eyre!("run finished with {code:?}"));
            }
            info!(
                frames = result.measurement(),
                restarts = mark.probe().restarts(),
                "latency mark found"
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("LatencyMark failed: {err}");
            std::process::exit(ResultCode::from(&err).code());
        }
    }
}
