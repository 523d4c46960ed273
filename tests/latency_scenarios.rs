use std::sync::{Arc, Mutex};

use saavy_mark::{
    config::HarnessConfig,
    latency::{GlitchNotice, LatencyMark, LoadGenerator, VoicesMode},
    sink::{AudioSink, SimulatedSink, UnderrunPlan},
    MarkError, ResultCode,
};

const BURST: u32 = 192;

fn config(seconds: u32) -> HarnessConfig {
    HarnessConfig::default().with_timing(48_000, BURST, seconds)
}

fn starving(bursts: u32) -> UnderrunPlan {
    UnderrunPlan::RequireBursts {
        bursts,
        every_frames: 8 * BURST as u64,
    }
}

#[test]
fn clean_run_stays_at_one_burst() {
    let mut mark = LatencyMark::new(config(5), SimulatedSink::new(16 * BURST)).unwrap();
    let result = mark.run().unwrap();

    assert_eq!(result.result_code(), ResultCode::Success);
    assert_eq!(result.measurement(), 192.0);
    assert!(result.message().contains("audio.latency.bursts = 1"));
    assert!(result.message().contains("audio.latency.msec   = 4.00"));
    assert_eq!(mark.probe().restarts(), 0);
    assert_eq!(mark.into_sink().frames_written(), 240_000);
}

#[test]
fn single_glitch_grows_one_burst_and_restarts_window() {
    let sink = SimulatedSink::new(16 * BURST).with_plan(UnderrunPlan::AtFrames(vec![48_000]));
    let mut mark = LatencyMark::new(config(5), sink).unwrap();

    let (seen, handler) = collecting();
    let result = mark.run_with_notices(handler).unwrap();

    assert_eq!(result.measurement(), 384.0);
    assert!(result.message().contains("audio.latency.msec   = 8.00"));
    assert_eq!(mark.probe().restarts(), 1);
    // Seen at the note boundary after frame 48000
    assert_eq!(mark.probe().last_glitch_secs(), 1.008);

    let notices = seen.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].buffer_size, 384);
    assert_eq!(notices[0].bursts(), 2);

    // One full window after the restart
    assert_eq!(mark.into_sink().frames_written(), 48_384 + 240_000);
}

fn collecting() -> (
    Arc<Mutex<Vec<GlitchNotice>>>,
    impl FnMut(&GlitchNotice) + Send + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&seen);
    (seen, move |n: &GlitchNotice| collected.lock().unwrap().push(*n))
}

#[test]
fn starved_sink_settles_at_required_size() {
    let sink = SimulatedSink::new(16 * BURST).with_plan(starving(4));
    let mut mark = LatencyMark::new(config(2), sink).unwrap();
    let (seen, handler) = collecting();
    let result = mark.run_with_notices(handler).unwrap();

    assert_eq!(result.measurement(), 768.0);
    assert_eq!(mark.probe().restarts(), 3);
    // Growths land well inside one monitor poll; each is still notified
    let sizes: Vec<u32> = seen.lock().unwrap().iter().map(|n| n.buffer_size).collect();
    assert_eq!(sizes, vec![384, 576, 768]);
    assert_eq!(mark.into_sink().resize_history(), &[192, 384, 576, 768]);
}

#[test]
fn each_underrun_adds_one_burst() {
    for n in [0u32, 1, 2, 5, 8] {
        // One underrun every 30000 frames: each falls in a different note
        let plan = UnderrunPlan::AtFrames((1..=n as u64).map(|k| k * 30_000).collect());
        let sink = SimulatedSink::new(16 * BURST).with_plan(plan);
        let mut mark = LatencyMark::new(config(1), sink).unwrap();
        let result = mark.run().unwrap();

        let expected = BURST * (n + 1);
        assert_eq!(result.measurement(), expected as f64, "{n} underruns");
        assert_eq!(mark.probe().restarts(), n, "{n} underruns");
        let history: Vec<u32> = (1..=n + 1).map(|b| b * BURST).collect();
        assert_eq!(mark.into_sink().resize_history(), history.as_slice());
    }
}

#[test]
fn maximum_between_bursts_stops_at_last_whole_burst() {
    let sink = SimulatedSink::new(500).with_plan(starving(5));
    let mut mark = LatencyMark::new(config(2), sink).unwrap();
    let err = mark.run().unwrap_err();

    assert!(matches!(
        err,
        MarkError::BufferAtMaximum {
            requested: 576,
            actual: 500
        }
    ));
    let sink = mark.into_sink();
    assert_eq!(sink.resize_history(), &[192, 384]);
    assert_eq!(sink.buffer_size_in_frames() % BURST, 0);
}

#[test]
fn repeated_runs_give_the_same_search() {
    let config = config(2).with_voices(4, 24, VoicesMode::LinearLoop);
    let sink = SimulatedSink::new(16 * BURST).with_plan(starving(3));
    let mut mark = LatencyMark::new(config, sink).unwrap();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (seen, handler) = collecting();
        let result = mark.run_with_notices(handler).unwrap();
        let sizes: Vec<u32> = seen.lock().unwrap().iter().map(|n| n.buffer_size).collect();
        runs.push((result.measurement(), mark.probe().restarts(), sizes));
    }
    assert_eq!(runs[0], (576.0, 2, vec![384, 576]));
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn fails_when_buffer_cannot_grow() {
    let sink = SimulatedSink::new(3 * BURST).with_plan(starving(5));
    let mut mark = LatencyMark::new(config(2), sink).unwrap();
    let err = mark.run().unwrap_err();

    assert!(matches!(
        err,
        MarkError::BufferAtMaximum {
            requested: 768,
            actual: 576
        }
    ));
    assert_eq!(ResultCode::from(&err), ResultCode::UnrecoverableError);
    assert_eq!(ResultCode::from(&err).code(), -1);
    assert_eq!(mark.into_sink().resize_history(), &[192, 384, 576]);
}

#[test]
fn invalid_config_is_rejected_before_opening() {
    let err = LatencyMark::new(config(0), SimulatedSink::new(16 * BURST))
        .err()
        .unwrap();
    assert_eq!(ResultCode::from(&err), ResultCode::InvalidConfig);
}

#[test]
fn burst_larger_than_sink_is_a_device_error() {
    let mut mark = LatencyMark::new(config(1), SimulatedSink::new(BURST / 2)).unwrap();
    let err = mark.run().unwrap_err();
    assert_eq!(ResultCode::from(&err), ResultCode::DeviceError);
}

#[test]
fn modulated_load_still_finds_latency() {
    let config = config(3).with_voices(4, 24, VoicesMode::Random).with_seed(7);
    let sink = SimulatedSink::new(16 * BURST).with_plan(starving(2));
    let mut mark = LatencyMark::new(config, sink).unwrap();
    let result = mark.run().unwrap();
    assert_eq!(result.measurement(), 384.0);
}

#[test]
fn random_load_is_reproducible_from_seed() {
    let pattern = |seed| {
        let mut gen = LoadGenerator::new(VoicesMode::Random, 8, 48, seed);
        (0..100).map(|n| gen.voices_for_note(n)).collect::<Vec<_>>()
    };
    assert_eq!(pattern(42), pattern(42));
    assert_ne!(pattern(42), pattern(43));
    assert!(pattern(42).iter().all(|v| (8..=48).contains(v)));
}
