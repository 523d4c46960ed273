//! Workload synthesizer.
//!
//! A fixed pool of sawtooth voices. The harness decides how many voices a
//! note uses; this module only has to cost a predictable amount of CPU per
//! voice and sound like something when played through a device.

pub mod voice;

pub use voice::{Envelope, EnvelopeStage, Voice, VoiceState};

// Voices are spread upward from here in a repeating chord shape
const BASE_NOTE: u8 = 48;
const CHORD_STEPS: [u8; 4] = [0, 4, 7, 12];

pub struct Synthesizer {
    voices: Vec<Voice>,
    frame_counter: u64,
    gain: f32,
}

impl Synthesizer {
    pub fn new(sample_rate: f32, max_voices: usize) -> Self {
        Self {
            voices: (0..max_voices).map(|_| Voice::new(sample_rate)).collect(),
            frame_counter: 0,
            gain: 1.0 / (max_voices.max(1) as f32).sqrt(),
        }
    }

    /// Start `count` voices. Returns how many could be allocated.
    pub fn note_on(&mut self, count: u32) -> u32 {
        let mut started = 0;
        for i in 0..count as usize {
            let octave = (i / CHORD_STEPS.len()) as u8 % 4;
            let note = BASE_NOTE + CHORD_STEPS[i % CHORD_STEPS.len()] + 12 * octave;
            let age = self.frame_counter;
            match self.allocate_voice() {
                Some(voice) => voice.start(note, age),
                None => break,
            }
            started += 1;
        }
        started
    }

    pub fn all_notes_off(&mut self) {
        for voice in &mut self.voices {
            voice.release();
        }
    }

    /// Render one block, replacing the contents of `out`.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let gain = self.gain;
        for voice in self.voices.iter_mut().filter(|v| !v.is_free()) {
            voice.render_add(out, gain);
        }
        self.frame_counter += out.len() as u64;
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_free()).count()
    }

    fn allocate_voice(&mut self) -> Option<&mut Voice> {
        // First pass: find free voice index
        if let Some(idx) = self.voices.iter().position(|v| v.is_free()) {
            return Some(&mut self.voices[idx]);
        }

        // Second pass: steal oldest releasing voice
        let steal_idx = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.state() == VoiceState::Releasing)
            .min_by_key(|(_, v)| v.age())
            .map(|(idx, _)| idx);

        steal_idx.map(|idx| &mut self.voices[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_requested_voices() {
        let mut synth = Synthesizer::new(48_000.0, 16);
        assert_eq!(synth.note_on(6), 6);
        assert_eq!(synth.active_voices(), 6);

        let mut out = vec![0.0f32; 192];
        synth.render(&mut out);
        assert!(out.iter().any(|s| s.abs() > 0.0));
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn steals_releasing_voices_when_full() {
        let mut synth = Synthesizer::new(48_000.0, 4);
        assert_eq!(synth.note_on(4), 4);
        // Pool exhausted, nothing releasing yet
        assert_eq!(synth.note_on(2), 0);

        synth.all_notes_off();
        assert_eq!(synth.note_on(2), 2);
        assert_eq!(synth.active_voices(), 4);
    }
}
