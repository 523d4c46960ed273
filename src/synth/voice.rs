use crate::MIN_TIME;

/// Convert MIDI note number to frequency in Hz.
/// A4 = 440 Hz = MIDI note 69
#[inline]
pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Stage of the linear ADSR state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Linear ADSR envelope.
///
/// Release ramps from whatever level the envelope had at note-off, so a
/// note released mid-attack does not click.
#[derive(Debug, Clone)]
pub struct Envelope {
    attack_step: f32,
    decay_time: f32,
    sustain_level: f32,
    release_samples: u32,
    sample_rate: f32,

    stage: EnvelopeStage,
    level: f32,
    release_start: f32,
    release_elapsed: u32,
}

impl Envelope {
    pub fn adsr(sample_rate: f32, attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack_step: 1.0 / (attack.max(MIN_TIME) * sample_rate),
            decay_time: decay.max(MIN_TIME),
            sustain_level: sustain.clamp(0.0, 1.0),
            release_samples: (release.max(MIN_TIME) * sample_rate).round().max(1.0) as u32,
            sample_rate,
            stage: EnvelopeStage::Idle,
            level: 0.0,
            release_start: 0.0,
            release_elapsed: 0,
        }
    }

    pub fn note_on(&mut self) {
        self.level = 0.0;
        self.stage = EnvelopeStage::Attack;
    }

    pub fn note_off(&mut self) {
        if self.stage == EnvelopeStage::Idle {
            return;
        }
        self.release_start = self.level;
        self.release_elapsed = 0;
        self.stage = EnvelopeStage::Release;
    }

    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle => self.level = 0.0,
            EnvelopeStage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                self.level -= (1.0 - self.sustain_level) / (self.decay_time * self.sample_rate);
                if self.level <= self.sustain_level {
                    self.level = self.sustain_level;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => self.level = self.sustain_level,
            EnvelopeStage::Release => {
                let progress = self.release_elapsed as f32 / self.release_samples as f32;
                self.level = (self.release_start * (1.0 - progress)).max(0.0);
                self.release_elapsed += 1;
                if self.release_elapsed >= self.release_samples {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }
        self.level
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Free,      // Available for allocation
    Active,    // Gate high
    Releasing, // Gate low, envelope still ringing
}

/// One sawtooth voice with an amplitude envelope.
#[derive(Debug, Clone)]
pub struct Voice {
    note: u8,
    state: VoiceState,
    age: u64,
    phase: f32,
    phase_step: f32,
    sample_rate: f32,
    envelope: Envelope,
}

impl Voice {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            note: 0,
            state: VoiceState::Free,
            age: 0,
            phase: 0.0,
            phase_step: 0.0,
            sample_rate,
            envelope: Envelope::adsr(sample_rate, 0.005, 0.05, 0.6, 0.1),
        }
    }

    pub fn start(&mut self, note: u8, age: u64) {
        self.note = note;
        self.state = VoiceState::Active;
        self.age = age;
        self.phase = 0.0;
        self.phase_step = midi_note_to_freq(note) / self.sample_rate;
        self.envelope.note_on();
    }

    pub fn release(&mut self) {
        if self.state == VoiceState::Active {
            self.state = VoiceState::Releasing;
            self.envelope.note_off();
        }
    }

    /// Add this voice into `out`.
    pub fn render_add(&mut self, out: &mut [f32], gain: f32) {
        for sample in out.iter_mut() {
            let saw = 2.0 * self.phase - 1.0;
            self.phase += self.phase_step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            *sample += saw * self.envelope.next_sample() * gain;
        }
        if self.state == VoiceState::Releasing && self.envelope.is_idle() {
            self.state = VoiceState::Free;
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == VoiceState::Free
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn age(&self) -> u64 {
        self.age
    }
}
