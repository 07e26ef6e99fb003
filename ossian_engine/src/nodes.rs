use crate::producer::SynthEngine;

/// One sine per held note. Used to audition sequences when no real engine is
/// attached; it has no envelopes or filters.
pub struct PreviewTone {
    sample_rate: f32,
    voices: Vec<ToneVoice>,
    pub gain: f32,
}

struct ToneVoice {
    note: u8,
    phase: f32,
    frequency: f32,
    amplitude: f32,
}

impl PreviewTone {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            voices: Vec::with_capacity(16),
            gain: 0.2,
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }
}

fn note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

impl SynthEngine for PreviewTone {
    fn note_on(&mut self, note: u8, velocity: u8) {
        self.voices.push(ToneVoice {
            note,
            phase: 0.0,
            frequency: note_to_frequency(note),
            amplitude: velocity as f32 / 127.0,
        });
    }

    fn note_off(&mut self, note: u8) {
        // Newest voice for the note goes first, matching one off per on
        if let Some(idx) = self.voices.iter().rposition(|v| v.note == note) {
            self.voices.remove(idx);
        }
    }

    fn all_notes_off(&mut self) {
        self.voices.clear();
    }

    fn set_parameter(&mut self, _id: u32, value: f32) {
        // Single parameter: output gain
        self.gain = value.clamp(0.0, 1.0);
    }

    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        for voice in &mut self.voices {
            let step = voice.frequency / self.sample_rate;
            for sample in left.iter_mut() {
                *sample += (voice.phase * std::f32::consts::TAU).sin() * voice.amplitude * self.gain;
                voice.phase = (voice.phase + step) % 1.0;
            }
        }
        right.copy_from_slice(left);
    }
}
