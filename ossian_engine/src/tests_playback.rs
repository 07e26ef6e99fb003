use crate::export::{ExportBitDepth, ExportConfig, bounce, bounce_to_wav};
use crate::nodes::PreviewTone;
use crate::producer::SynthEngine;
use ossian_shared::{NoteEvent, NoteSequence, PlaybackConfig, PlaybackError, SequenceTrack};

/// Outputs a constant level while any note is held.
#[derive(Default)]
struct DcSynth {
    held: usize,
}

impl SynthEngine for DcSynth {
    fn note_on(&mut self, _note: u8, _velocity: u8) {
        self.held += 1;
    }

    fn note_off(&mut self, _note: u8) {
        self.held = self.held.saturating_sub(1);
    }

    fn all_notes_off(&mut self) {
        self.held = 0;
    }

    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let level = if self.held > 0 { 0.5 } else { 0.0 };
        left.fill(level);
        right.fill(level);
    }
}

fn half_second_note() -> NoteSequence {
    NoteSequence::new(
        vec![SequenceTrack::new("lead", vec![NoteEvent::new(60, 100, 0.5, 0.5)])],
        Some(1.0),
    )
    .unwrap()
}

#[test]
fn bounce_places_note_after_its_start_with_bounded_latency() {
    let config = PlaybackConfig::default();
    let out = bounce(half_second_note(), None, DcSynth::default(), &config, 0.25).unwrap();

    // 1.0 s sequence + 100 ms end guard + 250 ms tail
    assert_eq!(out.frames(), 64_800);
    assert_eq!(out.underruns, 0);

    let left: Vec<f32> = out.samples.chunks_exact(2).map(|f| f[0]).collect();
    assert!(left[..24_000].iter().all(|&s| s == 0.0), "sound before the note starts");
    assert!(left[60_000..].iter().all(|&s| s == 0.0), "note still sounding in the tail");

    let sounding = left.iter().filter(|&&s| s != 0.0).count();
    assert!((sounding as i64 - 24_000).abs() <= 2048, "sounding for {sounding} frames");

    // Latency never exceeds the pool
    let onset = left.iter().position(|&s| s != 0.0).unwrap();
    assert!(onset < 24_000 + config.pool_size * config.block_frames + config.block_frames);
}

#[test]
fn bounce_is_deterministic() {
    let config = PlaybackConfig::default();
    let a = bounce(half_second_note(), None, PreviewTone::new(48_000.0), &config, 0.1).unwrap();
    let b = bounce(half_second_note(), None, PreviewTone::new(48_000.0), &config, 0.1).unwrap();
    assert_eq!(a.samples, b.samples);
    assert!(a.samples.iter().any(|&s| s.abs() > 0.01));
}

#[test]
fn bounce_rejects_unknown_track() {
    let err = bounce(half_second_note(), Some(4), DcSynth::default(), &PlaybackConfig::default(), 0.0)
        .unwrap_err();
    assert!(matches!(err, PlaybackError::TrackOutOfRange { index: 4, count: 1 }));
}

#[test]
fn bounce_length_is_exact_and_rejects_unbounded_tail() {
    let config = PlaybackConfig {
        sample_rate: 44_100,
        ..PlaybackConfig::default()
    };
    // 1.0 s + 100 ms guard + 100 ms tail
    let out = bounce(half_second_note(), None, DcSynth::default(), &config, 0.1).unwrap();
    assert_eq!(out.frames(), 52_920);

    let err = bounce(half_second_note(), None, DcSynth::default(), &config, f64::INFINITY).unwrap_err();
    assert!(matches!(err, PlaybackError::InvalidConfig(_)));
}

#[test]
fn bounce_of_empty_track_is_silent() {
    let seq = NoteSequence::new(
        vec![
            SequenceTrack::new("empty", vec![]),
            SequenceTrack::new("lead", vec![NoteEvent::new(60, 100, 0.0, 0.2)]),
        ],
        None,
    )
    .unwrap();
    let out = bounce(seq, Some(0), DcSynth::default(), &PlaybackConfig::default(), 0.0).unwrap();
    assert!(out.frames() > 0);
    assert!(out.samples.iter().all(|&s| s == 0.0));
}

#[test]
fn bounce_to_wav_writes_what_was_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bounce.wav");
    let export = ExportConfig {
        bit_depth: ExportBitDepth::Float32,
        tail_seconds: 0.2,
        ..ExportConfig::default()
    };
    let config = PlaybackConfig {
        sample_rate: 44_100,
        ..PlaybackConfig::default()
    };
    let rendered =
        bounce_to_wav(&path, half_second_note(), None, DcSynth::default(), &config, &export).unwrap();

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.channels, 2);
    let samples: Vec<f32> = reader.samples::<f32>().map(Result::unwrap).collect();
    assert_eq!(samples, rendered.samples);
}
