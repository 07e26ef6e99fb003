use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{MIDI_MAX, PlaybackError};

/// Upper bound for any time in a sequence: event start, event end and overall duration.
pub const MAX_SEQUENCE_SECONDS: f64 = 24.0 * 60.0 * 60.0;

/// A single timed note. Times are seconds relative to the sequence start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub note: u8,
    pub velocity: u8,
    pub start: f64,
    pub duration: f64,
}

impl NoteEvent {
    pub fn new(note: u8, velocity: u8, start: f64, duration: f64) -> Self {
        Self { note, velocity, start, duration }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceTrack {
    #[serde(default)]
    pub name: String,
    pub events: Vec<NoteEvent>,
}

impl SequenceTrack {
    pub fn new(name: impl Into<String>, events: Vec<NoteEvent>) -> Self {
        Self { name: name.into(), events }
    }
}

/// On-disk shape. `duration` may be omitted and is then derived from the events.
#[derive(Debug, Deserialize)]
struct SequenceFile {
    #[serde(default)]
    duration: Option<f64>,
    tracks: Vec<SequenceTrack>,
}

/// A static, validated set of tracks with a common duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NoteSequence {
    tracks: Vec<SequenceTrack>,
    duration: f64,
}

impl NoteSequence {
    /// Validates every event and sorts each track by start time.
    pub fn new(mut tracks: Vec<SequenceTrack>, duration: Option<f64>) -> Result<Self, PlaybackError> {
        for (track_idx, track) in tracks.iter_mut().enumerate() {
            for event in &track.events {
                validate_event(track_idx, event)?;
            }
            track.events.sort_by(|a, b| a.start.total_cmp(&b.start));
        }

        let latest_end = tracks
            .iter()
            .flat_map(|t| t.events.iter())
            .map(NoteEvent::end)
            .fold(0.0_f64, f64::max);

        let duration = match duration {
            Some(d) if !d.is_finite() || d < 0.0 => {
                return Err(PlaybackError::InvalidSequence(format!("duration {d} is not a non-negative number")));
            }
            Some(d) if d > MAX_SEQUENCE_SECONDS => {
                return Err(PlaybackError::InvalidSequence(format!(
                    "duration {d} exceeds {MAX_SEQUENCE_SECONDS} seconds"
                )));
            }
            Some(d) => d,
            None => latest_end,
        };

        Ok(Self { tracks, duration })
    }

    pub fn from_json_str(json: &str) -> Result<Self, PlaybackError> {
        let file: SequenceFile = serde_json::from_str(json)?;
        Self::new(file.tracks, file.duration)
    }

    pub fn load(path: &Path) -> Result<Self, PlaybackError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn tracks(&self) -> &[SequenceTrack] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&SequenceTrack> {
        self.tracks.get(index)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Index of the first track that has at least one event.
    pub fn first_playable_track(&self) -> Option<usize> {
        self.tracks.iter().position(|t| !t.events.is_empty())
    }
}

fn validate_event(track_idx: usize, event: &NoteEvent) -> Result<(), PlaybackError> {
    let invalid = |what: &str| -> Result<(), PlaybackError> {
        Err(PlaybackError::InvalidSequence(format!(
            "track {track_idx}: note {} at {}: {what}",
            event.note, event.start
        )))
    };
    if event.note > MIDI_MAX {
        return invalid("note number above 127");
    }
    if event.velocity > MIDI_MAX {
        return invalid("velocity above 127");
    }
    if !event.start.is_finite() || event.start < 0.0 {
        return invalid("start must be a non-negative number");
    }
    if !event.duration.is_finite() || event.duration < 0.0 {
        return invalid("duration must be a non-negative number");
    }
    if event.end() > MAX_SEQUENCE_SECONDS {
        return invalid("ends after the longest supported sequence");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_derived_from_latest_event_end() {
        let json = r#"{
            "tracks": [
                { "name": "lead", "events": [
                    { "note": 64, "velocity": 90, "start": 1.5, "duration": 0.75 },
                    { "note": 60, "velocity": 100, "start": 0.5, "duration": 0.5 }
                ] }
            ]
        }"#;
        let seq = NoteSequence::from_json_str(json).unwrap();
        assert_eq!(seq.duration(), 2.25);
        // Sorted by start on load
        assert_eq!(seq.tracks()[0].events[0].note, 60);
    }

    #[test]
    fn explicit_duration_wins() {
        let seq = NoteSequence::new(
            vec![SequenceTrack::new("a", vec![NoteEvent::new(60, 100, 0.5, 0.5)])],
            Some(2.0),
        )
        .unwrap();
        assert_eq!(seq.duration(), 2.0);
    }

    #[test]
    fn first_playable_track_skips_empty_tracks() {
        let seq = NoteSequence::new(
            vec![
                SequenceTrack::new("empty", vec![]),
                SequenceTrack::new("bass", vec![NoteEvent::new(36, 80, 0.0, 1.0)]),
            ],
            None,
        )
        .unwrap();
        assert_eq!(seq.first_playable_track(), Some(1));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let err = NoteSequence::new(
            vec![SequenceTrack::new("a", vec![NoteEvent::new(60, 100, 0.0, -1.0)])],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidSequence(_)));
    }

    #[test]
    fn times_beyond_the_supported_length_are_rejected() {
        let json = r#"{"tracks":[{"events":[{"note":60,"velocity":100,"start":1e20,"duration":1.0}]}]}"#;
        assert!(matches!(NoteSequence::from_json_str(json), Err(PlaybackError::InvalidSequence(_))));

        let long_note = NoteEvent::new(60, 100, MAX_SEQUENCE_SECONDS - 1.0, 2.0);
        let err = NoteSequence::new(vec![SequenceTrack::new("a", vec![long_note])], None).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidSequence(_)));

        let err = NoteSequence::new(vec![], Some(MAX_SEQUENCE_SECONDS * 2.0)).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidSequence(_)));

        let at_limit = NoteEvent::new(60, 100, MAX_SEQUENCE_SECONDS - 1.0, 1.0);
        assert!(NoteSequence::new(vec![SequenceTrack::new("a", vec![at_limit])], None).is_ok());
    }

    #[test]
    fn velocity_above_midi_range_is_rejected() {
        let err = NoteSequence::new(
            vec![SequenceTrack::new("a", vec![NoteEvent::new(60, 200, 0.0, 1.0)])],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidSequence(_)));
    }
}
