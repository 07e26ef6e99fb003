/// Transport state and the callbacks the scheduler drives
use crossbeam_channel::Sender;
use ossian_shared::SynthCommand;
use tracing::{debug, warn};

/// Transport state owned by the event scheduler
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_paused: bool,
    /// Elapsed seconds. Only refreshed on polls and transport changes while playing.
    pub position: f64,
    pub duration: f64,
    pub current_track: usize,
    pub looping: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_paused: false,
            position: 0.0,
            duration: 0.0,
            current_track: 0,
            looping: false,
        }
    }
}

/// Receiver of scheduled notes and transport notifications.
///
/// `note_on`/`note_off` are required; the observers default to no-ops.
pub trait TransportListener {
    fn note_on(&mut self, note: u8, velocity: u8);

    fn note_off(&mut self, note: u8);

    fn position_changed(&mut self, _position: f64, _duration: f64) {}

    fn play_state_changed(&mut self, _is_playing: bool) {}

    fn track_changed(&mut self, _track: usize) {}
}

/// Forwards scheduled notes to the block producer's synth.
#[derive(Clone)]
pub struct SynthCommandSink {
    tx: Sender<SynthCommand>,
}

impl SynthCommandSink {
    pub fn new(tx: Sender<SynthCommand>) -> Self {
        Self { tx }
    }

    fn send(&self, cmd: SynthCommand) {
        if self.tx.send(cmd).is_err() {
            warn!(?cmd, "Synth command dropped, producer is gone");
        }
    }
}

impl TransportListener for SynthCommandSink {
    fn note_on(&mut self, note: u8, velocity: u8) {
        self.send(SynthCommand::NoteOn { note, velocity });
    }

    fn note_off(&mut self, note: u8) {
        self.send(SynthCommand::NoteOff { note });
    }

    fn position_changed(&mut self, position: f64, duration: f64) {
        debug!(position, duration, "Position");
    }

    fn play_state_changed(&mut self, is_playing: bool) {
        debug!(is_playing, "Play state");
    }

    fn track_changed(&mut self, track: usize) {
        debug!(track, "Track selected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn sink_forwards_notes_as_synth_commands() {
        let (tx, rx) = unbounded();
        let mut sink = SynthCommandSink::new(tx);
        sink.note_on(60, 100);
        sink.position_changed(1.0, 2.0);
        sink.note_off(60);
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![SynthCommand::NoteOn { note: 60, velocity: 100 }, SynthCommand::NoteOff { note: 60 }]
        );
    }
}
