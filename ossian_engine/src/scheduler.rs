//! Replays a [`NoteSequence`] track against a clock.
//!
//! Every `play()` issues one timeline batch holding a note-on and a note-off
//! per remaining event plus an end-of-sequence marker. Any transport change
//! cancels that batch as a whole before deciding anything else, and silences
//! whatever the scheduler had turned on. Nothing fires except from [`EventScheduler::poll`].

use std::collections::BTreeMap;
use std::time::Duration;

use ossian_shared::{NoteSequence, PlaybackConfig, PlaybackError};
use tracing::debug;

use crate::clock::Clock;
use crate::timeline::{BatchId, Timeline};
use crate::transport::{PlaybackState, TransportListener};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledAction {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    EndOfSequence,
}

/// Non-finite or out-of-range offsets saturate instead of panicking.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

pub struct EventScheduler<C: Clock, L: TransportListener> {
    clock: C,
    listener: L,
    sequence: NoteSequence,
    state: PlaybackState,
    timeline: Timeline<ScheduledAction>,
    /// Batch of the current schedule, if any
    schedule: Option<BatchId>,
    /// Clock seconds at which position 0 would have been, for the current play
    reference_start: f64,
    /// Note -> outstanding note-ons issued by this scheduler
    active_notes: BTreeMap<u8, usize>,
    last_report: Duration,
    end_guard: Duration,
    poll_interval: Duration,
}

impl<C: Clock, L: TransportListener> EventScheduler<C, L> {
    pub fn new(clock: C, listener: L, config: &PlaybackConfig) -> Self {
        Self {
            clock,
            listener,
            sequence: NoteSequence::default(),
            state: PlaybackState::default(),
            timeline: Timeline::new(),
            schedule: None,
            reference_start: 0.0,
            active_notes: BTreeMap::new(),
            last_report: Duration::ZERO,
            end_guard: config.end_guard(),
            poll_interval: config.position_poll(),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn sequence(&self) -> &NoteSequence {
        &self.sequence
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Live position while playing, the stored one otherwise.
    pub fn position(&self) -> f64 {
        if self.state.is_playing {
            self.elapsed_at(self.clock.now())
        } else {
            self.state.position
        }
    }

    /// Notes turned on by the scheduler and not yet turned off.
    pub fn active_notes(&self) -> Vec<u8> {
        self.active_notes.keys().copied().collect()
    }

    /// Pending callbacks in firing order, with clock due times.
    pub fn pending_callbacks(&self) -> Vec<(Duration, ScheduledAction)> {
        self.timeline.pending().into_iter().map(|(due, a)| (due, *a)).collect()
    }

    /// Earliest time `poll` has something to do: a callback or a position report.
    pub fn next_wakeup(&self) -> Option<Duration> {
        let report = self.state.is_playing.then(|| self.last_report.saturating_add(self.poll_interval));
        match (self.timeline.next_due(), report) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Replace the sequence. Transport goes back to the start, stopped, on the
    /// first track that has events. The loop flag is kept.
    pub fn load(&mut self, sequence: NoteSequence) {
        self.stop();
        let track = sequence.first_playable_track().unwrap_or(0);
        self.state = PlaybackState {
            duration: sequence.duration(),
            current_track: track,
            looping: self.state.looping,
            ..PlaybackState::default()
        };
        self.sequence = sequence;
        debug!(track, duration = self.state.duration, "Sequence loaded");
        self.listener.track_changed(track);
        self.listener.position_changed(0.0, self.state.duration);
    }

    pub fn set_track(&mut self, index: usize) -> Result<(), PlaybackError> {
        let count = self.sequence.track_count();
        if index >= count {
            return Err(PlaybackError::TrackOutOfRange { index, count });
        }
        let was_playing = self.state.is_playing;
        self.stop();
        self.state.current_track = index;
        self.listener.track_changed(index);
        if was_playing {
            self.play();
        }
        Ok(())
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.state.looping = looping;
    }

    pub fn play(&mut self) {
        if self.state.is_playing {
            return;
        }
        let track = self.state.current_track;
        let has_events = self.sequence.track(track).is_some_and(|t| !t.events.is_empty());
        if !has_events {
            return;
        }

        self.cancel_schedule();

        let now = self.clock.now();
        let duration = self.state.duration;
        let resume = self.state.position.clamp(0.0, duration);
        self.reference_start = now.as_secs_f64() - resume;

        let batch = self.timeline.begin_batch();
        for event in &self.sequence.tracks()[track].events {
            let end = event.end();
            if end < resume {
                continue;
            }
            self.timeline.schedule(
                batch,
                now.saturating_add(secs(event.start - resume)),
                ScheduledAction::NoteOn { note: event.note, velocity: event.velocity },
            );
            self.timeline.schedule(
                batch,
                now.saturating_add(secs(end - resume)),
                ScheduledAction::NoteOff { note: event.note },
            );
        }
        let end_due = now.saturating_add(secs(duration - resume)).saturating_add(self.end_guard);
        self.timeline.schedule(batch, end_due, ScheduledAction::EndOfSequence);
        self.schedule = Some(batch);

        self.state.is_playing = true;
        self.state.is_paused = false;
        self.state.position = resume;
        self.last_report = now;
        debug!(track, resume, "Playing");
        self.listener.play_state_changed(true);
    }

    pub fn pause(&mut self) {
        if !self.state.is_playing {
            return;
        }
        let position = self.elapsed_at(self.clock.now());
        self.cancel_schedule();
        self.release_active_notes();
        self.state.is_playing = false;
        self.state.is_paused = true;
        self.state.position = position;
        debug!(position, "Paused");
        self.listener.play_state_changed(false);
        self.listener.position_changed(position, self.state.duration);
    }

    pub fn stop(&mut self) {
        self.cancel_schedule();
        self.release_active_notes();
        self.state.is_playing = false;
        self.state.is_paused = false;
        self.state.position = 0.0;
        self.listener.position_changed(0.0, self.state.duration);
        self.listener.play_state_changed(false);
    }

    /// Jump to `position` (clamped to the sequence). Playback resumes from there
    /// if it was running; otherwise the transport stays stopped at the new position.
    pub fn seek(&mut self, position: f64) {
        let position = if position.is_nan() { 0.0 } else { position.clamp(0.0, self.state.duration) };
        let was_playing = self.state.is_playing;
        self.stop();
        self.state.position = position;
        if was_playing {
            self.state.is_paused = true;
            self.play();
        }
        self.listener.position_changed(position, self.state.duration);
    }

    /// Fire everything that is due and report position on the poll cadence.
    pub fn poll(&mut self) {
        let now = self.clock.now();
        while let Some((_, action)) = self.timeline.pop_due(now) {
            self.fire(action);
        }

        if self.state.is_playing && now.saturating_sub(self.last_report) >= self.poll_interval {
            self.last_report = now;
            let position = self.elapsed_at(now);
            self.state.position = position;
            self.listener.position_changed(position, self.state.duration);
        }
    }

    fn fire(&mut self, action: ScheduledAction) {
        match action {
            ScheduledAction::NoteOn { note, velocity } => {
                *self.active_notes.entry(note).or_insert(0) += 1;
                self.listener.note_on(note, velocity);
            }
            ScheduledAction::NoteOff { note } => {
                if let Some(count) = self.active_notes.get_mut(&note) {
                    *count -= 1;
                    if *count == 0 {
                        self.active_notes.remove(&note);
                    }
                }
                self.listener.note_off(note);
            }
            ScheduledAction::EndOfSequence => {
                if !self.state.is_playing {
                    return;
                }
                let looping = self.state.looping;
                self.stop();
                if looping {
                    debug!("Looping");
                    self.play();
                }
            }
        }
    }

    fn elapsed_at(&self, now: Duration) -> f64 {
        (now.as_secs_f64() - self.reference_start).clamp(0.0, self.state.duration)
    }

    fn cancel_schedule(&mut self) {
        if let Some(batch) = self.schedule.take() {
            let cancelled = self.timeline.cancel_batch(batch);
            if cancelled > 0 {
                debug!(cancelled, "Schedule cancelled");
            }
        }
    }

    /// One note-off per outstanding note-on.
    fn release_active_notes(&mut self) {
        for (note, count) in std::mem::take(&mut self.active_notes) {
            for _ in 0..count {
                self.listener.note_off(note);
            }
        }
    }
}
