use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod sequence;

pub use config::PlaybackConfig;
pub use error::PlaybackError;
pub use sequence::{MAX_SEQUENCE_SECONDS, NoteEvent, NoteSequence, SequenceTrack};

/// Messages sent from the control side to the real-time stream (Producer/Controller -> Manager)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum StreamCommand {
    /// Fresh samples for a slot that was asked to refill
    SupplyBlock(BlockPayload),
    /// Begin preroll
    Start,
    /// Full transport reset
    Stop,
    /// Kill all sound now
    Panic,
}

/// Events sent from the real-time stream to the producer (Manager -> Producer)
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Manager is initialized and accepts Start/Stop/Panic
    Ready,
    /// Refill slot `index` with `frames` frames
    RequestBlock { index: usize, frames: usize },
    /// Cumulative underrun count (throttled)
    Underrun { count: u64 },
}

/// Samples for one pool slot, planar stereo.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BlockPayload {
    pub index: usize,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl BlockPayload {
    pub fn with_frames(index: usize, frames: usize) -> Self {
        Self {
            index,
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    /// Reuse the allocation for another slot, zeroed and sized to `frames`.
    pub fn reset(&mut self, index: usize, frames: usize) {
        self.index = index;
        self.left.clear();
        self.left.resize(frames, 0.0);
        self.right.clear();
        self.right.resize(frames, 0.0);
    }
}

/// Commands for the synthesis engine, serviced by the producer between block renders
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum SynthCommand {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    AllNotesOff,
    SetParameter { id: u32, value: f32 },
    Panic,
}

pub const CHANNEL_COUNT: usize = 2;
pub const MIDI_MAX: u8 = 127;
