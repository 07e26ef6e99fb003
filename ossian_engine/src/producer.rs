use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use ossian_shared::{BlockPayload, StreamCommand, StreamEvent, SynthCommand};
use ringbuf::HeapCons;
use ringbuf::traits::Consumer;
use tracing::{debug, info, warn};

/// The opaque synthesis engine. Anything that turns notes into frames.
pub trait SynthEngine: Send {
    fn note_on(&mut self, note: u8, velocity: u8);

    fn note_off(&mut self, note: u8);

    fn all_notes_off(&mut self);

    /// Kill all sound now, including release tails
    fn panic(&mut self) {
        self.all_notes_off();
    }

    fn set_parameter(&mut self, _id: u32, _value: f32) {}

    /// Render `left.len()` frames (both slices have the same length)
    fn process(&mut self, left: &mut [f32], right: &mut [f32]);
}

impl<S: SynthEngine + ?Sized> SynthEngine for Box<S> {
    fn note_on(&mut self, note: u8, velocity: u8) {
        (**self).note_on(note, velocity)
    }

    fn note_off(&mut self, note: u8) {
        (**self).note_off(note)
    }

    fn all_notes_off(&mut self) {
        (**self).all_notes_off()
    }

    fn panic(&mut self) {
        (**self).panic()
    }

    fn set_parameter(&mut self, id: u32, value: f32) {
        (**self).set_parameter(id, value)
    }

    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        (**self).process(left, right)
    }
}

/// Control-side half of the stream: answers refill requests with frames from the synth.
pub struct BlockProducer<S: SynthEngine> {
    synth: S,
    events: HeapCons<StreamEvent>,
    /// Payloads handed back by the link after their samples were copied
    spent: HeapCons<BlockPayload>,
    supply: Sender<StreamCommand>,
    commands: Receiver<SynthCommand>,
    /// Rendered block that did not fit in the supply channel yet
    unsent: Option<BlockPayload>,
    stream_ready: bool,
    last_underrun: u64,
    blocks_supplied: u64,
}

impl<S: SynthEngine> BlockProducer<S> {
    pub fn new(
        synth: S,
        events: HeapCons<StreamEvent>,
        spent: HeapCons<BlockPayload>,
        supply: Sender<StreamCommand>,
        commands: Receiver<SynthCommand>,
    ) -> Self {
        Self {
            synth,
            events,
            spent,
            supply,
            commands,
            unsent: None,
            stream_ready: false,
            last_underrun: 0,
            blocks_supplied: 0,
        }
    }

    pub fn synth(&self) -> &S {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut S {
        &mut self.synth
    }

    /// The manager has announced itself
    pub fn is_stream_ready(&self) -> bool {
        self.stream_ready
    }

    /// Latest underrun count reported by the stream
    pub fn last_underrun(&self) -> u64 {
        self.last_underrun
    }

    pub fn blocks_supplied(&self) -> u64 {
        self.blocks_supplied
    }

    /// Apply every queued synth command. Returns false once all senders are gone.
    pub fn apply_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.apply(cmd),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply(&mut self, cmd: SynthCommand) {
        match cmd {
            SynthCommand::NoteOn { note, velocity } => self.synth.note_on(note, velocity),
            SynthCommand::NoteOff { note } => self.synth.note_off(note),
            SynthCommand::AllNotesOff => self.synth.all_notes_off(),
            SynthCommand::SetParameter { id, value } => self.synth.set_parameter(id, value),
            SynthCommand::Panic => self.synth.panic(),
        }
    }

    /// Handle every pending stream event. Returns the number of blocks supplied.
    pub fn service_requests(&mut self) -> usize {
        let mut supplied = 0;

        if let Some(payload) = self.unsent.take() {
            match self.try_supply(payload) {
                Ok(()) => supplied += 1,
                Err(()) => return 0,
            }
        }

        while let Some(event) = self.events.try_pop() {
            match event {
                StreamEvent::Ready => {
                    debug!("Stream manager ready");
                    self.stream_ready = true;
                }
                StreamEvent::Underrun { count } => {
                    warn!(count, "Stream underrun");
                    self.last_underrun = count;
                }
                StreamEvent::RequestBlock { index, frames } => {
                    let mut payload = self.spent.try_pop().unwrap_or_default();
                    payload.reset(index, frames);
                    self.synth.process(&mut payload.left, &mut payload.right);
                    match self.try_supply(payload) {
                        Ok(()) => supplied += 1,
                        Err(()) => break,
                    }
                }
            }
        }

        supplied
    }

    fn try_supply(&mut self, payload: BlockPayload) -> Result<(), ()> {
        match self.supply.try_send(StreamCommand::SupplyBlock(payload)) {
            Ok(()) => {
                self.blocks_supplied += 1;
                Ok(())
            }
            Err(TrySendError::Full(StreamCommand::SupplyBlock(payload))) => {
                self.unsent = Some(payload);
                Err(())
            }
            Err(TrySendError::Full(_)) => Err(()),
            Err(TrySendError::Disconnected(_)) => {
                debug!("Stream link gone, dropping block");
                Err(())
            }
        }
    }

    /// One producer step: synth commands first so they land in the next block.
    /// Returns false once the command senders are gone.
    pub fn pump(&mut self) -> bool {
        let alive = self.apply_commands();
        self.service_requests();
        alive
    }

    fn run(mut self, idle: Duration, shutdown: &AtomicBool) {
        info!("Block producer started");
        while !shutdown.load(Ordering::Acquire) {
            if !self.apply_commands() {
                break;
            }
            if self.service_requests() == 0 {
                thread::sleep(idle);
            }
        }
        info!(blocks = self.blocks_supplied, "Block producer stopped");
    }
}

/// Dedicated thread running a [`BlockProducer`]. Dropping the handle stops and joins it.
pub struct ProducerThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProducerThread {
    pub fn spawn<S: SynthEngine + 'static>(producer: BlockProducer<S>, idle: Duration) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("ossian-producer".into())
            .spawn(move || producer.run(idle, &flag))?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ProducerThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
