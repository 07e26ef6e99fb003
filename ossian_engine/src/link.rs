//! Glue between the real-time callback and the control side.
//!
//! [`StreamLink`] lives inside the audio callback and owns the
//! [`StreamingBufferManager`]. [`StreamController`] is the control-side handle.
//! [`stream_link`] wires both to a [`BlockProducer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use ossian_shared::{BlockPayload, PlaybackConfig, StreamCommand, StreamEvent, SynthCommand};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use tracing::warn;

use crate::producer::{BlockProducer, SynthEngine};
use crate::stream::{RenderOutcome, StreamState, StreamingBufferManager};
use crate::transport::SynthCommandSink;

/// Counters published by the real-time side after every callback.
#[derive(Debug, Default)]
pub struct StreamStats {
    state: AtomicU8,
    underruns: AtomicU64,
    frames_rendered: AtomicU64,
    spent_overflows: AtomicU64,
}

impl StreamStats {
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Payloads freed on the real-time thread because the return ring was full
    pub fn spent_overflows(&self) -> u64 {
        self.spent_overflows.load(Ordering::Relaxed)
    }

    fn publish(&self, manager: &StreamingBufferManager, frames: usize, spent_overflows: u64) {
        self.state.store(manager.state().as_u8(), Ordering::Relaxed);
        self.spent_overflows.store(spent_overflows, Ordering::Relaxed);
        self.underruns.store(manager.underruns(), Ordering::Relaxed);
        self.frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
    }
}

pub struct StreamLink {
    manager: StreamingBufferManager,
    commands: Receiver<StreamCommand>,
    /// Return path for payload allocations, so they are freed off the real-time thread
    spent: HeapProd<BlockPayload>,
    spent_overflows: u64,
    scratch_left: Box<[f32]>,
    scratch_right: Box<[f32]>,
    stats: Arc<StreamStats>,
}

impl StreamLink {
    pub fn new(
        manager: StreamingBufferManager,
        commands: Receiver<StreamCommand>,
        spent: HeapProd<BlockPayload>,
        max_callback_frames: usize,
    ) -> Self {
        let frames = max_callback_frames.max(1);
        Self {
            manager,
            commands,
            spent,
            spent_overflows: 0,
            scratch_left: vec![0.0; frames].into_boxed_slice(),
            scratch_right: vec![0.0; frames].into_boxed_slice(),
            stats: Arc::new(StreamStats::default()),
        }
    }

    pub fn manager(&self) -> &StreamingBufferManager {
        &self.manager
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Apply every queued command without blocking.
    pub fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                StreamCommand::SupplyBlock(payload) => {
                    self.manager.supply_block(payload.index, &payload.left, &payload.right);
                    if self.spent.try_push(payload).is_err() {
                        self.spent_overflows += 1;
                    }
                }
                StreamCommand::Start => self.manager.start(),
                StreamCommand::Stop => self.manager.stop(),
                StreamCommand::Panic => self.manager.panic(),
            }
        }
    }

    /// Planar render for one callback.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> RenderOutcome {
        self.drain_commands();
        let outcome = self.manager.render(left, right);
        self.stats.publish(&self.manager, left.len().min(right.len()), self.spent_overflows);
        outcome
    }

    /// Interleaved render, as handed out by the audio device.
    ///
    /// Mono devices get the average of both channels; channels past the
    /// second are silent.
    pub fn process_interleaved(&mut self, data: &mut [f32], channels: usize) {
        self.drain_commands();
        if channels == 0 {
            return;
        }

        let chunk_frames = self.scratch_left.len();
        let mut total = 0;
        for chunk in data.chunks_mut(chunk_frames * channels) {
            let frames = chunk.len() / channels;
            let left = &mut self.scratch_left[..frames];
            let right = &mut self.scratch_right[..frames];
            self.manager.render(left, right);

            for ((frame, &l), &r) in chunk.chunks_exact_mut(channels).zip(left.iter()).zip(right.iter()) {
                if channels == 1 {
                    frame[0] = (l + r) * 0.5;
                } else {
                    frame[0] = l;
                    frame[1] = r;
                    frame[2..].fill(0.0);
                }
            }
            total += frames;
        }
        self.stats.publish(&self.manager, total, self.spent_overflows);
    }
}

/// Control-side handle for transport and synth commands.
#[derive(Clone)]
pub struct StreamController {
    commands: Sender<StreamCommand>,
    synth: Sender<SynthCommand>,
}

impl StreamController {
    pub fn start(&self) {
        self.send(StreamCommand::Start);
    }

    pub fn stop(&self) {
        self.send(StreamCommand::Stop);
    }

    /// Silence the stream and tell the synth to drop every voice.
    pub fn panic(&self) {
        self.send(StreamCommand::Panic);
        self.send_synth(SynthCommand::Panic);
    }

    pub fn send_synth(&self, cmd: SynthCommand) {
        if self.synth.send(cmd).is_err() {
            warn!(?cmd, "Producer gone, synth command dropped");
        }
    }

    /// A transport listener that forwards notes to this stream's synth.
    pub fn synth_sink(&self) -> SynthCommandSink {
        SynthCommandSink::new(self.synth.clone())
    }

    fn send(&self, cmd: StreamCommand) {
        if self.commands.send(cmd).is_err() {
            warn!("Stream link gone, command dropped");
        }
    }
}

/// Build the three halves of a stream around `synth`.
pub fn stream_link<S: SynthEngine>(
    config: &PlaybackConfig,
    synth: S,
) -> (StreamLink, BlockProducer<S>, StreamController) {
    let (event_tx, event_rx) = HeapRb::<StreamEvent>::new(config.event_queue_capacity()).split();
    // Room for a supply per slot plus transport commands
    let command_capacity = config.pool_size * 2 + 8;
    let (command_tx, command_rx) = bounded(command_capacity);
    // The producer only allocates when this ring is empty, so payloads in flight never
    // exceed the supply channel plus its one held-back block
    let (spent_tx, spent_rx) = HeapRb::<BlockPayload>::new(command_capacity + 2).split();
    let (synth_tx, synth_rx) = unbounded();

    let manager = StreamingBufferManager::new(config, event_tx);
    let link = StreamLink::new(manager, command_rx, spent_tx, config.max_callback_frames);
    let producer = BlockProducer::new(synth, event_rx, spent_rx, command_tx.clone(), synth_rx);
    let controller = StreamController {
        commands: command_tx,
        synth: synth_tx,
    };
    (link, producer, controller)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(f32);

    impl SynthEngine for Constant {
        fn note_on(&mut self, _note: u8, _velocity: u8) {}
        fn note_off(&mut self, _note: u8) {}
        fn all_notes_off(&mut self) {}

        fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
            left.fill(self.0);
            right.fill(-self.0);
        }
    }

    fn small_config() -> PlaybackConfig {
        PlaybackConfig {
            pool_size: 4,
            block_frames: 64,
            max_callback_frames: 32,
            ..PlaybackConfig::default()
        }
    }

    #[test]
    fn preroll_then_playback_through_messages() {
        let (mut link, mut producer, controller) = stream_link(&small_config(), Constant(0.5));
        let mut left = [1.0; 16];
        let mut right = [1.0; 16];

        controller.start();
        // Start is applied, requests go out, nothing to play yet
        assert_eq!(link.process(&mut left, &mut right), RenderOutcome::Silent);
        assert_eq!(link.manager().state(), StreamState::AwaitingPreroll);

        producer.pump();
        assert!(producer.is_stream_ready());
        assert_eq!(producer.blocks_supplied(), 4);

        assert_eq!(link.process(&mut left, &mut right), RenderOutcome::Rendered);
        assert_eq!(left, [0.5; 16]);
        assert_eq!(right, [-0.5; 16]);
        assert_eq!(link.stats().state(), StreamState::Playing);
        assert_eq!(link.stats().frames_rendered(), 32);
    }

    #[test]
    fn steady_state_never_underruns_when_producer_keeps_up() {
        let (mut link, mut producer, controller) = stream_link(&small_config(), Constant(0.25));
        controller.start();
        let mut left = [0.0; 48];
        let mut right = [0.0; 48];
        link.process(&mut left, &mut right);

        for _ in 0..200 {
            producer.pump();
            link.process(&mut left, &mut right);
        }
        assert_eq!(link.stats().underruns(), 0);
        assert_eq!(link.stats().spent_overflows(), 0);
        assert!(left.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn starved_producer_causes_counted_underruns() {
        let (mut link, mut producer, controller) = stream_link(&small_config(), Constant(0.25));
        controller.start();
        let mut left = [0.0; 64];
        let mut right = [0.0; 64];
        link.process(&mut left, &mut right);
        producer.pump();

        // Four full blocks drain the pool; the fifth call has nothing ready
        for _ in 0..4 {
            assert_eq!(link.process(&mut left, &mut right), RenderOutcome::Rendered);
        }
        assert_eq!(link.process(&mut left, &mut right), RenderOutcome::Underrun);
        assert_eq!(link.stats().underruns(), 1);

        producer.pump();
        assert_eq!(producer.last_underrun(), 1);
        assert_eq!(link.process(&mut left, &mut right), RenderOutcome::Rendered);
    }

    #[test]
    fn interleaved_output_chunks_through_scratch() {
        let (mut link, mut producer, controller) = stream_link(&small_config(), Constant(0.5));
        controller.start();
        link.process_interleaved(&mut [0.0; 8], 2);
        producer.pump();

        // 40 frames is larger than the 32-frame scratch
        let mut data = vec![9.0; 40 * 3];
        link.process_interleaved(&mut data, 3);
        for frame in data.chunks_exact(3) {
            assert_eq!(frame, [0.5, -0.5, 0.0]);
        }

        let mut mono = vec![9.0; 10];
        link.process_interleaved(&mut mono, 1);
        assert!(mono.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn panic_silences_and_reaches_synth_queue() {
        let (mut link, mut producer, controller) = stream_link(&small_config(), Constant(0.5));
        controller.start();
        let mut left = [0.0; 16];
        let mut right = [0.0; 16];
        link.process(&mut left, &mut right);
        producer.pump();
        link.process(&mut left, &mut right);

        controller.panic();
        assert_eq!(link.process(&mut left, &mut right), RenderOutcome::Silent);
        assert_eq!(left, [0.0; 16]);
        assert_eq!(link.stats().state(), StreamState::Stopped);
        assert!(producer.apply_commands());
    }

    #[test]
    fn return_ring_holds_every_payload_in_flight() {
        let config = small_config();
        let (mut link, mut producer, controller) = stream_link(&config, Constant(0.5));
        let mut left = [0.0; 64];
        let mut right = [0.0; 64];

        // Repeated restarts while the producer answers in bursts keep the most
        // payloads alive at once
        for round in 0..50 {
            controller.start();
            link.process(&mut left, &mut right);
            producer.pump();
            if round % 3 == 0 {
                controller.start();
                link.drain_commands();
                producer.pump();
            }
            for _ in 0..6 {
                link.process(&mut left, &mut right);
                producer.pump();
            }
        }
        assert_eq!(link.stats().spent_overflows(), 0);
    }

    #[test]
    fn full_return_ring_is_counted() {
        let config = small_config();
        let (event_tx, _event_rx) = HeapRb::<StreamEvent>::new(config.event_queue_capacity()).split();
        let (spent_tx, _spent_rx) = HeapRb::<BlockPayload>::new(1).split();
        let (command_tx, command_rx) = bounded(8);
        let manager = StreamingBufferManager::new(&config, event_tx);
        let mut link = StreamLink::new(manager, command_rx, spent_tx, config.max_callback_frames);

        command_tx.send(StreamCommand::SupplyBlock(BlockPayload::with_frames(0, 64))).unwrap();
        command_tx.send(StreamCommand::SupplyBlock(BlockPayload::with_frames(1, 64))).unwrap();
        link.process(&mut [0.0; 8], &mut [0.0; 8]);
        assert_eq!(link.stats().spent_overflows(), 1);
    }

    #[test]
    fn supplies_are_recycled_to_the_producer() {
        let (mut link, mut producer, controller) = stream_link(&small_config(), Constant(0.5));
        controller.start();
        let mut left = [0.0; 64];
        let mut right = [0.0; 64];
        link.process(&mut left, &mut right);
        producer.pump();
        link.process(&mut left, &mut right);
        // Slot 0 refill is rendered into one of the four returned payloads
        producer.pump();
        link.process(&mut left, &mut right);
        assert_eq!(producer.blocks_supplied(), 5);
        assert_eq!(link.stats().underruns(), 0);
    }
}
