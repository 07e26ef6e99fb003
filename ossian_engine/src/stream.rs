//! Real-time side of the block streaming protocol.
//!
//! The manager owns a fixed ring of pre-allocated stereo blocks. The audio
//! callback reads from the ring; refills are requested with fire-and-forget
//! [`StreamEvent::RequestBlock`] messages and land later through
//! [`StreamingBufferManager::supply_block`]. Nothing here allocates, locks or
//! waits once the manager is constructed.

use ossian_shared::{PlaybackConfig, StreamEvent};
use ringbuf::HeapProd;
use ringbuf::traits::Producer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    AwaitingPreroll,
    Playing,
}

impl StreamState {
    pub fn as_u8(self) -> u8 {
        match self {
            StreamState::Stopped => 0,
            StreamState::AwaitingPreroll => 1,
            StreamState::Playing => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::AwaitingPreroll,
            2 => StreamState::Playing,
            _ => StreamState::Stopped,
        }
    }
}

/// What a single render call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Not playing; output is silence
    Silent,
    /// Every frame came from the pool
    Rendered,
    /// A slot was not ready; the tail of the output is silence
    Underrun,
}

pub struct AudioBlock {
    pub index: usize,
    left: Box<[f32]>,
    right: Box<[f32]>,
    ready: bool,
    /// A refill request for this slot has been queued and not yet answered
    requested: bool,
}

impl AudioBlock {
    fn new(index: usize, frames: usize) -> Self {
        Self {
            index,
            left: vec![0.0; frames].into_boxed_slice(),
            right: vec![0.0; frames].into_boxed_slice(),
            ready: false,
            requested: false,
        }
    }

    fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
        self.ready = false;
        self.requested = false;
    }

    fn fill_from(&mut self, left: &[f32], right: &[f32]) {
        copy_padded(&mut self.left, left);
        copy_padded(&mut self.right, right);
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }
}

fn copy_padded(dst: &mut [f32], src: &[f32]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}

/// Fixed ring of blocks plus the read position.
pub struct BufferPool {
    blocks: Vec<AudioBlock>,
    block_frames: usize,
    /// Slot currently being read
    current: usize,
    /// Read cursor inside the current slot, always `< block_frames`
    position: usize,
}

impl BufferPool {
    pub fn new(slots: usize, block_frames: usize) -> Self {
        Self {
            blocks: (0..slots).map(|i| AudioBlock::new(i, block_frames)).collect(),
            block_frames,
            current: 0,
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    pub fn block(&self, index: usize) -> Option<&AudioBlock> {
        self.blocks.get(index)
    }

    fn all_ready(&self) -> bool {
        self.blocks.iter().all(|b| b.ready)
    }

    fn reset(&mut self) {
        for block in &mut self.blocks {
            block.clear();
        }
        self.current = 0;
        self.position = 0;
    }
}

pub struct StreamingBufferManager {
    pool: BufferPool,
    state: StreamState,
    underruns: u64,
    report_interval: u64,
    events: HeapProd<StreamEvent>,
}

impl StreamingBufferManager {
    /// Allocates the pool and announces readiness on `events`.
    pub fn new(config: &PlaybackConfig, events: HeapProd<StreamEvent>) -> Self {
        let mut manager = Self {
            pool: BufferPool::new(config.pool_size, config.block_frames),
            state: StreamState::Stopped,
            underruns: 0,
            report_interval: config.underrun_report_interval.max(1),
            events,
        };
        let _ = manager.events.try_push(StreamEvent::Ready);
        manager
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn current_slot(&self) -> usize {
        self.pool.current
    }

    pub fn cursor(&self) -> usize {
        self.pool.position
    }

    pub fn is_slot_ready(&self, index: usize) -> bool {
        self.pool.block(index).is_some_and(AudioBlock::is_ready)
    }

    /// Begin preroll: every slot is marked empty and asked to refill.
    ///
    /// Restarts from slot 0 when already prerolling or playing.
    pub fn start(&mut self) {
        self.pool.reset();
        self.state = StreamState::AwaitingPreroll;
        for index in 0..self.pool.len() {
            self.request_refill(index);
        }
    }

    pub fn stop(&mut self) {
        self.pool.reset();
        self.state = StreamState::Stopped;
    }

    /// Silence immediately. Also forces `Stopped`, so a render after a panic
    /// is plain silence and never counts as an underrun.
    pub fn panic(&mut self) {
        self.pool.reset();
        self.state = StreamState::Stopped;
    }

    /// Copy producer data into slot `index`. Returns false when the supply was ignored:
    /// the index is out of range, or the slot already holds unread data.
    pub fn supply_block(&mut self, index: usize, left: &[f32], right: &[f32]) -> bool {
        let Some(block) = self.pool.blocks.get_mut(index) else {
            return false;
        };
        if block.ready {
            return false;
        }

        block.fill_from(left, right);
        block.requested = false;
        // Readiness is published last, after the copy
        block.ready = true;

        if self.state == StreamState::AwaitingPreroll && self.pool.all_ready() {
            self.state = StreamState::Playing;
        }
        true
    }

    /// Fill `left`/`right` from the ring. Frame count is the shorter of the two slices.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) -> RenderOutcome {
        let frames = left.len().min(right.len());

        if self.state != StreamState::Stopped {
            self.retry_requests();
        }
        if self.state != StreamState::Playing {
            left.fill(0.0);
            right.fill(0.0);
            return RenderOutcome::Silent;
        }

        let block_frames = self.pool.block_frames;
        let mut written = 0;
        while written < frames {
            let current = self.pool.current;
            let block = &self.pool.blocks[current];
            if !block.ready {
                left[written..].fill(0.0);
                right[written..].fill(0.0);
                self.note_underrun();
                return RenderOutcome::Underrun;
            }

            let pos = self.pool.position;
            let n = (frames - written).min(block_frames - pos);
            left[written..written + n].copy_from_slice(&block.left[pos..pos + n]);
            right[written..written + n].copy_from_slice(&block.right[pos..pos + n]);
            written += n;
            self.pool.position += n;

            if self.pool.position == block_frames {
                self.request_refill(current);
                self.pool.current = (current + 1) % self.pool.len();
                self.pool.position = 0;
            }
        }

        // Short slices leave the tail untouched; keep it silent
        left[frames..].fill(0.0);
        right[frames..].fill(0.0);
        RenderOutcome::Rendered
    }

    fn request_refill(&mut self, index: usize) {
        let frames = self.pool.block_frames;
        let block = &mut self.pool.blocks[index];
        block.ready = false;
        block.requested = self
            .events
            .try_push(StreamEvent::RequestBlock { index, frames })
            .is_ok();
    }

    /// Re-queue requests that did not fit in the event ring last time.
    fn retry_requests(&mut self) {
        for index in 0..self.pool.len() {
            let block = &self.pool.blocks[index];
            if !block.ready && !block.requested {
                self.request_refill(index);
            }
        }
    }

    fn note_underrun(&mut self) {
        self.underruns += 1;
        let count = self.underruns;
        if count == 1 || count % self.report_interval == 0 {
            let _ = self.events.try_push(StreamEvent::Underrun { count });
        }
    }
}
