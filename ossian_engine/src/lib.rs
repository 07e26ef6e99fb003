pub mod clock;
pub mod engine; // AudioEngine lives here
pub mod export;
pub mod link;
pub mod nodes;
pub mod producer;
pub mod scheduler;
pub mod stream;
pub mod timeline;
pub mod transport;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use engine::AudioEngine;
pub use export::{Bounce, ExportBitDepth, ExportConfig, bounce, bounce_to_wav, write_wav};
pub use link::{StreamController, StreamLink, StreamStats, stream_link};
pub use nodes::PreviewTone;
pub use producer::{BlockProducer, ProducerThread, SynthEngine};
pub use scheduler::{EventScheduler, ScheduledAction};
pub use stream::{RenderOutcome, StreamState, StreamingBufferManager};
pub use transport::{PlaybackState, SynthCommandSink, TransportListener};

#[cfg(test)]
mod tests_playback;
