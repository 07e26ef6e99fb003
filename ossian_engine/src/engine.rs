use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ossian_shared::{PlaybackConfig, SynthCommand};
use tracing::{info, warn};

use crate::link::{StreamController, StreamStats, stream_link};
use crate::producer::{ProducerThread, SynthEngine};
use crate::stream::StreamState;
use crate::transport::SynthCommandSink;

/// Real-time playback on the default output device.
///
/// The output callback owns the stream link; a producer thread renders blocks
/// from the synth. Dropping the engine stops the device and joins the producer.
pub struct AudioEngine {
    _stream: cpal::Stream,
    _producer: ProducerThread,
    controller: StreamController,
    stats: Arc<StreamStats>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl AudioEngine {
    /// `make_synth` receives the device sample rate.
    pub fn new<S, F>(config: &PlaybackConfig, make_synth: F) -> Result<Self, anyhow::Error>
    where
        S: SynthEngine + 'static,
        F: FnOnce(u32) -> S,
    {
        config.validate()?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(anyhow::anyhow!("No output device available"))?;
        let supported = device.default_output_config()?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        info!(?stream_config, "Using output config");

        let (mut link, producer, controller) = stream_link(config, make_synth(sample_rate));
        let stats = link.stats();

        let err_fn = |err: cpal::StreamError| {
            warn!(%err, "Output stream error");
        };

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    link.process_interleaved(data, channels);
                },
                err_fn,
                None,
            )?,
            other => return Err(anyhow::anyhow!("Unsupported sample format {other:?}")),
        };
        stream.play()?;

        let producer = ProducerThread::spawn(producer, config.producer_idle())?;

        Ok(Self {
            _stream: stream,
            _producer: producer,
            controller,
            stats,
            sample_rate,
            channels,
        })
    }

    pub fn start(&self) {
        self.controller.start();
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn panic(&self) {
        self.controller.panic();
    }

    pub fn set_parameter(&self, id: u32, value: f32) {
        self.controller.send_synth(SynthCommand::SetParameter { id, value });
    }

    pub fn controller(&self) -> &StreamController {
        &self.controller
    }

    /// Listener for an [`crate::scheduler::EventScheduler`] that plays through this engine.
    pub fn synth_sink(&self) -> SynthCommandSink {
        self.controller.synth_sink()
    }

    pub fn stream_state(&self) -> StreamState {
        self.stats.state()
    }

    pub fn underruns(&self) -> u64 {
        self.stats.underruns()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.stats.frames_rendered()
    }
}
