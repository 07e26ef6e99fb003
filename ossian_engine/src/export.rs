//! Offline bounce.
//! Drives scheduler, producer and stream link in lockstep against a manual
//! clock, so the render is deterministic and never underruns.

use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use ossian_shared::{CHANNEL_COUNT, NoteSequence, PlaybackConfig, PlaybackError};
use tracing::{debug, info};

use crate::clock::ManualClock;
use crate::link::stream_link;
use crate::producer::SynthEngine;
use crate::scheduler::EventScheduler;
use crate::stream::StreamState;

/// Frames rendered per lockstep step
const QUANTUM_FRAMES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportBitDepth {
    Int16,
    Int24,
    Float32,
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub sample_rate: u32,
    pub bit_depth: ExportBitDepth,
    pub normalize: bool,
    /// TPDF dither on integer output
    pub dither: bool,
    /// Rendered after the sequence ends so release tails are kept
    pub tail_seconds: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            bit_depth: ExportBitDepth::Int24,
            normalize: false,
            dither: true,
            tail_seconds: 0.5,
        }
    }
}

/// Result of an offline render: interleaved stereo.
#[derive(Debug, Clone)]
pub struct Bounce {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub underruns: u64,
}

impl Bounce {
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNEL_COUNT
    }
}

/// Render one track of `sequence` through the full streaming pipeline.
///
/// `track` defaults to the first track with events. Output covers the
/// sequence, the end guard and `tail_seconds`.
pub fn bounce<S: SynthEngine>(
    sequence: NoteSequence,
    track: Option<usize>,
    synth: S,
    config: &PlaybackConfig,
    tail_seconds: f64,
) -> Result<Bounce, PlaybackError> {
    config.validate()?;
    let sample_rate = config.sample_rate;
    let clock = ManualClock::new();
    let (mut link, mut producer, controller) = stream_link(config, synth);
    let mut scheduler = EventScheduler::new(clock.clone(), controller.synth_sink(), config);

    scheduler.load(sequence);
    if let Some(index) = track {
        scheduler.set_track(index)?;
    }

    let mut left = vec![0.0f32; QUANTUM_FRAMES];
    let mut right = vec![0.0f32; QUANTUM_FRAMES];

    // Preroll before the clock starts; the synth is silent so nothing is lost
    controller.start();
    let mut primed = false;
    for _ in 0..=config.pool_size * 2 {
        link.process(&mut left, &mut right);
        if link.manager().state() == StreamState::Playing {
            primed = true;
            break;
        }
        producer.pump();
    }
    if !primed {
        return Err(PlaybackError::InvalidConfig("stream never finished preroll".into()));
    }

    let seconds = |value: f64| {
        Duration::try_from_secs_f64(value.max(0.0))
            .map_err(|_| PlaybackError::InvalidConfig(format!("bounce length {value} s is out of range")))
    };
    let tail = seconds(tail_seconds)?;
    let length = seconds(scheduler.state().duration)?
        .checked_add(config.end_guard())
        .and_then(|d| d.checked_add(tail))
        .ok_or_else(|| PlaybackError::InvalidConfig("bounce length overflows".into()))?;
    let total_frames = frames_for(length, sample_rate);
    debug!(total_frames, "Bounce started");

    // Grows past a minute of audio on demand
    let reserve = total_frames.min(sample_rate as usize * 60);
    let mut samples = Vec::with_capacity(reserve * CHANNEL_COUNT);
    let mut frame = 0usize;
    scheduler.play();
    while frame < total_frames {
        clock.set(Duration::from_secs_f64(frame as f64 / sample_rate as f64));
        scheduler.poll();
        producer.pump();

        let frames = QUANTUM_FRAMES.min(total_frames - frame);
        link.process(&mut left[..frames], &mut right[..frames]);
        for (&l, &r) in left[..frames].iter().zip(&right[..frames]) {
            samples.push(l);
            samples.push(r);
        }
        frame += frames;
    }

    scheduler.stop();
    controller.stop();
    let underruns = link.stats().underruns();
    info!(frames = frame, underruns, "Bounce finished");

    Ok(Bounce { samples, sample_rate, underruns })
}

/// Frames covering `length`, rounded up. Integer math so exact lengths stay exact.
fn frames_for(length: Duration, sample_rate: u32) -> usize {
    (length.as_nanos() * sample_rate as u128).div_ceil(1_000_000_000) as usize
}

/// Bounce and write the result to `path`.
pub fn bounce_to_wav<S: SynthEngine>(
    path: &Path,
    sequence: NoteSequence,
    track: Option<usize>,
    synth: S,
    config: &PlaybackConfig,
    export: &ExportConfig,
) -> Result<Bounce, anyhow::Error> {
    let rendered = bounce(sequence, track, synth, config, export.tail_seconds)?;
    let export = ExportConfig {
        sample_rate: rendered.sample_rate,
        ..export.clone()
    };
    write_wav(path, &rendered.samples, &export)?;
    Ok(rendered)
}

/// Write interleaved stereo to a WAV file with bit-depth conversion.
pub fn write_wav(path: &Path, data: &[f32], config: &ExportConfig) -> Result<(), anyhow::Error> {
    let (bits_per_sample, sample_format) = match config.bit_depth {
        ExportBitDepth::Int16 => (16, SampleFormat::Int),
        ExportBitDepth::Int24 => (24, SampleFormat::Int),
        ExportBitDepth::Float32 => (32, SampleFormat::Float),
    };
    let spec = WavSpec {
        channels: CHANNEL_COUNT as u16,
        sample_rate: config.sample_rate,
        bits_per_sample,
        sample_format,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let gain = if config.normalize {
        let peak = data.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
        if peak > 1e-10 { 1.0 / peak } else { 1.0 }
    } else {
        1.0
    };

    if config.bit_depth == ExportBitDepth::Float32 {
        for &sample in data {
            writer.write_sample(sample * gain)?;
        }
    } else {
        let bits = bits_per_sample as u32;
        let scale = (1i64 << (bits - 1)) as f32 - 1.0;
        // Independent dither per channel
        let mut dither = [Lcg(0x0551_A1ED), Lcg(0x7E57_B0B5)];
        for (i, &sample) in data.iter().enumerate() {
            let mut s = sample * gain;
            if config.dither {
                s += dither[i % CHANNEL_COUNT].tpdf(bits);
            }
            let quantized = (s * scale).round().clamp(-(scale + 1.0), scale) as i32;
            if bits == 16 {
                writer.write_sample(quantized as i16)?;
            } else {
                writer.write_sample(quantized)?;
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

struct Lcg(u32);

impl Lcg {
    #[inline]
    fn next(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (self.0 as f32) / (u32::MAX as f32) * 2.0 - 1.0
    }

    /// Triangular noise of one LSB at `bits`
    #[inline]
    fn tpdf(&mut self, bits: u32) -> f32 {
        let lsb = 1.0 / (1u64 << (bits - 1)) as f32;
        (self.next() - self.next()) * lsb
    }
}
