//! headless_player - play or bounce a JSON note sequence
//!
//! Uses the built-in preview tone as the synth.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use ossian_engine::{
    AudioEngine, Clock, EventScheduler, ExportConfig, MonotonicClock, PreviewTone, StreamState, bounce_to_wav,
};
use ossian_shared::{NoteSequence, PlaybackConfig};
use tracing::{info, warn};

const PREROLL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "headless_player")]
#[command(about = "Stream a note sequence through the playback core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a sequence on the default output device
    Play {
        /// Sequence JSON file
        sequence: PathBuf,

        /// Track index (default: first track with events)
        #[arg(short, long)]
        track: Option<usize>,

        /// Restart from the top when the sequence ends
        #[arg(short, long = "loop")]
        looping: bool,

        /// Playback config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Render a sequence offline to a WAV file
    Bounce {
        /// Sequence JSON file
        sequence: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        out: PathBuf,

        /// Track index (default: first track with events)
        #[arg(short, long)]
        track: Option<usize>,

        /// Playback config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Normalize to full scale
        #[arg(long)]
        normalize: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            sequence,
            track,
            looping,
            config,
        } => play(&sequence, track, looping, config.as_deref()),
        Commands::Bounce {
            sequence,
            out,
            track,
            config,
            normalize,
        } => {
            let config = load_config(config.as_deref())?;
            let sequence = NoteSequence::load(&sequence)?;
            let export = ExportConfig {
                sample_rate: config.sample_rate,
                normalize,
                ..ExportConfig::default()
            };
            let synth = PreviewTone::new(config.sample_rate as f32);
            let rendered = bounce_to_wav(&out, sequence, track, synth, &config, &export)?;
            info!(
                path = %out.display(),
                frames = rendered.frames(),
                underruns = rendered.underruns,
                "Bounce written"
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PlaybackConfig> {
    let config = match path {
        Some(path) => PlaybackConfig::load(path)?,
        None => PlaybackConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn play(path: &Path, track: Option<usize>, looping: bool, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let sequence = NoteSequence::load(path)?;
    info!(tracks = sequence.track_count(), duration = sequence.duration(), "Sequence loaded");

    let engine = AudioEngine::new(&config, |sample_rate| PreviewTone::new(sample_rate as f32))?;
    info!(sample_rate = engine.sample_rate, channels = engine.channels, "Output open");

    engine.start();
    let deadline = Instant::now() + PREROLL_TIMEOUT;
    while engine.stream_state() != StreamState::Playing {
        if Instant::now() > deadline {
            anyhow::bail!("Stream did not finish preroll within {PREROLL_TIMEOUT:?}");
        }
        thread::sleep(config.producer_idle());
    }

    let clock = MonotonicClock::new();
    let mut scheduler = EventScheduler::new(clock, engine.synth_sink(), &config);
    scheduler.load(sequence);
    if let Some(index) = track {
        scheduler.set_track(index)?;
    }
    scheduler.set_loop(looping);
    scheduler.play();
    if !scheduler.state().is_playing {
        warn!(track = scheduler.state().current_track, "Track has no events");
    }

    while scheduler.state().is_playing {
        scheduler.poll();
        if let Some(wakeup) = scheduler.next_wakeup() {
            let now = scheduler.clock().now();
            thread::sleep(wakeup.saturating_sub(now));
        }
    }

    engine.stop();
    // Let the device drain the stop before tearing down
    thread::sleep(Duration::from_millis(50));
    info!(
        underruns = engine.underruns(),
        frames = engine.frames_rendered(),
        "Playback finished"
    );
    Ok(())
}
