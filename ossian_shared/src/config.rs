use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::PlaybackError;

/// Tuning for the stream pool and the event scheduler.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rate used for offline bounces. Real-time playback follows the device.
    pub sample_rate: u32,
    /// Number of slots in the ring
    pub pool_size: usize,
    /// Frames per slot
    pub block_frames: usize,
    /// Underruns are reported on the first one and every Nth after
    pub underrun_report_interval: u64,
    /// Margin after the last event before the end-of-sequence callback fires
    pub end_guard_ms: u64,
    /// Position reporting cadence while playing
    pub position_poll_ms: u64,
    /// Producer sleep between polls when there is nothing to do
    pub producer_idle_ms: u64,
    /// Largest callback the stream link renders without chunking
    pub max_callback_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            pool_size: 4,
            block_frames: 1024,
            underrun_report_interval: 100,
            end_guard_ms: 100,
            position_poll_ms: 50,
            producer_idle_ms: 1,
            max_callback_frames: 4096,
        }
    }
}

impl PlaybackConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PlaybackError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, PlaybackError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), PlaybackError> {
        let checks = [
            ("sample_rate", self.sample_rate as u64),
            ("pool_size", self.pool_size as u64),
            ("block_frames", self.block_frames as u64),
            ("underrun_report_interval", self.underrun_report_interval),
            ("position_poll_ms", self.position_poll_ms),
            ("max_callback_frames", self.max_callback_frames as u64),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(PlaybackError::InvalidConfig(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn end_guard(&self) -> Duration {
        Duration::from_millis(self.end_guard_ms)
    }

    pub fn position_poll(&self) -> Duration {
        Duration::from_millis(self.position_poll_ms)
    }

    pub fn producer_idle(&self) -> Duration {
        Duration::from_millis(self.producer_idle_ms)
    }

    /// Capacity of the manager -> producer event ring.
    ///
    /// Worst case is one request per slot plus Ready and an Underrun report,
    /// doubled so a slow producer does not force request retries.
    pub fn event_queue_capacity(&self) -> usize {
        (self.pool_size + 2) * 2
    }
}
