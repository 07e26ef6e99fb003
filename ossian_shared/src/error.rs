use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("track index {index} out of range ({count} tracks)")]
    TrackOutOfRange { index: usize, count: usize },

    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
