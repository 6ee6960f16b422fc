use std::time::Duration;

use thiserror::Error;

/// All errors produced by v2m-core.
#[derive(Debug, Error)]
pub enum V2mError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("capture is already running")]
    AlreadyRecording,

    #[error("capture is not running")]
    NotRecording,

    #[error("model load error: {0}")]
    ModelLoad(String),

    #[error("inference error after {elapsed:?}: {message}")]
    Inference {
        message: String,
        elapsed: Duration,
    },

    #[error("inference worker is gone")]
    WorkerGone,

    #[error("VAD backend error: {0}")]
    VadBackend(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl V2mError {
    /// Wrap a raw inference failure with its timing metadata.
    pub fn inference(message: impl Into<String>, elapsed: Duration) -> Self {
        Self::Inference {
            message: message.into(),
            elapsed,
        }
    }
}

pub type Result<T> = std::result::Result<T, V2mError>;
