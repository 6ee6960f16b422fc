//! # v2m-core
//!
//! Streaming voice-to-text engine for the voice2machine daemon.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC ring → producer task → queue → consumer task
//!                                                                     │
//!                                                            VadGate + segmentation
//!                                                                     │
//!                                                            WhisperWorker (FIFO)
//!                                                                     │
//!                                                            EventSink events
//! ```
//!
//! The audio callback is wait-free; all heap work happens on the reader
//! side. Inference is owned by a single executor thread so the model (and
//! GPU) never see concurrent calls.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod error;
pub mod events;
pub mod inference;
pub mod transcriber;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{fallback::BufferedRecorder, AudioCapture, AudioSource, CaptureConfig};
pub use buffering::chunk::{AudioChunk, TARGET_SAMPLE_RATE};
pub use error::V2mError;
pub use events::{EngineEvent, EventSink, NullSink};
pub use inference::{InferenceOptions, SpeechModel, WhisperWorker};
pub use transcriber::{StreamingTranscriber, TranscriberConfig};
pub use vad::{energy::EnergyVad, VadGate, VoiceActivityDetector};

#[cfg(feature = "whisper")]
pub use inference::{WhisperModel, WhisperModelConfig};

#[cfg(feature = "silero")]
pub use vad::SileroVad;
