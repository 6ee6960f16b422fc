//! Typed audio chunk flowing from the capture reader into the transcriber.

use std::time::Duration;

/// Sample rate every chunk is normalised to before it leaves the capture
/// layer. Whisper and Silero both expect 16 kHz mono.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// A contiguous block of mono f32 PCM at [`TARGET_SAMPLE_RATE`].
///
/// Immutable once emitted; ownership moves through the audio queue to the
/// consumer and is never aliased.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Time since the capture session started when this chunk was read.
    pub timestamp: Duration,
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(timestamp: Duration, samples: Vec<f32>) -> Self {
        Self { timestamp, samples }
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / TARGET_SAMPLE_RATE as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
