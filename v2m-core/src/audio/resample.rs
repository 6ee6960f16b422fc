//! Incremental sample-rate conversion on the reader side of the ring.
//!
//! Capture runs at whatever rate the device reports (48 kHz is typical on
//! Linux). Whisper and Silero both want 16 kHz mono, so every drained block
//! goes through a `rubato::FastFixedIn` session before it becomes an
//! `AudioChunk`. When the rates already match, no rubato session is created
//! and `process` is a plain copy.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, V2mError};

/// Input frames fed to rubato per call. 20 ms at 48 kHz.
const CONVERT_CHUNK: usize = 960;

/// Converts mono f32 audio from the capture rate to the model rate.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough).
    resampler: Option<FastFixedIn<f32>>,
    /// Carry-over input that did not fill a whole rubato block.
    pending: Vec<f32>,
    /// Pre-allocated rubato output: `[1][output_frames_max]`.
    output: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `V2mError::AudioStream` if rubato refuses the ratio.
    pub fn new(capture_rate: u32, target_rate: u32) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                output: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            CONVERT_CHUNK,
            1, // mono
        )
        .map_err(|e| V2mError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            output: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Convert `samples`, returning whatever full blocks are ready.
    /// Remainders are carried into the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.pending.len() >= CONVERT_CHUNK {
            let block = &self.pending[..CONVERT_CHUNK];
            match resampler.process_into_buffer(&[block], &mut self.output, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..CONVERT_CHUNK);
        }
        result
    }

    /// Flush the carry-over by zero-padding to a full block. Call once at
    /// the end of a session; the converter stays usable afterwards.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.pending.is_empty() {
            self.pending.clear();
            return Vec::new();
        }
        let pad = CONVERT_CHUNK - self.pending.len() % CONVERT_CHUNK;
        if pad < CONVERT_CHUNK {
            self.pending.extend(std::iter::repeat(0f32).take(pad));
        }
        let carry = std::mem::take(&mut self.pending);
        self.process(&carry)
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input_unchanged() {
        let mut rc = RateConverter::new(16_000, 16_000).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsamples_48k_to_16k_at_one_third_length() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty());
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "got {} samples, expected ≈320",
            out.len()
        );
    }

    #[test]
    fn partial_block_is_held_until_full() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).is_empty());
    }

    #[test]
    fn finish_flushes_the_remainder() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        assert!(rc.process(&vec![0.5f32; 500]).is_empty());
        let tail = rc.finish();
        assert!(!tail.is_empty(), "finish should drain the held samples");
    }
}
