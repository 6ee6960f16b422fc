//! RMS-energy fallback detector.
//!
//! 1. RMS ≥ `threshold` → `Speech`, hangover reloaded.
//! 2. RMS below threshold inside the hangover window → still `Speech`
//!    (keeps syllable tails from being clipped).
//! 3. Otherwise → `Silence`.

use super::{VadDecision, VoiceActivityDetector};
use crate::error::Result;

/// Default RMS threshold for the fallback path.
pub const ENERGY_THRESHOLD: f32 = 0.01;

#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    hangover_windows: u32,
    hangover_counter: u32,
}

impl EnergyVad {
    pub fn new(threshold: f32, hangover_windows: u32) -> Self {
        Self {
            threshold,
            hangover_windows,
            hangover_counter: 0,
        }
    }

    /// Infallible classification used by `VadGate` directly.
    pub fn detect(&mut self, window: &[f32]) -> bool {
        let rms = rms(window);
        if rms >= self.threshold {
            self.hangover_counter = self.hangover_windows;
            true
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD, 0)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, window: &[f32]) -> Result<VadDecision> {
        Ok(if self.detect(window) {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        })
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }
}

/// Root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn silence_is_below_threshold() {
        let mut vad = EnergyVad::new(0.01, 0);
        assert!(!vad.detect(&vec![0.0f32; 512]));
    }

    #[test]
    fn loud_window_is_speech() {
        let mut vad = EnergyVad::new(0.01, 0);
        assert!(vad.detect(&vec![0.5f32; 512]));
    }

    #[test]
    fn empty_window_is_silence() {
        let mut vad = EnergyVad::default();
        assert!(!vad.detect(&[]));
    }

    #[test]
    fn hangover_extends_speech_then_expires() {
        let mut vad = EnergyVad::new(0.01, 3);
        assert!(vad.detect(&vec![0.5f32; 512]));
        assert!(vad.detect(&vec![0.0f32; 512]));
        assert!(vad.detect(&vec![0.0f32; 512]));
        assert!(vad.detect(&vec![0.0f32; 512]));
        assert!(!vad.detect(&vec![0.0f32; 512]));
    }

    #[test]
    fn reset_clears_hangover() {
        let mut vad = EnergyVad::new(0.01, 5);
        vad.detect(&vec![0.5f32; 512]);
        vad.reset();
        assert!(!vad.detect(&vec![0.0f32; 512]));
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_relative_eq!(rms(&samples), 0.5, epsilon = 1e-5);
    }
}
