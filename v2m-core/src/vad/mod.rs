//! Voice activity detection.
//!
//! `VoiceActivityDetector` is the backend seam: `SileroVad` (neural, ONNX)
//! is the primary, `EnergyVad` (RMS) the fallback. `VadGate` owns both and
//! is what the transcriber talks to — it routes short windows to energy
//! detection, falls back automatically when the neural backend errors, and
//! rate-limits the resulting warnings.

pub mod energy;

#[cfg(feature = "silero")]
pub mod silero;

#[cfg(feature = "silero")]
pub use silero::SileroVad;

use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::Result;

use energy::EnergyVad;

/// Window size the neural backend expects: 512 samples ≈ 32 ms at 16 kHz.
pub const VAD_WINDOW: usize = 512;

/// Minimum spacing between logged primary-backend failures.
const BACKEND_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Silence kept around speech in batch trimming: 12 windows ≈ 384 ms.
const TRIM_PAD_WINDOWS: usize = 12;

/// Whether a window contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Backend contract. Implementors may be stateful (RNN hidden state,
/// hangover counters); all such state is reset between segments.
pub trait VoiceActivityDetector: Send {
    /// Classify one window of 16 kHz mono samples.
    fn classify(&mut self, window: &[f32]) -> Result<VadDecision>;

    /// Drop internal carry-over state.
    fn reset(&mut self);
}

/// Primary-plus-fallback VAD front end.
pub struct VadGate {
    primary: Option<Box<dyn VoiceActivityDetector>>,
    fallback: EnergyVad,
    last_backend_warn: Option<Instant>,
}

impl VadGate {
    pub fn new(primary: Option<Box<dyn VoiceActivityDetector>>, fallback: EnergyVad) -> Self {
        Self {
            primary,
            fallback,
            last_backend_warn: None,
        }
    }

    /// Energy-only gate (no neural backend available).
    pub fn energy_only(threshold: f32) -> Self {
        Self::new(None, EnergyVad::new(threshold, 0))
    }

    /// Classify a window. Windows shorter than [`VAD_WINDOW`] skip the
    /// neural backend — its recurrent state is ill-conditioned on partial
    /// input — and go straight to energy detection.
    pub fn detect(&mut self, window: &[f32]) -> bool {
        if window.len() >= VAD_WINDOW {
            if let Some(primary) = self.primary.as_mut() {
                match primary.classify(window) {
                    Ok(decision) => return decision.is_speech(),
                    Err(e) => self.warn_backend(&e),
                }
            }
        }
        self.fallback.detect(window)
    }

    /// Reset all backend state. Called at segment start.
    pub fn reset(&mut self) {
        if let Some(primary) = self.primary.as_mut() {
            primary.reset();
        }
        self.fallback.reset();
    }

    /// Batch mode for the non-streaming path: keep speech-classified
    /// windows plus [`TRIM_PAD_WINDOWS`] of surrounding context, drop the
    /// rest. Resets the gate afterwards.
    pub fn trim_silence(&mut self, samples: &[f32]) -> Vec<f32> {
        let windows: Vec<&[f32]> = samples.chunks(VAD_WINDOW).collect();
        if windows.is_empty() {
            return Vec::new();
        }

        let decisions: Vec<bool> = windows.iter().map(|w| self.detect(w)).collect();
        self.reset();

        if !decisions.iter().any(|&d| d) {
            return Vec::new();
        }

        let mut keep = vec![false; windows.len()];
        for (i, &speech) in decisions.iter().enumerate() {
            if speech {
                let lo = i.saturating_sub(TRIM_PAD_WINDOWS);
                let hi = (i + TRIM_PAD_WINDOWS).min(windows.len() - 1);
                for flag in &mut keep[lo..=hi] {
                    *flag = true;
                }
            }
        }

        let mut out = Vec::with_capacity(samples.len());
        for (window, &kept) in windows.iter().zip(keep.iter()) {
            if kept {
                out.extend_from_slice(window);
            }
        }
        out
    }

    fn warn_backend(&mut self, error: &crate::error::V2mError) {
        let now = Instant::now();
        let due = self
            .last_backend_warn
            .map(|t| now.duration_since(t) >= BACKEND_WARN_INTERVAL)
            .unwrap_or(true);
        if due {
            warn!("VAD backend failed, using energy fallback: {error}");
            self.last_backend_warn = Some(now);
        }
    }
}
