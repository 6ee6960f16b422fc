//! Silero VAD neural backend.
//!
//! Wraps the Silero VAD ONNX model (<https://github.com/snakers4/silero-vad>)
//! in either of its published interfaces:
//!
//! | Variant | State tensors |
//! |---------|---------------|
//! | v3/v4 LSTM | `h` [2,1,64] / `c` [2,1,64], outputs `hn` / `cn` |
//! | v5 GRU | single `state` [2,1,128], output `stateN` |
//!
//! Input is always `[1, 512]` f32 plus an `sr` scalar of 16000. Incoming
//! windows are accumulated internally so callers may pass any length; only
//! complete 512-sample windows reach the session.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::SessionInputValue;
use ort::value::Value;
use tracing::{info, warn};

use super::{VadDecision, VoiceActivityDetector, VAD_WINDOW};
use crate::error::{Result, V2mError};

/// v3/v4 LSTM state: 2 layers × 1 batch × 64 units.
const LSTM_SIZE: usize = 128;
/// v5 GRU state: 2 layers × 1 batch × 128 units.
const GRU_STATE_SIZE: usize = 256;

/// Default speech-probability threshold.
pub const SILERO_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoMode {
    StatefulLstm,
    StatefulGru,
    Stateless,
}

pub struct SileroVad {
    session: ort::session::Session,
    io_mode: IoMode,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    h_name: Option<String>,
    c_name: Option<String>,
    hn_name: Option<String>,
    cn_name: Option<String>,
    state_name: Option<String>,
    state_out_name: Option<String>,
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
    threshold: f32,
    input_buf: Vec<f32>,
}

impl SileroVad {
    /// Load the model from `path`.
    ///
    /// # Errors
    /// `V2mError::ModelNotFound` if the file is missing,
    /// `V2mError::VadBackend` on any ONNX session failure.
    pub fn new(path: impl AsRef<Path>, threshold: f32) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(V2mError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(|e| V2mError::VadBackend(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| V2mError::VadBackend(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| V2mError::VadBackend("Silero model has no inputs".into()))?;
        let sr_name = resolve_name(&input_names, &["sr", "sample_rate"]);
        let h_name = resolve_name(&input_names, &["h", "state_h"]);
        let c_name = resolve_name(&input_names, &["c", "state_c"]);
        let state_name = resolve_name(&input_names, &["state", "h_0", "hidden"]);

        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| V2mError::VadBackend("Silero model has no outputs".into()))?;
        let hn_name = resolve_name(&output_names, &["hn", "state_hn", "h_out"]);
        let cn_name = resolve_name(&output_names, &["cn", "state_cn", "c_out"]);
        let state_out_name =
            resolve_name(&output_names, &["stateN", "state_out", "h_0_out", "hn_out"]);

        let io_mode =
            if h_name.is_some() && c_name.is_some() && hn_name.is_some() && cn_name.is_some() {
                IoMode::StatefulLstm
            } else if state_name.is_some() {
                IoMode::StatefulGru
            } else {
                IoMode::Stateless
            };

        info!(?path, ?io_mode, threshold, "Silero VAD loaded");

        Ok(Self {
            session,
            io_mode,
            input_name,
            sr_name,
            output_name,
            h_name,
            c_name,
            hn_name,
            cn_name,
            state_name,
            state_out_name,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
            state: vec![0.0; GRU_STATE_SIZE],
            threshold,
            input_buf: Vec::new(),
        })
    }

    /// Default location for the model file.
    pub fn default_model_path() -> PathBuf {
        default_models_dir().join("silero_vad.onnx")
    }

    /// One 512-sample window through the session; updates recurrent state.
    fn run_window(&mut self, window: &[f32]) -> Result<f32> {
        debug_assert_eq!(window.len(), VAD_WINDOW);

        let onnx_err = |e: ort::Error| V2mError::VadBackend(e.to_string());
        let shape_err = |e: ndarray::ShapeError| V2mError::VadBackend(e.to_string());

        let input_arr =
            Array2::<f32>::from_shape_vec((1, VAD_WINDOW), window.to_vec()).map_err(shape_err)?;
        let input_val = Value::from_array(input_arr).map_err(onnx_err)?;

        let mut input_values: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        if let Some(sr_name) = &self.sr_name {
            let sr_arr = Array1::<i64>::from_elem(1, 16_000i64);
            let sr_val = Value::from_array(sr_arr).map_err(onnx_err)?;
            input_values.push((sr_name.clone(), sr_val.into()));
        }

        match self.io_mode {
            IoMode::StatefulLstm => {
                let h_arr =
                    Array3::<f32>::from_shape_vec((2, 1, 64), self.h.clone()).map_err(shape_err)?;
                let c_arr =
                    Array3::<f32>::from_shape_vec((2, 1, 64), self.c.clone()).map_err(shape_err)?;
                if let Some(h_name) = &self.h_name {
                    input_values.push((h_name.clone(), Value::from_array(h_arr).map_err(onnx_err)?.into()));
                }
                if let Some(c_name) = &self.c_name {
                    input_values.push((c_name.clone(), Value::from_array(c_arr).map_err(onnx_err)?.into()));
                }
            }
            IoMode::StatefulGru => {
                let state_arr = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                    .map_err(shape_err)?;
                if let Some(state_name) = &self.state_name {
                    input_values.push((
                        state_name.clone(),
                        Value::from_array(state_arr).map_err(onnx_err)?.into(),
                    ));
                }
            }
            IoMode::Stateless => {}
        }

        let outputs = self
            .session
            .run(input_values)
            .map_err(|e| V2mError::VadBackend(e.to_string()))?;

        let prob_output = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (_, prob_data) = prob_output
            .try_extract_tensor::<f32>()
            .map_err(|e| V2mError::VadBackend(e.to_string()))?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        match self.io_mode {
            IoMode::StatefulLstm => {
                match (self.hn_name.as_ref(), self.cn_name.as_ref()) {
                    (Some(hn_name), Some(cn_name)) => {
                        if let (Some(hn_out), Some(cn_out)) =
                            (outputs.get(hn_name.as_str()), outputs.get(cn_name.as_str()))
                        {
                            let (_, hn_data) = hn_out
                                .try_extract_tensor::<f32>()
                                .map_err(|e| V2mError::VadBackend(e.to_string()))?;
                            let (_, cn_data) = cn_out
                                .try_extract_tensor::<f32>()
                                .map_err(|e| V2mError::VadBackend(e.to_string()))?;
                            self.h = hn_data.to_vec();
                            self.c = cn_data.to_vec();
                        } else {
                            warn!("Silero LSTM state outputs missing; continuing stateless");
                            self.io_mode = IoMode::Stateless;
                        }
                    }
                    _ => self.io_mode = IoMode::Stateless,
                }
            }
            IoMode::StatefulGru => {
                if let Some(state_out_name) = &self.state_out_name {
                    if let Some(state_out) = outputs.get(state_out_name.as_str()) {
                        let (_, state_data) = state_out
                            .try_extract_tensor::<f32>()
                            .map_err(|e| V2mError::VadBackend(e.to_string()))?;
                        self.state = state_data.to_vec();
                    } else {
                        warn!("Silero GRU state output missing; continuing stateless");
                        self.io_mode = IoMode::Stateless;
                    }
                }
            }
            IoMode::Stateless => {}
        }

        Ok(prob)
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

/// `$XDG_DATA_HOME/v2m/models`, with the usual `~/.local/share` fallback.
pub fn default_models_dir() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("v2m")
        .join("models")
}

impl VoiceActivityDetector for SileroVad {
    fn classify(&mut self, window: &[f32]) -> Result<VadDecision> {
        self.input_buf.extend_from_slice(window);

        let mut any_speech = false;
        while self.input_buf.len() >= VAD_WINDOW {
            let full: Vec<f32> = self.input_buf[..VAD_WINDOW].to_vec();
            self.input_buf.drain(..VAD_WINDOW);
            if self.run_window(&full)? >= self.threshold {
                any_speech = true;
            }
        }

        Ok(if any_speech {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        })
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
        self.input_buf.clear();
    }
}
