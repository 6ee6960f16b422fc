//! whisper.cpp backend via `whisper-rs`.

use std::path::PathBuf;

use tracing::{info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{InferenceOptions, SpeechModel};
use crate::error::{Result, V2mError};

#[derive(Debug, Clone)]
pub struct WhisperModelConfig {
    /// Path to a ggml model file (e.g. `ggml-large-v3-turbo.bin`).
    pub model_path: PathBuf,
    /// Prefer GPU offload; falls back to CPU if initialisation fails.
    pub use_gpu: bool,
}

pub struct WhisperModel {
    config: WhisperModelConfig,
    context: Option<WhisperContext>,
}

impl WhisperModel {
    pub fn new(config: WhisperModelConfig) -> Self {
        // whisper.cpp writes device-probe chatter straight to stderr
        std::env::set_var("WHISPER_LOG_LEVEL", "1");
        Self {
            config,
            context: None,
        }
    }

    fn open_context(&self, use_gpu: bool) -> std::result::Result<WhisperContext, whisper_rs::WhisperError> {
        let path = self.config.model_path.to_string_lossy();
        let mut params = WhisperContextParameters::default();
        params.use_gpu(use_gpu);
        WhisperContext::new_with_params(&path, params)
    }
}

impl SpeechModel for WhisperModel {
    fn load(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }
        if !self.config.model_path.exists() {
            return Err(V2mError::ModelNotFound {
                path: self.config.model_path.clone(),
            });
        }

        let context = if self.config.use_gpu {
            match self.open_context(true) {
                Ok(ctx) => {
                    info!(path = %self.config.model_path.display(), "whisper model loaded on GPU");
                    ctx
                }
                Err(e) => {
                    warn!("GPU init failed ({e}), retrying on CPU");
                    let ctx = self
                        .open_context(false)
                        .map_err(|e| V2mError::ModelLoad(e.to_string()))?;
                    info!(path = %self.config.model_path.display(), "whisper model loaded on CPU");
                    ctx
                }
            }
        } else {
            let ctx = self
                .open_context(false)
                .map_err(|e| V2mError::ModelLoad(e.to_string()))?;
            info!(path = %self.config.model_path.display(), "whisper model loaded on CPU");
            ctx
        };

        self.context = Some(context);
        Ok(())
    }

    fn unload(&mut self) {
        self.context = None;
    }

    fn is_loaded(&self) -> bool {
        self.context.is_some()
    }

    fn transcribe(&mut self, samples: &[f32], options: &InferenceOptions) -> Result<String> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| V2mError::ModelLoad("model not loaded".into()))?;

        let strategy = if options.beam_size <= 1 {
            SamplingStrategy::Greedy { best_of: 1 }
        } else {
            SamplingStrategy::BeamSearch {
                beam_size: options.beam_size as i32,
                patience: 1.0,
            }
        };

        let mut params = FullParams::new(strategy);
        params.set_language(options.language.as_deref());
        params.set_translate(false);
        params.set_no_timestamps(true);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_suppress_blank(true);
        params.set_suppress_non_speech_tokens(options.suppress_non_speech);
        params.set_temperature(options.temperature);
        params.set_no_speech_thold(options.no_speech_threshold);
        params.set_entropy_thold(2.4);
        params.set_logprob_thold(-1.0);
        if let Some(prompt) = options.initial_prompt.as_deref() {
            params.set_initial_prompt(prompt);
        }
        // The sliding context prompt replaces whisper's own carry-over.
        params.set_no_context(true);

        let mut state = context
            .create_state()
            .map_err(|e| anyhow::anyhow!("whisper state: {e}"))?;
        state
            .full(params, samples)
            .map_err(|e| anyhow::anyhow!("whisper full: {e}"))?;

        let segment_count = state
            .full_n_segments()
            .map_err(|e| anyhow::anyhow!("whisper segments: {e}"))?;

        let mut text = String::new();
        for i in 0..segment_count {
            let Ok(segment) = state.full_get_segment_text_lossy(i) else {
                continue;
            };
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }

        Ok(text.trim().to_string())
    }
}
