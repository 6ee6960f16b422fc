//! Echo backend for development without a model file.
//!
//! Lets the whole daemon/IPC/event path run end-to-end: every pass returns a
//! deterministic description of the audio it was handed.

use tracing::debug;

use super::{InferenceOptions, SpeechModel};
use crate::error::Result;

pub struct StubModel {
    loaded: bool,
    pass_count: u32,
}

impl StubModel {
    pub fn new() -> Self {
        Self {
            loaded: false,
            pass_count: 0,
        }
    }
}

impl Default for StubModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechModel for StubModel {
    fn load(&mut self) -> Result<()> {
        debug!("StubModel::load");
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn transcribe(&mut self, samples: &[f32], options: &InferenceOptions) -> Result<String> {
        if samples.len() < 160 {
            return Ok(String::new());
        }
        self.pass_count += 1;
        let kind = if options.beam_size <= 1 { "greedy" } else { "beam" };
        Ok(format!(
            "[stub {} #{}: {} samples]",
            kind, self.pass_count,
            samples.len()
        ))
    }
}
