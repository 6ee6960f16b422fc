//! Recording workflow: the toggle-based surface between the control plane
//! and the engine.
//!
//! Owns the session state machine (`Idle` ⇄ `Recording`) under one async
//! mutex, the recording-flag file, and result delivery. Clipboard and
//! notifications are injected capabilities and strictly best-effort: a
//! transcription that reached text never fails because the desktop side
//! was broken.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use v2m_core::{BufferedRecorder, StreamingTranscriber, V2mError, WhisperWorker};

use crate::clipboard::Clipboard;
use crate::notify::Notifier;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkflowState {
    Idle,
    Recording,
}

/// Result of a `toggle()` call.
pub enum ToggleOutcome {
    Started,
    Stopped(String),
}

pub struct RecordingWorkflow {
    state: tokio::sync::Mutex<WorkflowState>,
    transcriber: Arc<StreamingTranscriber>,
    worker: Arc<WhisperWorker>,
    clipboard: Arc<dyn Clipboard>,
    notifier: Arc<dyn Notifier>,
    /// Non-streaming capture path, engaged when the ring engine cannot
    /// initialise. `None` disables the fallback (tests).
    fallback: Option<BufferedRecorder>,
    /// Set while the current session runs through the fallback recorder.
    fallback_active: AtomicBool,
    recording_flag: PathBuf,
    /// Where to dump the last bulk take as WAV, when configured.
    audio_dump: Option<PathBuf>,
}

impl RecordingWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transcriber: Arc<StreamingTranscriber>,
        worker: Arc<WhisperWorker>,
        clipboard: Arc<dyn Clipboard>,
        notifier: Arc<dyn Notifier>,
        fallback: Option<BufferedRecorder>,
        recording_flag: PathBuf,
        audio_dump: Option<PathBuf>,
    ) -> Self {
        Self {
            state: tokio::sync::Mutex::new(WorkflowState::Idle),
            transcriber,
            worker,
            clipboard,
            notifier,
            fallback,
            fallback_active: AtomicBool::new(false),
            recording_flag,
            audio_dump,
        }
    }

    /// Pre-load the model so the first dictation is warm. Failure is
    /// logged, not fatal — the model will lazily retry on first use.
    pub async fn warmup(&self) {
        if let Err(e) = self.worker.warmup().await {
            error!("model warmup failed: {e}");
        }
    }

    pub async fn toggle(&self) -> Result<ToggleOutcome> {
        let recording = { *self.state.lock().await == WorkflowState::Recording };
        if recording {
            Ok(ToggleOutcome::Stopped(self.stop().await?))
        } else {
            self.start().await?;
            Ok(ToggleOutcome::Started)
        }
    }

    /// Begin a session. Idempotent while already recording.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == WorkflowState::Recording {
            warn!("start requested while already recording");
            return Ok(());
        }

        match self.transcriber.start() {
            Ok(()) => {
                self.fallback_active.store(false, Ordering::SeqCst);
            }
            // No microphone at all: fail the request, stay Idle.
            Err(e @ V2mError::DeviceUnavailable(_)) | Err(e @ V2mError::NoDefaultInputDevice) => {
                return Err(e.into());
            }
            // The lock-free engine would not come up; fall back to the
            // buffered recorder (no streaming events this session).
            Err(e) => {
                let Some(fallback) = self.fallback.as_ref() else {
                    return Err(e.into());
                };
                warn!("streaming capture unavailable ({e}), using buffered fallback");
                fallback.start()?;
                self.fallback_active.store(true, Ordering::SeqCst);
            }
        }

        if let Err(e) = std::fs::write(&self.recording_flag, std::process::id().to_string()) {
            warn!("could not write recording flag: {e}");
        }
        self.notifier.notify("🎤 voice2machine", "grabación iniciada...");
        *state = WorkflowState::Recording;
        info!("recording started");
        Ok(())
    }

    /// End the session and deliver the transcription. Returns the final
    /// text; empty means no voice was detected.
    pub async fn stop(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if *state == WorkflowState::Idle {
            warn!("stop requested while idle");
            return Ok(String::new());
        }
        *state = WorkflowState::Idle;

        if self.recording_flag.exists() {
            let _ = std::fs::remove_file(&self.recording_flag);
        }
        self.notifier.notify("⚡ v2m procesando", "procesando...");

        let text = if self.fallback_active.swap(false, Ordering::SeqCst) {
            let take = match self.fallback.as_ref() {
                Some(fallback) => fallback.stop()?,
                None => Vec::new(),
            };
            self.dump_take(&take);
            self.transcriber.transcribe_bulk(take).await?
        } else {
            self.transcriber.stop().await?
        };

        if text.trim().is_empty() {
            self.notifier
                .notify("❌ whisper", "no se detectó voz en el audio");
            info!("session ended with no voice detected");
            return Ok(String::new());
        }

        self.deliver(&text).await;
        info!(chars = text.len(), "transcription completed");
        Ok(text)
    }

    pub async fn is_recording(&self) -> bool {
        *self.state.lock().await == WorkflowState::Recording
    }

    pub async fn get_status(&self) -> Value {
        let recording = self.is_recording().await;
        json!({
            "state": if recording { "recording" } else { "idle" },
            "recording": recording,
            "model_loaded": self.worker.is_loaded(),
        })
    }

    /// Stop any session, then release the model.
    pub async fn shutdown(&self) {
        if self.is_recording().await {
            if let Err(e) = self.stop().await {
                warn!("stop during shutdown failed: {e}");
            }
        }
        if let Err(e) = self.worker.unload().await {
            warn!("model unload failed: {e}");
        }
    }

    async fn deliver(&self, text: &str) {
        let owned = text.to_string();
        let clipboard = Arc::clone(&self.clipboard);
        let copied = tokio::task::spawn_blocking(move || clipboard.copy(&owned))
            .await
            .unwrap_or_else(|e| Err(anyhow::anyhow!("clipboard task panicked: {e}")));

        match copied {
            Ok(()) => {
                let preview: String = text.chars().take(PREVIEW_CHARS).collect();
                self.notifier
                    .notify("✅ whisper - copiado", &format!("{preview}..."));
            }
            Err(e) => {
                warn!("clipboard copy failed: {e}");
                self.notifier
                    .notify("⚠️ whisper", "transcripción lista, fallo al copiar");
            }
        }
    }

    fn dump_take(&self, samples: &[f32]) {
        let Some(path) = self.audio_dump.as_ref() else {
            return;
        };
        if samples.is_empty() {
            return;
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: v2m_core::TARGET_SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let result = hound::WavWriter::create(path, spec).and_then(|mut writer| {
            for &sample in samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()
        });
        match result {
            Ok(()) => info!(path = %path.display(), "saved last take"),
            Err(e) => warn!("could not save take: {e}"),
        }
    }
}
