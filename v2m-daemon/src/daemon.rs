//! The daemon: composition root, control socket, command dispatch.
//!
//! ## Lifecycle
//!
//! ```text
//! bootstrap() → build engine + collaborators from config
//!     run()   → reap orphans, bind socket, write PID file, warm up in
//!               background, accept loop (SIGINT / SIGTERM / SHUTDOWN end it)
//!               graceful shutdown: stop workflow, unload model, clean files
//! ```
//!
//! ## Event channel
//!
//! Engine events fan out through a broadcast channel. Exactly one client
//! connection is the event sink at a time — the most recent one (Last-Write
//! -Wins). Writes to a sink that went away silently drop it; one-shot CLI
//! clients come and go without ceremony.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use v2m_core::{
    inference::stub::StubModel, AudioCapture, BufferedRecorder, CaptureConfig, EngineEvent,
    EnergyVad, SileroVad, SpeechModel, StreamingTranscriber, TranscriberConfig, VadGate,
    WhisperModel, WhisperModelConfig, WhisperWorker,
};

use crate::clipboard::{Clipboard, SystemClipboard};
use crate::config::DaemonConfig;
use crate::llm::{LlmService, OllamaClient};
use crate::notify::{DesktopNotifier, Notifier, SilentNotifier};
use crate::paths::RuntimePaths;
use crate::protocol::{
    read_frame, write_json, FrameError, IpcCommand, IpcRequest, IpcResponse,
};
use crate::reaper;
use crate::telemetry::Telemetry;
use crate::workflow::RecordingWorkflow;

const EVENT_CHANNEL_CAP: usize = 256;

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

pub struct Daemon {
    paths: RuntimePaths,
    workflow: Arc<RecordingWorkflow>,
    llm: Arc<dyn LlmService>,
    notifier: Arc<dyn Notifier>,
    telemetry: Telemetry,
    config: parking_lot::Mutex<DaemonConfig>,
    config_path: PathBuf,
    paused: AtomicBool,
    shutdown: tokio::sync::Notify,
    events: broadcast::Sender<EngineEvent>,
    event_sink: Arc<tokio::sync::Mutex<Option<SharedWriter>>>,
}

impl Daemon {
    /// Composition root: wire the engine and its collaborators from config.
    /// `paths` is injected so tests can run against a scratch directory.
    pub fn bootstrap(config_path: PathBuf, paths: RuntimePaths) -> Result<Arc<Self>> {
        let config = DaemonConfig::load(&config_path);
        let (events, _) = broadcast::channel::<EngineEvent>(EVENT_CHANNEL_CAP);

        let capture = Arc::new(AudioCapture::new(CaptureConfig {
            preferred_device: config.audio.preferred_device.clone(),
            max_duration_secs: config.audio.max_duration_secs,
        }));

        let model: Box<dyn SpeechModel> = if config.whisper.model_path.is_empty() {
            warn!("no whisper model configured, using the echo stub backend");
            Box::new(StubModel::new())
        } else {
            Box::new(WhisperModel::new(WhisperModelConfig {
                model_path: PathBuf::from(&config.whisper.model_path),
                use_gpu: config.whisper.device == "gpu",
            }))
        };
        let worker = Arc::new(WhisperWorker::new(model));

        let silero_path = config
            .vad
            .model_path
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(SileroVad::default_model_path);
        let vad = match SileroVad::new(&silero_path, config.vad.threshold) {
            Ok(silero) => VadGate::new(Some(Box::new(silero)), EnergyVad::default()),
            Err(e) => {
                warn!("Silero VAD unavailable ({e}), energy detection only");
                VadGate::energy_only(v2m_core::vad::energy::ENERGY_THRESHOLD)
            }
        };

        let transcriber_config = TranscriberConfig {
            silence_commit_ms: config.vad.silence_commit_ms,
            language: config.language_hint(),
            beam_size: config.whisper.beam_size,
            temperature: config.whisper.temperature,
            ..TranscriberConfig::default()
        };

        let transcriber = Arc::new(StreamingTranscriber::new(
            capture,
            Arc::clone(&worker),
            vad,
            Arc::new(events.clone()),
            transcriber_config,
        ));

        let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
            Arc::new(DesktopNotifier::new(config.notifications.expire_ms))
        } else {
            Arc::new(SilentNotifier)
        };
        let clipboard: Arc<dyn Clipboard> = Arc::new(SystemClipboard);

        let fallback = BufferedRecorder::new(config.audio.preferred_device.clone());
        let audio_dump = config
            .audio
            .save_last_recording
            .then(|| paths.audio_dump.clone());

        let workflow = Arc::new(RecordingWorkflow::new(
            transcriber,
            Arc::clone(&worker),
            clipboard,
            Arc::clone(&notifier),
            Some(fallback),
            paths.recording_flag.clone(),
            audio_dump,
        ));

        let llm: Arc<dyn LlmService> = Arc::new(OllamaClient::new(
            config.llm.ollama_url.clone(),
            config.llm.model.clone(),
            Duration::from_secs(config.llm.request_timeout_secs),
        )?);

        Ok(Arc::new(Self {
            paths,
            workflow,
            llm,
            notifier,
            telemetry: Telemetry::new(),
            config: parking_lot::Mutex::new(config),
            config_path,
            paused: AtomicBool::new(false),
            shutdown: tokio::sync::Notify::new(),
            events,
            event_sink: Arc::new(tokio::sync::Mutex::new(None)),
        }))
    }

    /// Serve until a signal or a SHUTDOWN command arrives.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        reaper::reap_orphans(&self.paths);

        if self.paths.socket.exists() {
            // A live socket means another daemon owns this runtime dir.
            if UnixStream::connect(&self.paths.socket).await.is_ok() {
                bail!("daemon already running at {}", self.paths.socket.display());
            }
            std::fs::remove_file(&self.paths.socket)
                .with_context(|| format!("removing dead socket {}", self.paths.socket.display()))?;
        }

        let listener = UnixListener::bind(&self.paths.socket)
            .with_context(|| format!("binding {}", self.paths.socket.display()))?;
        std::fs::write(&self.paths.pid_file, std::process::id().to_string())
            .context("writing PID file")?;
        info!(
            socket = %self.paths.socket.display(),
            pid = std::process::id(),
            "daemon listening"
        );

        // Warm the model while the socket is already serving.
        let warm = Arc::clone(&self.workflow);
        tokio::spawn(async move { warm.warmup().await });

        tokio::spawn(event_pump(
            self.events.subscribe(),
            Arc::clone(&self.event_sink),
        ));

        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .context("installing SIGINT handler")?;
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let daemon = Arc::clone(&self);
                        tokio::spawn(async move { daemon.handle_client(stream).await });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                _ = sigint.recv() => {
                    info!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received");
                    break;
                }
                _ = self.shutdown.notified() => break,
            }
        }

        self.graceful_shutdown().await;
        Ok(())
    }

    async fn graceful_shutdown(&self) {
        info!("shutting down");
        self.workflow.shutdown().await;
        self.paths.remove_stale_files();
        info!("shutdown complete");
    }

    /// Serve one client connection. The connection becomes the event sink
    /// on arrival and may issue any number of framed requests.
    async fn handle_client(self: Arc<Self>, stream: UnixStream) {
        let (mut reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));

        // Last-Write-Wins: this connection supersedes any previous sink.
        {
            *self.event_sink.lock().await = Some(Arc::clone(&writer));
        }

        loop {
            let payload = match read_frame(&mut reader).await {
                Ok(payload) => payload,
                Err(FrameError::Oversized { declared }) => {
                    warn!(declared, "rejecting oversized frame");
                    let response = IpcResponse::error("payload exceeds limit");
                    let mut w = writer.lock().await;
                    let _ = write_json(&mut *w, &response).await;
                    break;
                }
                Err(FrameError::Io(e)) => {
                    debug!("client connection closed: {e}");
                    break;
                }
            };

            let (response, is_shutdown) = self.process(&payload).await;
            {
                let mut w = writer.lock().await;
                if write_json(&mut *w, &response).await.is_err() {
                    break;
                }
            }
            if is_shutdown {
                self.shutdown.notify_one();
                break;
            }
        }
    }

    /// Parse one framed payload and dispatch it. Returns the response and
    /// whether it was a SHUTDOWN.
    pub async fn process(&self, payload: &[u8]) -> (IpcResponse, bool) {
        let request: IpcRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("rejecting malformed request: {e}");
                return (IpcResponse::error(format!("invalid JSON format: {e}")), false);
            }
        };

        let Some(cmd) = IpcCommand::parse(&request.cmd) else {
            warn!(cmd = request.cmd.as_str(), "unknown command");
            return (
                IpcResponse::error(format!("unknown command: {}", request.cmd)),
                false,
            );
        };
        debug!(cmd = cmd.as_str(), "dispatching");

        if self.paused.load(Ordering::SeqCst) && !cmd.allowed_while_paused() {
            return (IpcResponse::error("daemon paused"), false);
        }

        let data = request.data.unwrap_or(serde_json::Value::Null);
        let response = match cmd {
            IpcCommand::Ping => IpcResponse::success(json!({"message": "PONG"})),

            IpcCommand::GetStatus => {
                let state = if self.paused.load(Ordering::SeqCst) {
                    "paused".to_string()
                } else if self.workflow.is_recording().await {
                    "recording".to_string()
                } else {
                    "idle".to_string()
                };
                IpcResponse::success(json!({
                    "state": state,
                    "telemetry": self.telemetry.snapshot(),
                }))
            }

            IpcCommand::StartRecording => match self.workflow.start().await {
                Ok(()) => IpcResponse::success(json!({
                    "state": "recording",
                    "message": "grabación iniciada",
                })),
                Err(e) => IpcResponse::error(e.to_string()),
            },

            IpcCommand::StopRecording => match self.workflow.stop().await {
                Ok(transcription) => IpcResponse::success(json!({
                    "state": "idle",
                    "transcription": transcription,
                })),
                Err(e) => IpcResponse::error(e.to_string()),
            },

            IpcCommand::ProcessText => match data.get("text").and_then(|t| t.as_str()) {
                None => IpcResponse::error("missing data.text in payload"),
                Some(text) => {
                    let refined = self.refine(text, None).await;
                    IpcResponse::success(json!({"refined_text": refined}))
                }
            },

            IpcCommand::TranslateText => match data.get("text").and_then(|t| t.as_str()) {
                None => IpcResponse::error("missing data.text in payload"),
                Some(text) => {
                    let target = data
                        .get("target_lang")
                        .and_then(|l| l.as_str())
                        .unwrap_or("en");
                    let refined = self.refine(text, Some(target)).await;
                    IpcResponse::success(json!({"refined_text": refined, "state": "idle"}))
                }
            },

            IpcCommand::UpdateConfig => match data.get("updates") {
                None => IpcResponse::error("missing data.updates in payload"),
                Some(updates) => {
                    let merged = { self.config.lock().merged_with(updates) };
                    match merged {
                        Ok(merged) => {
                            if let Err(e) = merged.save(&self.config_path) {
                                warn!("could not persist config: {e}");
                            }
                            let snapshot = serde_json::to_value(&merged)
                                .unwrap_or(serde_json::Value::Null);
                            *self.config.lock() = merged;
                            IpcResponse::success(json!({"config": snapshot}))
                        }
                        Err(e) => IpcResponse::error(e.to_string()),
                    }
                }
            },

            IpcCommand::GetConfig => {
                let snapshot =
                    serde_json::to_value(&*self.config.lock()).unwrap_or(serde_json::Value::Null);
                IpcResponse::success(json!({"config": snapshot}))
            }

            IpcCommand::PauseDaemon => {
                self.paused.store(true, Ordering::SeqCst);
                IpcResponse::success(json!({"state": "paused"}))
            }

            IpcCommand::ResumeDaemon => {
                self.paused.store(false, Ordering::SeqCst);
                IpcResponse::success(json!({"state": "running"}))
            }

            IpcCommand::Shutdown => IpcResponse::success(json!({"message": "SHUTTING_DOWN"})),
        };

        (response, cmd == IpcCommand::Shutdown)
    }

    /// Run the LLM, falling back to the input text when the service is
    /// unreachable — a lost refinement must not lose the dictation.
    async fn refine(&self, text: &str, target_lang: Option<&str>) -> String {
        let result = match target_lang {
            Some(lang) => self.llm.translate_text(text, lang).await,
            None => self.llm.process_text(text).await,
        };
        match result {
            Ok(refined) if !refined.is_empty() => refined,
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!("LLM request failed: {e}");
                self.notifier.notify("❌ v2m", "LLM failed");
                text.to_string()
            }
        }
    }

}

/// Forward engine events to whichever connection is the current sink.
async fn event_pump(
    mut rx: broadcast::Receiver<EngineEvent>,
    sink: Arc<tokio::sync::Mutex<Option<SharedWriter>>>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event sink lagged, dropping events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let current = { sink.lock().await.clone() };
        let Some(writer) = current else { continue };

        let data = match serde_json::to_value(&event) {
            Ok(data) => data,
            Err(e) => {
                warn!("could not serialise event: {e}");
                continue;
            }
        };
        let frame = IpcResponse::event(data);

        let failed = {
            let mut w = writer.lock().await;
            write_json(&mut *w, &frame).await.is_err()
        };
        if failed {
            // The sink went away; clear it unless a newer one took over.
            let mut guard = sink.lock().await;
            if guard
                .as_ref()
                .map(|cur| Arc::ptr_eq(cur, &writer))
                .unwrap_or(false)
            {
                *guard = None;
            }
        }
    }
}
