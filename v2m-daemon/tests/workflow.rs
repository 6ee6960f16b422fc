//! Workflow tests with scripted engine and recording fake collaborators.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use v2m_core::{
    error::{Result as CoreResult, V2mError},
    inference::InferenceOptions,
    vad::VadGate,
    AudioSource, NullSink, SpeechModel, StreamingTranscriber, TranscriberConfig, WhisperWorker,
};
use v2m_daemon::clipboard::Clipboard;
use v2m_daemon::notify::Notifier;
use v2m_daemon::workflow::{RecordingWorkflow, ToggleOutcome};

const CHUNK: usize = 1600;

enum AudioScript {
    /// Serve these chunks, paced.
    Chunks(VecDeque<Vec<f32>>),
    /// Refuse to start with this error constructor.
    FailStart(fn() -> V2mError),
}

struct ScriptedAudio {
    script: Mutex<AudioScript>,
    recording: AtomicBool,
}

impl ScriptedAudio {
    fn with_chunks(chunks: Vec<Vec<f32>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(AudioScript::Chunks(chunks.into())),
            recording: AtomicBool::new(false),
        })
    }

    fn failing(error: fn() -> V2mError) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(AudioScript::FailStart(error)),
            recording: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AudioSource for ScriptedAudio {
    fn start(&self) -> CoreResult<()> {
        if let AudioScript::FailStart(make) = &*self.script.lock() {
            return Err(make());
        }
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_data(&self) {
        let empty = match &*self.script.lock() {
            AudioScript::Chunks(chunks) => chunks.is_empty(),
            AudioScript::FailStart(_) => true,
        };
        if empty {
            while self.recording.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        } else {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn read_chunk(&self) -> Vec<f32> {
        match &mut *self.script.lock() {
            AudioScript::Chunks(chunks) => chunks.pop_front().unwrap_or_default(),
            AudioScript::FailStart(_) => Vec::new(),
        }
    }

    fn stop(&self) -> CoreResult<()> {
        self.recording.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn overrun_count(&self) -> u64 {
        0
    }
}

struct FixedModel {
    text: String,
}

impl SpeechModel for FixedModel {
    fn load(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn unload(&mut self) {}

    fn is_loaded(&self) -> bool {
        true
    }

    fn transcribe(&mut self, _samples: &[f32], _options: &InferenceOptions) -> CoreResult<String> {
        Ok(self.text.clone())
    }
}

#[derive(Clone, Default)]
struct RecordingClipboard {
    copied: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
}

impl Clipboard for RecordingClipboard {
    fn copy(&self, text: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("scripted clipboard failure");
        }
        self.copied.lock().push(text.to_string());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) {
        self.messages.lock().push((title.into(), message.into()));
    }
}

impl RecordingNotifier {
    fn titles(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    fn bodies(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(_, b)| b.clone()).collect()
    }
}

struct Fixture {
    workflow: RecordingWorkflow,
    clipboard: RecordingClipboard,
    notifier: RecordingNotifier,
    flag: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn fixture(audio: Arc<ScriptedAudio>, final_text: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let flag = dir.path().join("v2m_recording.pid");

    let worker = Arc::new(WhisperWorker::new(Box::new(FixedModel {
        text: final_text.to_string(),
    })));
    let config = TranscriberConfig {
        min_segment_duration: 0.1,
        silence_commit_ms: 150,
        enable_provisional: false,
        heartbeat_interval_ms: 60_000,
        ..TranscriberConfig::default()
    };
    let transcriber = Arc::new(StreamingTranscriber::new(
        audio,
        Arc::clone(&worker),
        VadGate::energy_only(0.01),
        Arc::new(NullSink),
        config,
    ));

    let clipboard = RecordingClipboard::default();
    let notifier = RecordingNotifier::default();
    let workflow = RecordingWorkflow::new(
        transcriber,
        worker,
        Arc::new(clipboard.clone()),
        Arc::new(notifier.clone()),
        None,
        flag.clone(),
        None,
    );

    Fixture {
        workflow,
        clipboard,
        notifier,
        flag,
        _dir: dir,
    }
}

fn speech_then_silence() -> Vec<Vec<f32>> {
    let mut chunks: Vec<Vec<f32>> = (0..8).map(|_| vec![0.5f32; CHUNK]).collect();
    chunks.extend((0..10).map(|_| vec![0.0f32; CHUNK]));
    chunks
}

#[tokio::test]
async fn toggle_runs_a_full_dictation_cycle() {
    let fx = fixture(ScriptedAudio::with_chunks(speech_then_silence()), "hola mundo");

    match fx.workflow.toggle().await.unwrap() {
        ToggleOutcome::Started => {}
        ToggleOutcome::Stopped(_) => panic!("first toggle must start"),
    }
    assert!(fx.workflow.is_recording().await);
    assert!(fx.flag.exists(), "recording flag created");

    tokio::time::sleep(Duration::from_millis(700)).await;

    let text = match fx.workflow.toggle().await.unwrap() {
        ToggleOutcome::Stopped(text) => text,
        ToggleOutcome::Started => panic!("second toggle must stop"),
    };
    assert_eq!(text, "hola mundo");
    assert!(!fx.workflow.is_recording().await);
    assert!(!fx.flag.exists(), "recording flag cleared");

    assert_eq!(fx.clipboard.copied.lock().as_slice(), ["hola mundo"]);
    let titles = fx.notifier.titles();
    assert!(titles.iter().any(|t| t.contains("voice2machine")));
    assert!(titles.iter().any(|t| t.contains("copiado")));
}

#[tokio::test]
async fn silence_only_session_reports_no_voice() {
    let silence: Vec<Vec<f32>> = (0..10).map(|_| vec![0.0f32; CHUNK]).collect();
    let fx = fixture(ScriptedAudio::with_chunks(silence), "nunca");

    fx.workflow.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let text = fx.workflow.stop().await.unwrap();

    assert_eq!(text, "");
    assert!(fx.clipboard.copied.lock().is_empty());
    assert!(fx
        .notifier
        .bodies()
        .iter()
        .any(|b| b.contains("no se detectó voz")));
}

#[tokio::test]
async fn start_is_idempotent_and_stop_when_idle_is_a_noop() {
    let fx = fixture(ScriptedAudio::with_chunks(vec![]), "x");

    let first = fx.workflow.stop().await.unwrap();
    assert_eq!(first, "", "stop while idle is a clean no-op");

    fx.workflow.start().await.unwrap();
    fx.workflow.start().await.unwrap();
    assert!(fx.workflow.is_recording().await);

    fx.workflow.stop().await.unwrap();
    let again = fx.workflow.stop().await.unwrap();
    assert_eq!(again, "");
}

#[tokio::test]
async fn unavailable_device_fails_start_and_stays_idle() {
    let fx = fixture(
        ScriptedAudio::failing(|| V2mError::DeviceUnavailable("no microphone".into())),
        "x",
    );

    let err = fx.workflow.start().await.unwrap_err();
    assert!(err.to_string().contains("no microphone"));
    assert!(!fx.workflow.is_recording().await);
    assert!(!fx.flag.exists(), "no flag file on failed start");
}

#[tokio::test]
async fn engine_init_failure_without_fallback_is_an_error() {
    let fx = fixture(
        ScriptedAudio::failing(|| V2mError::AudioStream("engine refused".into())),
        "x",
    );
    assert!(fx.workflow.start().await.is_err());
    assert!(!fx.workflow.is_recording().await);
}

#[tokio::test]
async fn clipboard_failure_does_not_fail_the_transcription() {
    let fx = fixture(ScriptedAudio::with_chunks(speech_then_silence()), "texto frágil");
    fx.clipboard.fail.store(true, Ordering::SeqCst);

    fx.workflow.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    let text = fx.workflow.stop().await.unwrap();

    assert_eq!(text, "texto frágil", "text survives a broken clipboard");
    assert!(fx
        .notifier
        .bodies()
        .iter()
        .any(|b| b.contains("fallo al copiar")));
}

#[tokio::test]
async fn status_reports_state_and_model() {
    let fx = fixture(ScriptedAudio::with_chunks(vec![]), "x");
    let status = fx.workflow.get_status().await;
    assert_eq!(status["state"], "idle");
    assert_eq!(status["recording"], false);
    assert!(status["model_loaded"].is_boolean());
}

#[tokio::test]
async fn shutdown_stops_recording_and_unloads() {
    let fx = fixture(ScriptedAudio::with_chunks(speech_then_silence()), "adios");
    fx.workflow.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    fx.workflow.shutdown().await;
    assert!(!fx.workflow.is_recording().await);
}
