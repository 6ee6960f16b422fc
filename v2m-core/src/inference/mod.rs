//! Speech model ownership and inference serialisation.
//!
//! `SpeechModel` is the backend seam (whisper.cpp in production, a scripted
//! echo in tests). `WhisperWorker` owns the model exclusively on a dedicated
//! executor thread: jobs arrive over an unbounded channel and run strictly
//! FIFO, so at most one inference touches the model (and the GPU) at a time.
//! Neither the IPC tasks nor the capture path ever execute model code.

pub mod stub;

#[cfg(feature = "whisper")]
pub mod whisper;

#[cfg(feature = "whisper")]
pub use whisper::{WhisperModel, WhisperModelConfig};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use parking_lot::Mutex;
use sysinfo::System;
use tracing::{debug, error, info, warn};

use crate::error::{Result, V2mError};

/// Memory fraction above which inference proceeds under protest.
const MEMORY_PRESSURE_FRACTION: f64 = 0.90;

/// Decoding parameters for one inference pass.
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    /// ISO 639-1 language hint; `None` lets the model detect.
    pub language: Option<String>,
    /// 1 selects greedy decoding; larger values use beam search.
    pub beam_size: u32,
    pub temperature: f32,
    /// Recent transcript fed as the initial prompt for continuity.
    pub initial_prompt: Option<String>,
    /// Engage the model's own non-speech suppression.
    pub suppress_non_speech: bool,
    pub no_speech_threshold: f32,
}

impl InferenceOptions {
    /// Fast greedy pass for live preview.
    pub fn provisional(language: Option<String>, initial_prompt: Option<String>) -> Self {
        Self {
            language,
            beam_size: 1,
            temperature: 0.0,
            initial_prompt,
            suppress_non_speech: false,
            no_speech_threshold: 0.6,
        }
    }

    /// Quality pass for committed segments.
    pub fn final_pass(
        language: Option<String>,
        beam_size: u32,
        temperature: f32,
        initial_prompt: Option<String>,
    ) -> Self {
        Self {
            language,
            beam_size,
            temperature,
            initial_prompt,
            suppress_non_speech: true,
            no_speech_threshold: 0.6,
        }
    }
}

/// Contract for transcription backends. Implementors are stateful; every
/// call is serialised through the worker's executor thread.
pub trait SpeechModel: Send + 'static {
    /// Load weights. Idempotent.
    fn load(&mut self) -> Result<()>;

    /// Release weights. The next `transcribe` triggers a lazy reload.
    fn unload(&mut self);

    fn is_loaded(&self) -> bool;

    /// Transcribe 16 kHz mono samples to text.
    fn transcribe(&mut self, samples: &[f32], options: &InferenceOptions) -> Result<String>;
}

type Job = Box<dyn FnOnce(&mut Box<dyn SpeechModel>) + Send>;

/// Persistent, warm, single-threaded inference executor.
pub struct WhisperWorker {
    jobs: crossbeam_channel::Sender<Job>,
    /// Guards load/unload against concurrent inference submission.
    session: tokio::sync::Mutex<()>,
    loaded: Arc<AtomicBool>,
    system: Mutex<System>,
}

impl WhisperWorker {
    /// Take ownership of `model` and spawn the executor thread.
    pub fn new(model: Box<dyn SpeechModel>) -> Self {
        let (jobs, rx) = crossbeam_channel::unbounded::<Job>();
        std::thread::Builder::new()
            .name("v2m-whisper".into())
            .spawn(move || {
                let mut model = model;
                for job in rx {
                    job(&mut model);
                }
                debug!("inference executor exiting");
            })
            .expect("failed to spawn inference executor thread");

        Self {
            jobs,
            session: tokio::sync::Mutex::new(()),
            loaded: Arc::new(AtomicBool::new(false)),
            system: Mutex::new(System::new()),
        }
    }

    /// Pre-load the model. Idempotent; callers may fire this in the
    /// background at daemon start so the first dictation is warm.
    pub async fn warmup(&self) -> Result<()> {
        let _guard = self.session.lock().await;
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.load_locked().await
    }

    /// Release the model weights.
    pub async fn unload(&self) -> Result<()> {
        let _guard = self.session.lock().await;
        if !self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let loaded = Arc::clone(&self.loaded);
        self.submit(move |model| {
            model.unload();
            loaded.store(false, Ordering::Release);
        })
        .await?;
        info!("speech model unloaded");
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Run `f` against the model on the executor thread. Callers queue FIFO;
    /// exactly one closure runs at a time. Lazily loads first if needed.
    pub async fn run_inference<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn SpeechModel) -> Result<R> + Send + 'static,
    {
        let _guard = self.session.lock().await;
        if !self.loaded.load(Ordering::Acquire) {
            self.load_locked().await?;
        }
        self.check_memory_pressure();

        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        self.jobs
            .send(Box::new(move |model| {
                let start = Instant::now();
                let result = f(model.as_mut());
                let _ = done_tx.send((result, start.elapsed()));
            }))
            .map_err(|_| V2mError::WorkerGone)?;

        let (result, elapsed) = done_rx.await.map_err(|_| V2mError::WorkerGone)?;
        match result {
            Ok(value) => {
                debug!(?elapsed, "inference completed");
                Ok(value)
            }
            Err(e) => {
                error!(?elapsed, "inference failed: {e}");
                Err(match e {
                    inference @ V2mError::Inference { .. } => inference,
                    other => V2mError::inference(other.to_string(), elapsed),
                })
            }
        }
    }

    /// Convenience wrapper over [`Self::run_inference`].
    pub async fn transcribe(&self, samples: Vec<f32>, options: InferenceOptions) -> Result<String> {
        self.run_inference(move |model| model.transcribe(&samples, &options))
            .await
    }

    async fn load_locked(&self) -> Result<()> {
        let loaded = Arc::clone(&self.loaded);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        self.jobs
            .send(Box::new(move |model| {
                let result = model.load();
                if result.is_ok() {
                    loaded.store(true, Ordering::Release);
                }
                let _ = done_tx.send(result);
            }))
            .map_err(|_| V2mError::WorkerGone)?;
        done_rx.await.map_err(|_| V2mError::WorkerGone)??;
        info!("speech model ready");
        Ok(())
    }

    async fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Box<dyn SpeechModel>) + Send + 'static,
    {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        self.jobs
            .send(Box::new(move |model| {
                f(model);
                let _ = done_tx.send(());
            }))
            .map_err(|_| V2mError::WorkerGone)?;
        done_rx.await.map_err(|_| V2mError::WorkerGone)
    }

    /// Failing a request over memory pressure is worse UX than a slow one,
    /// so this only warns.
    fn check_memory_pressure(&self) {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return;
        }
        let used_fraction = system.used_memory() as f64 / total as f64;
        if used_fraction > MEMORY_PRESSURE_FRACTION {
            warn!(
                used_pct = (used_fraction * 100.0) as u32,
                "memory pressure high, proceeding with inference"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedModel {
        responses: VecDeque<Result<String>>,
        loads: Arc<AtomicBool>,
        fail_load: bool,
    }

    impl SpeechModel for ScriptedModel {
        fn load(&mut self) -> Result<()> {
            if self.fail_load {
                return Err(V2mError::ModelLoad("scripted load failure".into()));
            }
            self.loads.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn unload(&mut self) {
            self.loads.store(false, Ordering::SeqCst);
        }

        fn is_loaded(&self) -> bool {
            self.loads.load(Ordering::SeqCst)
        }

        fn transcribe(&mut self, _samples: &[f32], _options: &InferenceOptions) -> Result<String> {
            self.responses
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn worker_with(responses: Vec<Result<String>>, fail_load: bool) -> WhisperWorker {
        WhisperWorker::new(Box::new(ScriptedModel {
            responses: responses.into_iter().collect(),
            loads: Arc::new(AtomicBool::new(false)),
            fail_load,
        }))
    }

    #[tokio::test]
    async fn warmup_is_idempotent_and_sets_loaded() {
        let worker = worker_with(vec![], false);
        assert!(!worker.is_loaded());
        worker.warmup().await.unwrap();
        worker.warmup().await.unwrap();
        assert!(worker.is_loaded());
    }

    #[tokio::test]
    async fn transcribe_lazily_loads() {
        let worker = worker_with(vec![Ok("hola".into())], false);
        let text = worker
            .transcribe(vec![0.0; 1600], InferenceOptions::provisional(None, None))
            .await
            .unwrap();
        assert_eq!(text, "hola");
        assert!(worker.is_loaded());
    }

    #[tokio::test]
    async fn load_failure_propagates() {
        let worker = worker_with(vec![], true);
        let err = worker.warmup().await.unwrap_err();
        assert!(matches!(err, V2mError::ModelLoad(_)));
    }

    #[tokio::test]
    async fn inference_error_carries_timing() {
        let worker = worker_with(
            vec![Err(V2mError::Other(anyhow::anyhow!("decoder exploded")))],
            false,
        );
        let err = worker
            .transcribe(vec![0.0; 1600], InferenceOptions::provisional(None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, V2mError::Inference { .. }));
    }

    #[tokio::test]
    async fn unload_then_transcribe_reloads() {
        let worker = worker_with(vec![Ok("uno".into()), Ok("dos".into())], false);
        worker.warmup().await.unwrap();
        worker.unload().await.unwrap();
        assert!(!worker.is_loaded());

        let text = worker
            .transcribe(vec![0.0; 1600], InferenceOptions::provisional(None, None))
            .await
            .unwrap();
        assert_eq!(text, "uno");
        assert!(worker.is_loaded());
    }

    #[tokio::test]
    async fn concurrent_calls_are_serialised_fifo() {
        let worker = Arc::new(worker_with(
            (0..8).map(|i| Ok(format!("r{i}"))).collect(),
            false,
        ));
        worker.warmup().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let worker = Arc::clone(&worker);
            handles.push(tokio::spawn(async move {
                worker
                    .transcribe(vec![0.0; 160], InferenceOptions::provisional(None, None))
                    .await
                    .unwrap()
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        // Every scripted response consumed exactly once.
        results.sort();
        assert_eq!(results, (0..8).map(|i| format!("r{i}")).collect::<Vec<_>>());
    }
}
