//! Streaming transcription: producer/consumer over the capture ring.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ──wait_for_data/read_chunk──► producer task ──mpsc──► consumer task
//!                                                                       │
//!                                                              VadGate decision
//!                                                                       │
//!                                                  segment state machine + pre-roll
//!                                                                       │
//!                                                  WhisperWorker (provisional/final)
//!                                                                       │
//!                                                        EventSink::emit(...)
//! ```
//!
//! The producer only moves audio from the ring into the queue — O(1) per
//! chunk, never blocked by inference. The consumer runs VAD and Whisper at
//! its own pace; under a slow final pass the queue grows and audio is late,
//! not lost.
//!
//! ## Segmentation
//!
//! Within a session the consumer walks `Listening → InSpeech →
//! InTrailingSilence`: speech onset prepends the pre-roll so word starts are
//! not clipped; trailing silence keeps accumulating into the segment until
//! it has lasted `silence_commit_ms`, then the segment is committed — one
//! quality inference, hallucination filter, final event, flush. Silence
//! longer than `context_reset_ms` also clears the context prompt so a stale
//! topic cannot bleed into the next utterance.

pub mod context;
pub mod hallucination;

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioSource,
    buffering::chunk::{AudioChunk, TARGET_SAMPLE_RATE},
    error::{Result, V2mError},
    events::{EngineEvent, EventSink},
    inference::{InferenceOptions, WhisperWorker},
    vad::{energy::rms, VadGate},
};

use context::{ContextWindow, CONTEXT_WINDOW_CHARS};
use hallucination::HallucinationFilter;

/// Streaming parameters. Durations are milliseconds unless suffixed.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// Speech required before a segment may commit, in seconds.
    pub min_segment_duration: f64,
    /// Trailing silence that triggers a commit.
    pub silence_commit_ms: u64,
    /// Minimum spacing between provisional inference passes.
    pub provisional_interval_ms: u64,
    /// Whether provisional passes run at all.
    pub enable_provisional: bool,
    /// Chunks of lead-in audio prepended at speech onset.
    pub pre_roll_chunks: usize,
    /// Context prompt bound, in characters.
    pub context_window_chars: usize,
    /// Continuous silence after which the context prompt is cleared.
    pub context_reset_ms: u64,
    /// Heartbeat cadence while recording.
    pub heartbeat_interval_ms: u64,
    /// Language hint handed to the model (`None` = autodetect).
    pub language: Option<String>,
    /// Beam width for final passes.
    pub beam_size: u32,
    /// Sampling temperature for final passes.
    pub temperature: f32,
    /// How long `stop()` waits for the producer to drain.
    pub producer_drain_timeout_ms: u64,
    /// How long `stop()` waits for the consumer's last inference.
    pub consumer_finish_timeout_ms: u64,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            min_segment_duration: 0.3,
            silence_commit_ms: 1000,
            provisional_interval_ms: 500,
            enable_provisional: true,
            pre_roll_chunks: 3,
            context_window_chars: CONTEXT_WINDOW_CHARS,
            context_reset_ms: 3000,
            heartbeat_interval_ms: 2000,
            language: None,
            beam_size: 2,
            temperature: 0.0,
            producer_drain_timeout_ms: 2000,
            consumer_finish_timeout_ms: 10_000,
        }
    }
}

/// A speech region being accumulated: ordered chunks plus leading pre-roll.
struct Segment {
    chunks: Vec<AudioChunk>,
    samples: usize,
}

impl Segment {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            samples: 0,
        }
    }

    fn push(&mut self, chunk: AudioChunk) {
        self.samples += chunk.samples.len();
        self.chunks.push(chunk);
    }

    fn duration_secs(&self) -> f64 {
        self.samples as f64 / TARGET_SAMPLE_RATE as f64
    }

    /// Session-relative capture time of the segment's first chunk.
    fn started_at(&self) -> Option<Duration> {
        self.chunks.first().map(|c| c.timestamp)
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn concat(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.samples);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.samples);
        }
        out
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.samples = 0;
    }
}

struct ActiveStream {
    stop: Arc<AtomicBool>,
    finals: Arc<Mutex<Vec<String>>>,
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

/// Live dictation loop over an [`AudioSource`].
pub struct StreamingTranscriber {
    audio: Arc<dyn AudioSource>,
    worker: Arc<WhisperWorker>,
    sink: Arc<dyn EventSink>,
    vad: Arc<Mutex<VadGate>>,
    config: TranscriberConfig,
    session: Mutex<Option<ActiveStream>>,
}

impl StreamingTranscriber {
    pub fn new(
        audio: Arc<dyn AudioSource>,
        worker: Arc<WhisperWorker>,
        vad: VadGate,
        sink: Arc<dyn EventSink>,
        config: TranscriberConfig,
    ) -> Self {
        Self {
            audio,
            worker,
            sink,
            vad: Arc::new(Mutex::new(vad)),
            config,
            session: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Begin capturing and spawn the producer/consumer pair.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            warn!("streaming already active");
            return Ok(());
        }

        self.audio.start()?;
        self.vad.lock().reset();

        let (tx, rx) = mpsc::unbounded_channel::<AudioChunk>();
        let stop = Arc::new(AtomicBool::new(false));
        let finals = Arc::new(Mutex::new(Vec::new()));

        let producer = tokio::spawn(producer_loop(
            Arc::clone(&self.audio),
            tx,
            Arc::clone(&stop),
        ));

        let consumer = tokio::spawn(consumer_loop(ConsumerContext {
            rx,
            vad: Arc::clone(&self.vad),
            worker: Arc::clone(&self.worker),
            sink: Arc::clone(&self.sink),
            config: self.config.clone(),
            finals: Arc::clone(&finals),
        }));

        *session = Some(ActiveStream {
            stop,
            finals,
            producer,
            consumer,
        });
        info!("streaming started");
        Ok(())
    }

    /// Stop capture, drain both tasks, and return the whitespace-joined
    /// final transcripts of the session.
    pub async fn stop(&self) -> Result<String> {
        let active = self.session.lock().take();
        let Some(active) = active else {
            return Ok(String::new());
        };
        info!("stopping streaming");

        // Release the device first so the producer's wait unblocks and the
        // last buffered samples drain through.
        if let Err(e) = self.audio.stop() {
            if !matches!(e, V2mError::NotRecording) {
                warn!("audio stop failed: {e}");
            }
        }
        active.stop.store(true, Ordering::SeqCst);

        let mut producer = active.producer;
        if tokio::time::timeout(
            Duration::from_millis(self.config.producer_drain_timeout_ms),
            &mut producer,
        )
        .await
        .is_err()
        {
            warn!("producer drain timed out, cancelling");
            producer.abort();
        }

        let mut consumer = active.consumer;
        if tokio::time::timeout(
            Duration::from_millis(self.config.consumer_finish_timeout_ms),
            &mut consumer,
        )
        .await
        .is_err()
        {
            warn!("consumer did not finish in time, cancelling");
            consumer.abort();
        }

        let text = active.finals.lock().join(" ");
        info!(chars = text.len(), "streaming stopped");
        Ok(text)
    }

    /// Non-streaming path: one whole take from the fallback recorder.
    /// Batch-trims silence, then runs a single final inference.
    pub async fn transcribe_bulk(&self, samples: Vec<f32>) -> Result<String> {
        let trimmed = self.vad.lock().trim_silence(&samples);
        let duration = trimmed.len() as f64 / TARGET_SAMPLE_RATE as f64;
        if duration < self.config.min_segment_duration {
            debug!(duration, "bulk take below minimum speech duration");
            return Ok(String::new());
        }

        let options = InferenceOptions::final_pass(
            self.config.language.clone(),
            self.config.beam_size,
            self.config.temperature,
            None,
        );
        let text = self.worker.transcribe(trimmed, options).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Ok(String::new());
        }
        if HallucinationFilter::new().is_hallucination(&text) {
            return Ok(String::new());
        }
        self.sink.emit(EngineEvent::final_text(text.clone()));
        Ok(text)
    }
}

/// Producer: move audio from the ring into the queue. Never blocks on
/// inference; O(1) per chunk.
async fn producer_loop(
    audio: Arc<dyn AudioSource>,
    tx: mpsc::UnboundedSender<AudioChunk>,
    stop: Arc<AtomicBool>,
) {
    let started = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        audio.wait_for_data().await;
        let samples = audio.read_chunk();
        if samples.is_empty() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            // Spurious wake or capture hiccup: brief back-off, then retry.
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }
        if tx
            .send(AudioChunk::new(started.elapsed(), samples))
            .is_err()
        {
            break;
        }
    }

    // One last drain after stop so no buffered audio is stranded.
    let tail = audio.read_chunk();
    if !tail.is_empty() {
        let _ = tx.send(AudioChunk::new(started.elapsed(), tail));
    }
    debug!("producer finished");
}

struct ConsumerContext {
    rx: mpsc::UnboundedReceiver<AudioChunk>,
    vad: Arc<Mutex<VadGate>>,
    worker: Arc<WhisperWorker>,
    sink: Arc<dyn EventSink>,
    config: TranscriberConfig,
    finals: Arc<Mutex<Vec<String>>>,
}

/// Consumer: VAD, segmentation, inference, events. Runs until the producer
/// hangs up and the queue is drained.
async fn consumer_loop(mut ctx: ConsumerContext) {
    let heartbeat_interval = Duration::from_millis(ctx.config.heartbeat_interval_ms);
    let provisional_interval = Duration::from_millis(ctx.config.provisional_interval_ms);

    let filter = HallucinationFilter::new();
    let mut context = ContextWindow::new(ctx.config.context_window_chars);
    let mut pre_roll: VecDeque<AudioChunk> = VecDeque::with_capacity(ctx.config.pre_roll_chunks);
    let mut segment = Segment::new();
    let mut provisional_text = String::new();
    // Trailing silence inside the active segment, for commit timing.
    let mut silence_start: Option<Instant> = None;
    // Continuous silence regardless of segment state, for context reset.
    let mut quiet_since: Option<Instant> = None;
    let mut last_provisional = Instant::now();
    let mut last_heartbeat = Instant::now();

    loop {
        let chunk = match tokio::time::timeout(Duration::from_millis(100), ctx.rx.recv()).await {
            Ok(Some(chunk)) => chunk,
            // Producer hung up and the queue is drained.
            Ok(None) => break,
            Err(_) => {
                maybe_heartbeat(&mut last_heartbeat, heartbeat_interval, ctx.sink.as_ref());
                continue;
            }
        };
        if chunk.is_empty() {
            continue;
        }

        let now = Instant::now();
        maybe_heartbeat(&mut last_heartbeat, heartbeat_interval, ctx.sink.as_ref());

        // Pre-roll always tracks the most recent chunks, speech or not.
        pre_roll.push_back(chunk.clone());
        while pre_roll.len() > ctx.config.pre_roll_chunks {
            pre_roll.pop_front();
        }

        let is_speech = ctx.vad.lock().detect(&chunk.samples);
        if is_speech {
            quiet_since = None;
        } else if quiet_since.is_none() {
            quiet_since = Some(now);
        }

        // Long silence: clear the prompt so a stale topic cannot steer the
        // next utterance.
        if let Some(since) = quiet_since {
            let silence_ms = now.duration_since(since).as_millis() as u64;
            if silence_ms > ctx.config.context_reset_ms && !context.is_empty() {
                debug!(silence_ms, "context window reset after long silence");
                context.clear();
            }
        }

        if is_speech && segment.is_empty() {
            // Speech onset: the pre-roll (which includes this chunk) seeds
            // the segment so word beginnings survive.
            for pre in pre_roll.iter().cloned() {
                segment.push(pre);
            }
            silence_start = None;
        } else if is_speech {
            segment.push(chunk);
            silence_start = None;
        } else if !segment.is_empty() {
            // Trailing silence stays part of the segment until commit.
            segment.push(chunk);
            if silence_start.is_none() {
                silence_start = Some(now);
            }
        }

        // Provisional pass during active speech.
        if is_speech
            && ctx.config.enable_provisional
            && segment.duration_secs() > ctx.config.min_segment_duration
            && now.duration_since(last_provisional) > provisional_interval
        {
            last_provisional = now;
            let options = InferenceOptions::provisional(
                ctx.config.language.clone(),
                context.prompt().map(str::to_owned),
            );
            match ctx.worker.transcribe(segment.concat(), options).await {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if !text.is_empty() && text != provisional_text {
                        provisional_text = text.clone();
                        ctx.sink.emit(EngineEvent::provisional(text));
                    }
                }
                Err(e) => debug!("provisional inference error: {e}"),
            }
        }

        // Commit once the silence has lasted long enough.
        if let Some(since) = silence_start {
            let silence_ms = now.duration_since(since).as_millis() as u64;
            if !segment.is_empty()
                && segment.duration_secs() > ctx.config.min_segment_duration
                && silence_ms > ctx.config.silence_commit_ms
            {
                debug!(
                    duration = segment.duration_secs(),
                    started_at = ?segment.started_at(),
                    silence_ms,
                    "committing segment"
                );
                commit_segment(&ctx, &filter, &mut context, &segment).await;
                segment.clear();
                provisional_text.clear();
                silence_start = None;
                ctx.vad.lock().reset();
            }
        }
    }

    // Stop protocol: a segment still pending after drain gets one last
    // final inference.
    if !segment.is_empty() && segment.duration_secs() > ctx.config.min_segment_duration {
        debug!(
            duration = segment.duration_secs(),
            "final commit on stop"
        );
        commit_segment(&ctx, &filter, &mut context, &segment).await;
    }
    debug!("consumer finished");
}

/// Run the quality pass for a committed segment; on success record and emit
/// the final text. Inference failures keep the session alive and emit
/// nothing for this segment.
async fn commit_segment(
    ctx: &ConsumerContext,
    filter: &HallucinationFilter,
    context: &mut ContextWindow,
    segment: &Segment,
) {
    let samples = segment.concat();
    let audio_rms = rms(&samples);
    let duration = segment.duration_secs();

    let options = InferenceOptions::final_pass(
        ctx.config.language.clone(),
        ctx.config.beam_size,
        ctx.config.temperature,
        context.prompt().map(str::to_owned),
    );

    let text = match ctx.worker.transcribe(samples, options).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            error!("final inference error: {e}");
            return;
        }
    };

    if text.is_empty() {
        warn!(
            duration,
            rms = audio_rms,
            "final inference returned empty text"
        );
        return;
    }
    if filter.is_hallucination(&text) {
        return;
    }

    ctx.finals.lock().push(text.clone());
    context.push(&text);
    ctx.sink.emit(EngineEvent::final_text(text));
}

fn maybe_heartbeat(last: &mut Instant, interval: Duration, sink: &dyn EventSink) {
    if last.elapsed() >= interval {
        sink.emit(EngineEvent::heartbeat("recording"));
        *last = Instant::now();
    }
}
