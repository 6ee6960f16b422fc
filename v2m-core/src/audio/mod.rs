//! Microphone capture feeding the lock-free ring buffer.
//!
//! # Real-time constraints
//!
//! The cpal input callback runs on an OS audio thread. It must not allocate,
//! lock, or perform I/O. The callback here does exactly three things: downmix
//! into a reused scratch buffer, `push_slice` into the SPSC ring, and fire a
//! `tokio::sync::Notify` permit. Samples that do not fit (reader stalled for
//! the whole ring depth) are dropped and counted — an overrun is telemetry,
//! not a session failure.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send`, so the stream lives on a dedicated capture
//! thread that parks on a channel until `stop()`. Everything the async side
//! touches (consumer half, notify, overrun counter) is `Send`.

pub mod device;
pub mod fallback;
pub mod resample;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc, Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::{
    buffering::{
        chunk::TARGET_SAMPLE_RATE, create_audio_ring, AudioConsumer, Consumer, Observer,
        DEFAULT_MAX_DURATION_SECS,
    },
    error::{Result, V2mError},
};

use resample::RateConverter;

/// Streaming audio input as the transcriber sees it.
///
/// `AudioCapture` is the production implementation; tests script their own.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Acquire the device and begin capturing.
    fn start(&self) -> Result<()>;

    /// Suspend until at least one new sample arrived since the last read,
    /// or until the capture stopped.
    async fn wait_for_data(&self);

    /// Drain everything currently buffered as 16 kHz mono f32. Non-blocking;
    /// may be empty. One final drain is allowed after `stop()`.
    fn read_chunk(&self) -> Vec<f32>;

    /// Release the device. Idempotent after the first call in a session.
    fn stop(&self) -> Result<()>;

    /// Samples dropped because the ring was full.
    fn overrun_count(&self) -> u64;
}

/// Capture tuning knobs.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device name to prefer; `None` selects per [`device::select_input_device`].
    pub preferred_device: Option<String>,
    /// Ring depth in seconds of device-rate audio.
    pub max_duration_secs: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preferred_device: None,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
        }
    }
}

struct ActiveSession {
    consumer: AudioConsumer,
    converter: RateConverter,
    stop_tx: mpsc::Sender<()>,
    recording: bool,
    /// Whether the post-stop resampler flush already happened.
    flushed: bool,
}

/// Ring-buffered microphone capture.
pub struct AudioCapture {
    config: CaptureConfig,
    notify: Arc<Notify>,
    overruns: Arc<AtomicU64>,
    session: Mutex<Option<ActiveSession>>,
}

impl AudioCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            notify: Arc::new(Notify::new()),
            overruns: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.recording)
            .unwrap_or(false)
    }
}

#[async_trait]
impl AudioSource for AudioCapture {
    fn start(&self) -> Result<()> {
        let mut guard = self.session.lock();
        if guard.as_ref().map(|s| s.recording).unwrap_or(false) {
            return Err(V2mError::AlreadyRecording);
        }

        self.overruns.store(0, Ordering::Relaxed);

        let (open_tx, open_rx) = mpsc::channel::<Result<(AudioConsumer, u32)>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let preferred = self.config.preferred_device.clone();
        let max_duration_secs = self.config.max_duration_secs;
        let overruns = Arc::clone(&self.overruns);
        let notify = Arc::clone(&self.notify);

        // The cpal stream is !Send: open it, keep it, and drop it on this
        // thread. The thread parks on stop_rx until stop() or drop.
        std::thread::Builder::new()
            .name("v2m-capture".into())
            .spawn(move || match open_stream(
                preferred.as_deref(),
                max_duration_secs,
                overruns,
                notify,
            ) {
                Ok((stream, consumer, device_rate)) => {
                    let _ = open_tx.send(Ok((consumer, device_rate)));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                }
            })
            .map_err(|e| V2mError::DeviceUnavailable(e.to_string()))?;

        let (consumer, device_rate) = open_rx
            .recv()
            .map_err(|_| V2mError::DeviceUnavailable("capture thread died during open".into()))??;

        let converter = RateConverter::new(device_rate, TARGET_SAMPLE_RATE)?;
        info!(device_rate, "capture started");

        *guard = Some(ActiveSession {
            consumer,
            converter,
            stop_tx,
            recording: true,
            flushed: false,
        });
        Ok(())
    }

    async fn wait_for_data(&self) {
        loop {
            let notified = self.notify.notified();
            {
                let guard = self.session.lock();
                match guard.as_ref() {
                    Some(s) if s.consumer.occupied_len() > 0 => return,
                    Some(s) if !s.recording => return,
                    Some(_) => {}
                    None => return,
                }
            }
            notified.await;
        }
    }

    fn read_chunk(&self) -> Vec<f32> {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return Vec::new();
        };

        let mut raw: Vec<f32> = Vec::new();
        let mut scratch = [0f32; 4096];
        loop {
            let n = session.consumer.pop_slice(&mut scratch);
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&scratch[..n]);
        }

        let mut out = session.converter.process(&raw);
        if !session.recording && !session.flushed {
            out.extend(session.converter.finish());
            session.flushed = true;
        }
        out
    }

    fn stop(&self) -> Result<()> {
        let mut guard = self.session.lock();
        match guard.as_mut() {
            Some(session) => {
                if session.recording {
                    session.recording = false;
                    let _ = session.stop_tx.send(());
                    // Wake a parked wait_for_data so the producer can exit.
                    self.notify.notify_one();
                    let dropped = self.overruns.load(Ordering::Relaxed);
                    if dropped > 0 {
                        info!(dropped, "capture stopped with ring overruns");
                    } else {
                        info!("capture stopped");
                    }
                }
                Ok(())
            }
            None => Err(V2mError::NotRecording),
        }
    }

    fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Open the device, build the ring sized for its native rate, and start the
/// stream. Runs on the capture thread.
#[cfg(feature = "audio-cpal")]
fn open_stream(
    preferred: Option<&str>,
    max_duration_secs: u32,
    overruns: Arc<AtomicU64>,
    notify: Arc<Notify>,
) -> Result<(cpal::Stream, AudioConsumer, u32)> {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::SampleFormat;

    let (name, dev) = device::select_input_device(preferred)?;
    let supported = dev
        .default_input_config()
        .map_err(|e| V2mError::DeviceUnavailable(e.to_string()))?;

    let device_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(device = name.as_str(), device_rate, channels, "opening input device");

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (producer, consumer) = create_audio_ring(device_rate, max_duration_secs);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&dev, &config, producer, overruns, notify)?,
        SampleFormat::I16 => build_stream::<i16>(&dev, &config, producer, overruns, notify)?,
        SampleFormat::U16 => build_stream::<u16>(&dev, &config, producer, overruns, notify)?,
        fmt => {
            return Err(V2mError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    };

    stream
        .play()
        .map_err(|e| V2mError::AudioStream(e.to_string()))?;

    Ok((stream, consumer, device_rate))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
struct NoStream;

#[cfg(not(feature = "audio-cpal"))]
fn open_stream(
    _preferred: Option<&str>,
    _max_duration_secs: u32,
    _overruns: Arc<AtomicU64>,
    _notify: Arc<Notify>,
) -> Result<(NoStream, AudioConsumer, u32)> {
    Err(V2mError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}

/// One typed stream builder for all sample formats: convert to f32, downmix
/// to mono into a reused buffer, push, notify.
#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: crate::buffering::AudioProducer,
    overruns: Arc<AtomicU64>,
    notify: Arc<Notify>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    use crate::buffering::Producer;
    use cpal::traits::DeviceTrait;
    use cpal::Sample;

    let channels = config.channels as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let frames = data.len() / channels;
                // resize only grows on the first callbacks, then is a no-op
                mix_buf.resize(frames, 0.0);
                if channels == 1 {
                    for (dst, src) in mix_buf.iter_mut().zip(data.iter()) {
                        *dst = f32::from_sample(*src);
                    }
                } else {
                    for f in 0..frames {
                        let mut sum = 0f32;
                        let base = f * channels;
                        for c in 0..channels {
                            sum += f32::from_sample(data[base + c]);
                        }
                        mix_buf[f] = sum / channels as f32;
                    }
                }
                let written = producer.push_slice(&mix_buf[..frames]);
                if written < frames {
                    overruns.fetch_add((frames - written) as u64, Ordering::Relaxed);
                }
                notify.notify_one();
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| {
            warn!("failed to build input stream: {e}");
            V2mError::AudioStream(e.to_string())
        })
}
