//! Cooperative buffered recorder — the non-streaming capture path.
//!
//! Used when the ring-buffered engine cannot initialise (exotic drivers,
//! permission sandboxes). The callback appends into one contiguous
//! mutex-guarded buffer; that lock disqualifies it from real-time use, which
//! is exactly why it only supports bulk recording: start, speak, stop,
//! transcribe the whole take once.

use std::sync::{mpsc, Arc};

use parking_lot::Mutex;
use tracing::info;

use crate::{
    buffering::chunk::TARGET_SAMPLE_RATE,
    error::{Result, V2mError},
};

use super::resample::RateConverter;

/// Bulk recorder into a pre-allocated contiguous buffer.
pub struct BufferedRecorder {
    samples: Arc<Mutex<Vec<f32>>>,
    state: Mutex<Option<FallbackSession>>,
    preferred_device: Option<String>,
}

struct FallbackSession {
    stop_tx: mpsc::Sender<()>,
    device_rate: u32,
}

impl BufferedRecorder {
    /// Initial buffer reservation: one minute of device audio at 48 kHz.
    const RESERVE_SAMPLES: usize = 48_000 * 60;

    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(None),
            preferred_device,
        }
    }

    /// Acquire the device and start appending samples.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(V2mError::AlreadyRecording);
        }

        {
            let mut samples = self.samples.lock();
            samples.clear();
            samples.reserve(Self::RESERVE_SAMPLES);
        }

        let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sink = Arc::clone(&self.samples);
        let preferred = self.preferred_device.clone();

        std::thread::Builder::new()
            .name("v2m-capture-fallback".into())
            .spawn(move || match open_buffered_stream(preferred.as_deref(), sink) {
                Ok((stream, device_rate)) => {
                    let _ = open_tx.send(Ok(device_rate));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                }
            })
            .map_err(|e| V2mError::DeviceUnavailable(e.to_string()))?;

        let device_rate = open_rx
            .recv()
            .map_err(|_| V2mError::DeviceUnavailable("fallback capture thread died".into()))??;

        info!(device_rate, "buffered fallback recorder started");
        *state = Some(FallbackSession {
            stop_tx,
            device_rate,
        });
        Ok(())
    }

    /// Stop and return the whole take as 16 kHz mono.
    pub fn stop(&self) -> Result<Vec<f32>> {
        let session = self
            .state
            .lock()
            .take()
            .ok_or(V2mError::NotRecording)?;
        let _ = session.stop_tx.send(());

        let raw = std::mem::take(&mut *self.samples.lock());
        if session.device_rate == TARGET_SAMPLE_RATE {
            return Ok(raw);
        }

        let mut converter = RateConverter::new(session.device_rate, TARGET_SAMPLE_RATE)?;
        let mut out = converter.process(&raw);
        out.extend(converter.finish());
        info!(
            raw_samples = raw.len(),
            resampled = out.len(),
            "fallback take resampled"
        );
        Ok(out)
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().is_some()
    }
}

#[cfg(feature = "audio-cpal")]
fn open_buffered_stream(
    preferred: Option<&str>,
    sink: Arc<Mutex<Vec<f32>>>,
) -> Result<(cpal::Stream, u32)> {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::{Sample, SampleFormat};

    let (name, device) = super::device::select_input_device(preferred)?;
    let supported = device
        .default_input_config()
        .map_err(|e| V2mError::DeviceUnavailable(e.to_string()))?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    info!(device = name.as_str(), device_rate, "opening fallback input device");

    let config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    macro_rules! stream_for {
        ($ty:ty) => {{
            let sink = Arc::clone(&sink);
            device
                .build_input_stream(
                    &config,
                    move |data: &[$ty], _: &cpal::InputCallbackInfo| {
                        let mut sink = sink.lock();
                        for frame in data.chunks(channels) {
                            let sum: f32 =
                                frame.iter().map(|&s| f32::from_sample(s)).sum();
                            sink.push(sum / channels as f32);
                        }
                    },
                    |err| tracing::error!("fallback stream error: {err}"),
                    None,
                )
                .map_err(|e| V2mError::AudioStream(e.to_string()))?
        }};
    }

    let stream = match supported.sample_format() {
        SampleFormat::F32 => stream_for!(f32),
        SampleFormat::I16 => stream_for!(i16),
        SampleFormat::U16 => stream_for!(u16),
        fmt => {
            return Err(V2mError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    };

    stream
        .play()
        .map_err(|e| V2mError::AudioStream(e.to_string()))?;
    Ok((stream, device_rate))
}

#[cfg(not(feature = "audio-cpal"))]
fn open_buffered_stream(
    _preferred: Option<&str>,
    _sink: Arc<Mutex<Vec<f32>>>,
) -> Result<((), u32)> {
    Err(V2mError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}
