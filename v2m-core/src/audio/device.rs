//! Input device selection heuristics.
//!
//! Desktop audio stacks expose loopback-style endpoints ("Monitor of …",
//! "Stereo Mix") next to real microphones. Picking one of those records the
//! user's speakers instead of their voice, so selection prefers the
//! configured device, then the system default, then the best-scoring
//! non-loopback input.

#[cfg(feature = "audio-cpal")]
use cpal::traits::{DeviceTrait, HostTrait};
use tracing::warn;

use crate::error::{Result, V2mError};

const LOOPBACK_KEYWORDS: &[&str] = &[
    "monitor of",
    "loopback",
    "stereo mix",
    "what u hear",
    "what you hear",
    "virtual output",
    "speakers (",
    "headphones (",
];

const MIC_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "line in",
    "input",
    "usb",
    "webcam",
];

/// Heuristic for endpoints that capture system output rather than a mic.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score a device name for likely speech-microphone intent. Higher is better.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = 0;
    if is_loopback_like_name(&lowered) {
        score -= 16;
    } else {
        score += 8;
    }
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if lowered.contains("default") {
        score += 1;
    }
    score
}

/// Pick an input device: preferred name first, then the system default,
/// then the best-scoring non-loopback input.
///
/// # Errors
/// `V2mError::NoDefaultInputDevice` when the host reports no inputs,
/// `V2mError::DeviceUnavailable` when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn select_input_device(preferred: Option<&str>) -> Result<(String, cpal::Device)> {
    let host = cpal::default_host();
    let mut devices: Vec<(String, cpal::Device)> = host
        .input_devices()
        .map_err(|e| V2mError::DeviceUnavailable(e.to_string()))?
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            (name, device)
        })
        .collect();
    if devices.is_empty() {
        return Err(V2mError::NoDefaultInputDevice);
    }

    if let Some(preferred) = preferred {
        if let Some(idx) = devices.iter().position(|(name, _)| name == preferred) {
            return Ok(devices.swap_remove(idx));
        }
        warn!(preferred, "preferred input device not found, falling back");
    }

    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    if let Some(default_name) = default_name {
        if let Some(idx) = devices
            .iter()
            .position(|(name, _)| name == &default_name && !is_loopback_like_name(name))
        {
            return Ok(devices.swap_remove(idx));
        }
    }

    let best = devices
        .iter()
        .enumerate()
        .max_by_key(|(_, (name, _))| mic_preference_score(name))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    warn!(
        device = devices[best].0.as_str(),
        "no usable default input, selecting best-scoring microphone"
    );
    Ok(devices.swap_remove(best))
}
