//! Persistent daemon configuration (JSON file, env overrides, normalize).
//!
//! Lives at `~/.config/v2m/config.json`. Every field has a default so an
//! absent or partial file still yields a working daemon. `V2M_*` environment
//! variables are layered on top of the file at load time, and `normalize()`
//! clamps whatever any source wrote into sane ranges. `UPDATE_CONFIG` merges
//! a JSON patch into the current values and persists.
//!
//! ## Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `V2M_AUDIO_DEVICE` | `audio.preferred_device` |
//! | `V2M_MAX_DURATION_SECS` | `audio.max_duration_secs` |
//! | `V2M_SAVE_LAST_RECORDING` | `audio.save_last_recording` |
//! | `V2M_WHISPER_MODEL_PATH` | `whisper.model_path` |
//! | `V2M_LANGUAGE` | `whisper.language` |
//! | `V2M_WHISPER_DEVICE` | `whisper.device` |
//! | `V2M_BEAM_SIZE` | `whisper.beam_size` |
//! | `V2M_TEMPERATURE` | `whisper.temperature` |
//! | `V2M_VAD_THRESHOLD` | `vad.threshold` |
//! | `V2M_SILENCE_COMMIT_MS` | `vad.silence_commit_ms` |
//! | `V2M_SILERO_MODEL_PATH` | `vad.model_path` |
//! | `V2M_OLLAMA_URL` | `llm.ollama_url` |
//! | `V2M_OLLAMA_MODEL` | `llm.model` |
//! | `V2M_LLM_TIMEOUT_SECS` | `llm.request_timeout_secs` |
//! | `V2M_NOTIFICATIONS` | `notifications.enabled` |
//! | `V2M_NOTIFICATION_EXPIRE_MS` | `notifications.expire_ms` |
//!
//! Unparseable values are ignored; booleans accept `1/true/yes/on`.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub audio: AudioConfig,
    pub whisper: WhisperConfig,
    pub vad: VadConfig,
    pub llm: LlmConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device to prefer; `null` selects automatically.
    pub preferred_device: Option<String>,
    /// Ring depth in seconds of device-rate audio.
    pub max_duration_secs: u32,
    /// Keep a WAV of the last bulk-mode take in the runtime dir.
    pub save_last_recording: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_device: None,
            max_duration_secs: 600,
            save_last_recording: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WhisperConfig {
    /// Path to a ggml model file. Empty selects the echo stub backend.
    pub model_path: String,
    /// ISO 639-1 code, or "auto".
    pub language: String,
    /// "gpu" or "cpu".
    pub device: String,
    pub beam_size: u32,
    pub temperature: f32,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            language: "es".into(),
            device: "gpu".into(),
            beam_size: 2,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    /// Silero speech-probability threshold.
    pub threshold: f32,
    /// Trailing silence before a segment commits.
    pub silence_commit_ms: u64,
    /// Override path for the Silero ONNX model.
    pub model_path: Option<String>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            // 1000 ms keeps natural Spanish pauses inside one segment.
            silence_commit_ms: 1000,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub ollama_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://127.0.0.1:11434".into(),
            model: "qwen2.5:3b-instruct".into(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    pub enabled: bool,
    /// Auto-dismiss timeout.
    pub expire_ms: u32,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            expire_ms: 3000,
        }
    }
}

impl DaemonConfig {
    pub fn default_path() -> PathBuf {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("v2m")
            .join("config.json")
    }

    /// Load from `path`, falling back to defaults on absence or parse
    /// failure, then layer `V2M_*` environment overrides. Always normalized.
    pub fn load(path: &Path) -> Self {
        let mut config = fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Self>(&raw).ok())
            .unwrap_or_default();
        config.apply_env_overrides();
        config.normalize();
        config
    }

    /// Layer `V2M_*` variables from the process environment over the
    /// current values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override pass with an injectable lookup so tests don't have to
    /// mutate the process-global environment.
    fn apply_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = env_string(&env, "V2M_AUDIO_DEVICE") {
            self.audio.preferred_device = Some(device);
        }
        if let Some(secs) = env_parsed(&env, "V2M_MAX_DURATION_SECS") {
            self.audio.max_duration_secs = secs;
        }
        if let Some(save) = env_flag(&env, "V2M_SAVE_LAST_RECORDING") {
            self.audio.save_last_recording = save;
        }

        if let Some(path) = env_string(&env, "V2M_WHISPER_MODEL_PATH") {
            self.whisper.model_path = path;
        }
        if let Some(language) = env_string(&env, "V2M_LANGUAGE") {
            self.whisper.language = language;
        }
        if let Some(device) = env_string(&env, "V2M_WHISPER_DEVICE") {
            self.whisper.device = device;
        }
        if let Some(beam) = env_parsed(&env, "V2M_BEAM_SIZE") {
            self.whisper.beam_size = beam;
        }
        if let Some(temperature) = env_parsed(&env, "V2M_TEMPERATURE") {
            self.whisper.temperature = temperature;
        }

        if let Some(threshold) = env_parsed(&env, "V2M_VAD_THRESHOLD") {
            self.vad.threshold = threshold;
        }
        if let Some(commit_ms) = env_parsed(&env, "V2M_SILENCE_COMMIT_MS") {
            self.vad.silence_commit_ms = commit_ms;
        }
        if let Some(path) = env_string(&env, "V2M_SILERO_MODEL_PATH") {
            self.vad.model_path = Some(path);
        }

        if let Some(url) = env_string(&env, "V2M_OLLAMA_URL") {
            self.llm.ollama_url = url;
        }
        if let Some(model) = env_string(&env, "V2M_OLLAMA_MODEL") {
            self.llm.model = model;
        }
        if let Some(timeout) = env_parsed(&env, "V2M_LLM_TIMEOUT_SECS") {
            self.llm.request_timeout_secs = timeout;
        }

        if let Some(enabled) = env_flag(&env, "V2M_NOTIFICATIONS") {
            self.notifications.enabled = enabled;
        }
        if let Some(expire) = env_parsed(&env, "V2M_NOTIFICATION_EXPIRE_MS") {
            self.notifications.expire_ms = expire;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn normalize(&mut self) {
        self.audio.max_duration_secs = self.audio.max_duration_secs.clamp(10, 3600);
        self.audio.preferred_device = self
            .audio
            .preferred_device
            .take()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        self.whisper.language = {
            let lang = self.whisper.language.trim().to_ascii_lowercase();
            if lang.is_empty() { "auto".into() } else { lang }
        };
        self.whisper.device = match self.whisper.device.trim().to_ascii_lowercase().as_str() {
            "cpu" => "cpu".into(),
            _ => "gpu".into(),
        };
        self.whisper.beam_size = self.whisper.beam_size.clamp(1, 10);
        self.whisper.temperature = self.whisper.temperature.clamp(0.0, 1.0);

        self.vad.threshold = self.vad.threshold.clamp(0.05, 0.95);
        self.vad.silence_commit_ms = self.vad.silence_commit_ms.clamp(200, 10_000);

        self.llm.request_timeout_secs = self.llm.request_timeout_secs.clamp(1, 300);
        self.notifications.expire_ms = self.notifications.expire_ms.clamp(500, 30_000);
    }

    /// Language option handed to the model (`None` for autodetect).
    pub fn language_hint(&self) -> Option<String> {
        if self.whisper.language == "auto" {
            None
        } else {
            Some(self.whisper.language.clone())
        }
    }

    /// Apply a JSON patch (`UPDATE_CONFIG` payload), renormalize, and
    /// return the merged config. Unknown keys are rejected by serde.
    pub fn merged_with(&self, updates: &Value) -> Result<Self> {
        let mut tree = serde_json::to_value(self)?;
        merge_json(&mut tree, updates);
        let mut merged: Self =
            serde_json::from_value(tree).context("config update has invalid shape")?;
        merged.normalize();
        Ok(merged)
    }
}

fn env_string<F>(env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parsed<T, F>(env: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(name).and_then(|v| v.trim().parse().ok())
}

fn env_flag<F>(env: &F, name: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    env_string(env, name).map(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_json(base_value, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base_slot, patch_value) => *base_slot = patch_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_normalized() {
        let mut config = DaemonConfig::default();
        config.normalize();
        assert_eq!(config.vad.silence_commit_ms, 1000);
        assert_eq!(config.whisper.language, "es");
        assert_eq!(config.whisper.device, "gpu");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let config = DaemonConfig::load(Path::new("/nonexistent/v2m/config.json"));
        assert_eq!(config, {
            let mut c = DaemonConfig::default();
            c.normalize();
            c
        });
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = DaemonConfig::default();
        config.whisper.language = "en".into();
        config.vad.silence_commit_ms = 500;
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path);
        assert_eq!(loaded.whisper.language, "en");
        assert_eq!(loaded.vad.silence_commit_ms, 500);
    }

    #[test]
    fn update_merges_nested_keys_and_clamps() {
        let config = DaemonConfig::default();
        let merged = config
            .merged_with(&serde_json::json!({
                "vad": {"silence_commit_ms": 50},
                "whisper": {"device": "CPU"}
            }))
            .unwrap();
        // clamped up to the floor
        assert_eq!(merged.vad.silence_commit_ms, 200);
        assert_eq!(merged.whisper.device, "cpu");
        // untouched sections survive
        assert_eq!(merged.llm.ollama_url, config.llm.ollama_url);
    }

    #[test]
    fn partial_file_fills_missing_sections_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"whisper": {"language": "en"}}"#).unwrap();

        let config = DaemonConfig::load(&path);
        assert_eq!(config.whisper.language, "en");
        assert_eq!(config.notifications.expire_ms, 3000);
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + '_ {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn env_overrides_layer_over_file_values() {
        // File says "en"; the environment wins.
        let mut config = DaemonConfig::default();
        config.whisper.language = "en".into();

        config.apply_overrides(lookup(&[
            ("V2M_LANGUAGE", "de"),
            ("V2M_SILENCE_COMMIT_MS", "500"),
            ("V2M_OLLAMA_URL", "http://127.0.0.1:9999"),
            ("V2M_AUDIO_DEVICE", "USB PnP Microphone"),
            ("V2M_WHISPER_MODEL_PATH", "/models/ggml-small.bin"),
        ]));
        config.normalize();

        assert_eq!(config.whisper.language, "de");
        assert_eq!(config.vad.silence_commit_ms, 500);
        assert_eq!(config.llm.ollama_url, "http://127.0.0.1:9999");
        assert_eq!(
            config.audio.preferred_device.as_deref(),
            Some("USB PnP Microphone")
        );
        assert_eq!(config.whisper.model_path, "/models/ggml-small.bin");
        // untouched fields keep their previous values
        assert_eq!(config.notifications.expire_ms, 3000);
    }

    #[test]
    fn env_overrides_are_clamped_like_any_other_source() {
        let mut config = DaemonConfig::default();
        config.apply_overrides(lookup(&[
            ("V2M_BEAM_SIZE", "99"),
            ("V2M_SILENCE_COMMIT_MS", "50"),
            ("V2M_WHISPER_DEVICE", "CPU"),
        ]));
        config.normalize();

        assert_eq!(config.whisper.beam_size, 10);
        assert_eq!(config.vad.silence_commit_ms, 200);
        assert_eq!(config.whisper.device, "cpu");
    }

    #[test]
    fn boolean_env_flags_accept_common_spellings() {
        for truthy in ["1", "true", "YES", "on"] {
            let mut config = DaemonConfig::default();
            config.apply_overrides(lookup(&[("V2M_SAVE_LAST_RECORDING", truthy)]));
            assert!(config.audio.save_last_recording, "{truthy} should enable");
        }

        let mut config = DaemonConfig::default();
        config.apply_overrides(lookup(&[("V2M_NOTIFICATIONS", "0")]));
        assert!(!config.notifications.enabled);
    }

    #[test]
    fn unparseable_or_empty_env_values_are_ignored() {
        let mut config = DaemonConfig::default();
        config.whisper.beam_size = 4;

        config.apply_overrides(lookup(&[
            ("V2M_BEAM_SIZE", "not-a-number"),
            ("V2M_LANGUAGE", "   "),
        ]));
        config.normalize();

        assert_eq!(config.whisper.beam_size, 4, "bad number keeps the file value");
        assert_eq!(config.whisper.language, "es", "blank string keeps the file value");
    }
}
