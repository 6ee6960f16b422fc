//! Events the engine pushes to whoever is listening.
//!
//! The daemon forwards these over its framed channel as
//! `{"status":"event","data":{...}}`; the `data` object is exactly the
//! serialised [`EngineEvent`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unsolicited engine event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Live transcript state. Provisional (`final == false`) payloads may be
    /// superseded; final ones are immutable.
    TranscriptionUpdate {
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    /// Liveness signal while a session is active, so clients can tell
    /// "recording but silent" from "stalled".
    Heartbeat { timestamp: f64, state: String },
}

impl EngineEvent {
    pub fn provisional(text: impl Into<String>) -> Self {
        Self::TranscriptionUpdate {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self::TranscriptionUpdate {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn heartbeat(state: impl Into<String>) -> Self {
        Self::Heartbeat {
            timestamp: unix_timestamp(),
            state: state.into(),
        }
    }
}

/// Seconds since the Unix epoch, as carried in heartbeat payloads.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Capability handed to the transcriber for event emission. The daemon
/// implements it over its client session; tests collect into a Vec.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Sink that discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}

impl EventSink for tokio::sync::broadcast::Sender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        // No receivers is fine — nobody is watching right now.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_update_uses_wire_field_names() {
        let event = EngineEvent::final_text("hola mundo");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transcription_update");
        assert_eq!(json["text"], "hola mundo");
        assert_eq!(json["final"], true);

        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn heartbeat_carries_timestamp_and_state() {
        let event = EngineEvent::heartbeat("recording");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["state"], "recording");
        assert!(json["timestamp"].as_f64().unwrap() > 0.0);
    }
}
