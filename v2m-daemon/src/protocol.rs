//! Wire protocol for the control socket.
//!
//! Both directions use the same framing:
//!
//! ```text
//! +----------+----------------+
//! | len (4B) | UTF-8 payload  |
//! | big-end  | (JSON object)  |
//! +----------+----------------+
//! ```
//!
//! Requests are `{"cmd": "<COMMAND>", "data": {...}}`; responses are
//! `{"status": "success"|"error"|"event", "data"?: {...}, "error"?: "..."}`.
//! Events ride the same channel with `status == "event"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame payload cap: 10 MiB. A declared length beyond this is rejected
/// before any body allocation.
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

const HEADER_SIZE: usize = 4;

/// Commands the daemon recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcCommand {
    Ping,
    GetStatus,
    StartRecording,
    StopRecording,
    ProcessText,
    TranslateText,
    UpdateConfig,
    GetConfig,
    PauseDaemon,
    ResumeDaemon,
    Shutdown,
}

impl IpcCommand {
    /// Parse the wire spelling. Unknown strings are left to the dispatcher
    /// so it can answer with a proper error instead of a parse failure.
    pub fn parse(cmd: &str) -> Option<Self> {
        Some(match cmd {
            "PING" => Self::Ping,
            "GET_STATUS" => Self::GetStatus,
            "START_RECORDING" => Self::StartRecording,
            "STOP_RECORDING" => Self::StopRecording,
            "PROCESS_TEXT" => Self::ProcessText,
            "TRANSLATE_TEXT" => Self::TranslateText,
            "UPDATE_CONFIG" => Self::UpdateConfig,
            "GET_CONFIG" => Self::GetConfig,
            "PAUSE_DAEMON" => Self::PauseDaemon,
            "RESUME_DAEMON" => Self::ResumeDaemon,
            "SHUTDOWN" => Self::Shutdown,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::GetStatus => "GET_STATUS",
            Self::StartRecording => "START_RECORDING",
            Self::StopRecording => "STOP_RECORDING",
            Self::ProcessText => "PROCESS_TEXT",
            Self::TranslateText => "TRANSLATE_TEXT",
            Self::UpdateConfig => "UPDATE_CONFIG",
            Self::GetConfig => "GET_CONFIG",
            Self::PauseDaemon => "PAUSE_DAEMON",
            Self::ResumeDaemon => "RESUME_DAEMON",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// Commands still served while the daemon is paused.
    pub fn allowed_while_paused(&self) -> bool {
        matches!(
            self,
            Self::Ping | Self::GetStatus | Self::ResumeDaemon | Self::Shutdown
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl IpcRequest {
    pub fn new(cmd: IpcCommand, data: Option<Value>) -> Self {
        Self {
            cmd: cmd.as_str().to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn success(data: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn event(data: Value) -> Self {
        Self {
            status: ResponseStatus::Event,
            data: Some(data),
            error: None,
        }
    }

    pub fn is_event(&self) -> bool {
        self.status == ResponseStatus::Event
    }
}

/// Framing errors, separated so the oversized case can get its own
/// protocol-level response.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload exceeds limit")]
    Oversized { declared: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one length-prefixed frame. An oversized declared length returns
/// [`FrameError::Oversized`] without allocating or reading the body.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let declared = u32::from_be_bytes(header) as usize;
    if declared > MAX_PAYLOAD_SIZE {
        return Err(FrameError::Oversized { declared });
    }

    let mut payload = vec![0u8; declared];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::Oversized {
            declared: payload.len(),
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialise + frame in one step.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(std::io::Error::other)?;
    write_frame(writer, &payload).await
}
