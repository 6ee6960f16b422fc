//! One-shot IPC client behind the CLI subcommands.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tokio::net::UnixStream;

use crate::cli::ClientCommand;
use crate::paths::RuntimePaths;
use crate::protocol::{read_frame, write_json, IpcCommand, IpcRequest, IpcResponse, ResponseStatus};

/// Execute one subcommand against a running daemon. Prints the response
/// JSON; exit code 0 only for a success payload.
pub async fn run(command: ClientCommand) -> ExitCode {
    match execute(command).await {
        Ok(response) => {
            match serde_json::to_string_pretty(&response) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{response:?}"),
            }
            if response.status == ResponseStatus::Success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: ClientCommand) -> Result<IpcResponse> {
    let request = match command {
        ClientCommand::Ping => IpcRequest::new(IpcCommand::Ping, None),
        ClientCommand::Status => IpcRequest::new(IpcCommand::GetStatus, None),
        ClientCommand::Start => IpcRequest::new(IpcCommand::StartRecording, None),
        ClientCommand::Stop => IpcRequest::new(IpcCommand::StopRecording, None),
        ClientCommand::Toggle => return toggle().await,
        ClientCommand::ProcessText { text } => {
            IpcRequest::new(IpcCommand::ProcessText, Some(json!({"text": text})))
        }
        ClientCommand::TranslateText { text, lang } => IpcRequest::new(
            IpcCommand::TranslateText,
            Some(json!({"text": text, "target_lang": lang})),
        ),
        ClientCommand::Pause => IpcRequest::new(IpcCommand::PauseDaemon, None),
        ClientCommand::Resume => IpcRequest::new(IpcCommand::ResumeDaemon, None),
        ClientCommand::GetConfig => IpcRequest::new(IpcCommand::GetConfig, None),
        ClientCommand::UpdateConfig { updates } => {
            let parsed: serde_json::Value =
                serde_json::from_str(&updates).context("updates must be a JSON object")?;
            IpcRequest::new(IpcCommand::UpdateConfig, Some(json!({"updates": parsed})))
        }
        ClientCommand::Shutdown => IpcRequest::new(IpcCommand::Shutdown, None),
    };
    send(request).await
}

/// Client-side toggle: the daemon's command set is deliberately minimal,
/// so toggling is status + start-or-stop.
async fn toggle() -> Result<IpcResponse> {
    let status = send(IpcRequest::new(IpcCommand::GetStatus, None)).await?;
    let recording = status
        .data
        .as_ref()
        .and_then(|d| d.get("state"))
        .and_then(|s| s.as_str())
        .map(|s| s == "recording")
        .unwrap_or(false);
    let next = if recording {
        IpcCommand::StopRecording
    } else {
        IpcCommand::StartRecording
    };
    send(IpcRequest::new(next, None)).await
}

/// Send one framed request and return the first non-event response.
pub async fn send(request: IpcRequest) -> Result<IpcResponse> {
    let paths = RuntimePaths::resolve()?;
    if !paths.socket.exists() {
        bail!(
            "daemon is not running (no socket at {}).\nStart it with: v2m",
            paths.socket.display()
        );
    }

    let stream = UnixStream::connect(&paths.socket)
        .await
        .with_context(|| format!("connecting to {}", paths.socket.display()))?;
    let (mut reader, mut writer) = stream.into_split();

    write_json(&mut writer, &request)
        .await
        .context("sending request")?;

    // This connection is now the daemon's event sink; skip any events that
    // arrive ahead of our response.
    loop {
        let payload = read_frame(&mut reader).await.context("reading response")?;
        let response: IpcResponse =
            serde_json::from_slice(&payload).context("parsing response")?;
        if !response.is_event() {
            return Ok(response);
        }
    }
}
