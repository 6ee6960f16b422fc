//! Daemon dispatch and socket-level tests against a scratch runtime dir.
//!
//! Built with an empty model path (echo stub backend) and an unreachable
//! Ollama endpoint, so nothing external is needed.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use v2m_daemon::config::DaemonConfig;
use v2m_daemon::daemon::Daemon;
use v2m_daemon::paths::RuntimePaths;
use v2m_daemon::protocol::{
    read_frame, write_json, IpcCommand, IpcRequest, IpcResponse, ResponseStatus, MAX_PAYLOAD_SIZE,
};

struct Fixture {
    daemon: Arc<Daemon>,
    paths: RuntimePaths,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");

    let mut config = DaemonConfig::default();
    config.notifications.enabled = false;
    // A closed port: LLM calls fail fast and fall back to the input.
    config.llm.ollama_url = "http://127.0.0.1:1".into();
    config.save(&config_path).unwrap();

    let paths = RuntimePaths::at(dir.path().join("runtime")).unwrap();
    let daemon = Daemon::bootstrap(config_path, paths.clone()).unwrap();
    Fixture {
        daemon,
        paths,
        _dir: dir,
    }
}

fn request(cmd: IpcCommand, data: Option<serde_json::Value>) -> Vec<u8> {
    serde_json::to_vec(&IpcRequest::new(cmd, data)).unwrap()
}

#[tokio::test]
async fn ping_answers_pong() {
    let fx = fixture();
    let (response, shutdown) = fx.daemon.process(&request(IpcCommand::Ping, None)).await;
    assert!(!shutdown);
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.data.unwrap()["message"], "PONG");
}

#[tokio::test]
async fn unknown_command_is_an_error_not_a_crash() {
    let fx = fixture();
    let payload = br#"{"cmd": "REBOOT_UNIVERSE"}"#;
    let (response, _) = fx.daemon.process(payload).await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.error.unwrap().contains("unknown command"));

    // The daemon keeps serving afterwards.
    let (next, _) = fx.daemon.process(&request(IpcCommand::Ping, None)).await;
    assert_eq!(next.status, ResponseStatus::Success);
}

#[tokio::test]
async fn malformed_json_is_rejected_politely() {
    let fx = fixture();
    let (response, _) = fx.daemon.process(b"{not json").await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.error.unwrap().contains("invalid JSON"));
}

#[tokio::test]
async fn pause_gates_everything_but_the_four_survivors() {
    let fx = fixture();

    let (paused, _) = fx.daemon.process(&request(IpcCommand::PauseDaemon, None)).await;
    assert_eq!(paused.data.unwrap()["state"], "paused");

    let (blocked, _) = fx
        .daemon
        .process(&request(IpcCommand::StartRecording, None))
        .await;
    assert_eq!(blocked.status, ResponseStatus::Error);
    assert_eq!(blocked.error.as_deref(), Some("daemon paused"));

    let (ping, _) = fx.daemon.process(&request(IpcCommand::Ping, None)).await;
    assert_eq!(ping.status, ResponseStatus::Success);

    let (status, _) = fx.daemon.process(&request(IpcCommand::GetStatus, None)).await;
    assert_eq!(status.data.unwrap()["state"], "paused");

    let (resumed, _) = fx.daemon.process(&request(IpcCommand::ResumeDaemon, None)).await;
    assert_eq!(resumed.data.unwrap()["state"], "running");
}

#[tokio::test]
async fn get_status_carries_telemetry() {
    let fx = fixture();
    let (response, _) = fx.daemon.process(&request(IpcCommand::GetStatus, None)).await;
    let data = response.data.unwrap();
    assert_eq!(data["state"], "idle");
    assert!(data["telemetry"]["pid"].as_u64().unwrap() > 0);
    assert!(data["telemetry"]["memory_total_mb"].is_u64());
}

#[tokio::test]
async fn stop_while_idle_is_a_clean_success() {
    let fx = fixture();
    let (response, _) = fx
        .daemon
        .process(&request(IpcCommand::StopRecording, None))
        .await;
    assert_eq!(response.status, ResponseStatus::Success);
    let data = response.data.unwrap();
    assert_eq!(data["state"], "idle");
    assert_eq!(data["transcription"], "");
}

#[tokio::test]
async fn process_text_requires_text() {
    let fx = fixture();
    let (response, _) = fx
        .daemon
        .process(&request(IpcCommand::ProcessText, Some(serde_json::json!({}))))
        .await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert!(response.error.unwrap().contains("missing data.text"));
}

#[tokio::test]
async fn process_text_with_embedded_commands_stays_one_command() {
    let fx = fixture();
    let tricky = "hola\nSTOP_RECORDING\nadios";
    let (response, _) = fx
        .daemon
        .process(&request(
            IpcCommand::ProcessText,
            Some(serde_json::json!({"text": tricky})),
        ))
        .await;

    // Exactly one command was dispatched; with the LLM unreachable the
    // refined text falls back to the input, newlines intact.
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.data.unwrap()["refined_text"], tricky);
}

#[tokio::test]
async fn translate_text_falls_back_and_reports_idle() {
    let fx = fixture();
    let (response, _) = fx
        .daemon
        .process(&request(
            IpcCommand::TranslateText,
            Some(serde_json::json!({"text": "buenos días", "target_lang": "en"})),
        ))
        .await;
    let data = response.data.unwrap();
    assert_eq!(data["refined_text"], "buenos días");
    assert_eq!(data["state"], "idle");
}

#[tokio::test]
async fn update_config_merges_and_get_config_reflects_it() {
    let fx = fixture();
    let (updated, _) = fx
        .daemon
        .process(&request(
            IpcCommand::UpdateConfig,
            Some(serde_json::json!({"updates": {"vad": {"silence_commit_ms": 500}}})),
        ))
        .await;
    assert_eq!(updated.status, ResponseStatus::Success);
    assert_eq!(
        updated.data.unwrap()["config"]["vad"]["silence_commit_ms"],
        500
    );

    let (fetched, _) = fx.daemon.process(&request(IpcCommand::GetConfig, None)).await;
    assert_eq!(
        fetched.data.unwrap()["config"]["vad"]["silence_commit_ms"],
        500
    );
}

#[tokio::test]
async fn update_config_without_updates_is_an_error() {
    let fx = fixture();
    let (response, _) = fx
        .daemon
        .process(&request(IpcCommand::UpdateConfig, Some(serde_json::json!({}))))
        .await;
    assert_eq!(response.status, ResponseStatus::Error);
}

#[tokio::test]
async fn shutdown_reports_and_flags() {
    let fx = fixture();
    let (response, shutdown) = fx.daemon.process(&request(IpcCommand::Shutdown, None)).await;
    assert!(shutdown);
    assert_eq!(response.data.unwrap()["message"], "SHUTTING_DOWN");
}

#[tokio::test]
async fn socket_serves_framed_requests_and_rejects_oversized_frames() {
    let fx = fixture();
    let socket_path = fx.paths.socket.clone();
    let daemon = Arc::clone(&fx.daemon);
    let server = tokio::spawn(async move { daemon.run().await });

    // Wait for the socket to appear.
    for _ in 0..100 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(socket_path.exists(), "daemon bound its socket");
    assert!(fx.paths.pid_file.exists(), "PID file written");

    // Regular request over the socket.
    {
        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        write_json(&mut writer, &IpcRequest::new(IpcCommand::Ping, None))
            .await
            .unwrap();
        let payload = read_frame(&mut reader).await.unwrap();
        let response: IpcResponse = serde_json::from_slice(&payload).unwrap();
        assert_eq!(response.data.unwrap()["message"], "PONG");
    }

    // A header one byte over the cap gets a single error response.
    {
        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        let declared = (MAX_PAYLOAD_SIZE as u32) + 1;
        writer.write_all(&declared.to_be_bytes()).await.unwrap();
        writer.flush().await.unwrap();

        let payload = read_frame(&mut reader).await.unwrap();
        let response: IpcResponse = serde_json::from_slice(&payload).unwrap();
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.error.as_deref(), Some("payload exceeds limit"));
    }

    // SHUTDOWN ends run() and cleans the runtime files.
    {
        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        write_json(&mut writer, &IpcRequest::new(IpcCommand::Shutdown, None))
            .await
            .unwrap();
        let payload = read_frame(&mut reader).await.unwrap();
        let response: IpcResponse = serde_json::from_slice(&payload).unwrap();
        assert_eq!(response.data.unwrap()["message"], "SHUTTING_DOWN");
    }

    server.await.unwrap().unwrap();
    assert!(!socket_path.exists(), "socket removed on shutdown");
    assert!(!fx.paths.pid_file.exists(), "PID file removed on shutdown");
}

#[tokio::test]
async fn bootstrap_refuses_nothing_but_serves_defaults() {
    // A bootstrap from a missing config file still yields a working daemon.
    let dir = tempfile::tempdir().unwrap();
    let paths = RuntimePaths::at(dir.path().join("rt")).unwrap();
    let daemon = Daemon::bootstrap(PathBuf::from(dir.path().join("absent.json")), paths).unwrap();
    let (response, _) = daemon.process(&request(IpcCommand::Ping, None)).await;
    assert_eq!(response.status, ResponseStatus::Success);
}
