//! Command-line surface.
//!
//! `v2m` with no subcommand starts the daemon; any subcommand is sent to a
//! running daemon as one framed IPC request.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "v2m",
    version,
    about = "Local voice dictation: persistent Whisper daemon + CLI client"
)]
pub struct Cli {
    /// Path to the config file (defaults to ~/.config/v2m/config.json).
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Option<ClientCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Check that the daemon is alive
    Ping,
    /// Show daemon state and system telemetry
    Status,
    /// Start recording
    Start,
    /// Stop recording and print the transcription
    Stop,
    /// Start recording if idle, stop if recording
    Toggle,
    /// Refine text through the configured LLM
    ProcessText {
        text: String,
    },
    /// Translate text through the configured LLM
    TranslateText {
        text: String,
        /// Target language code
        #[arg(long, default_value = "en")]
        lang: String,
    },
    /// Pause command processing
    Pause,
    /// Resume command processing
    Resume,
    /// Print the daemon's current configuration
    GetConfig,
    /// Merge a JSON patch into the configuration
    UpdateConfig {
        /// JSON object, e.g. '{"vad": {"silence_commit_ms": 500}}'
        updates: String,
    },
    /// Ask the daemon to shut down
    Shutdown,
}
