//! # v2m-daemon
//!
//! The `v2m` binary: a Unix-socket daemon hosting the streaming dictation
//! engine, and a one-shot CLI client for driving it. See [`daemon::Daemon`]
//! for the control plane and [`workflow::RecordingWorkflow`] for the
//! user-facing toggle surface.

pub mod cli;
pub mod client;
pub mod clipboard;
pub mod config;
pub mod daemon;
pub mod llm;
pub mod notify;
pub mod paths;
pub mod protocol;
pub mod reaper;
pub mod telemetry;
pub mod workflow;
