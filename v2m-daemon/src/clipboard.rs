//! Clipboard delivery, best-effort across the Linux desktop landscape.
//!
//! Clipboard access is fragmented between X11, Wayland and Flatpak
//! sandboxes. The order here mirrors what actually works in the field:
//! Flatpak → `wl-copy` (GNOME lacks wlr-data-control, which arboard's
//! Wayland path needs), X11 → `xclip` (arboard can report success without
//! setting anything on some setups), otherwise arboard.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use arboard::Clipboard as Arboard;
use tracing::debug;

/// Delivery capability held by the workflow. Failures are reported but
/// never fail a transcription.
pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<()>;
}

pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<()> {
        debug!(chars = text.len(), "copying to clipboard");
        if is_flatpak() {
            return copy_via_command("wl-copy", &[], text);
        }
        if session_type() == "x11" {
            return copy_via_command("xclip", &["-selection", "clipboard"], text);
        }
        copy_via_arboard(text)
    }
}

fn is_flatpak() -> bool {
    std::path::Path::new("/.flatpak-info").exists()
}

fn session_type() -> &'static str {
    static SESSION_TYPE: OnceLock<&'static str> = OnceLock::new();
    SESSION_TYPE.get_or_init(|| {
        match std::env::var("XDG_SESSION_TYPE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "x11" => "x11",
            "wayland" => "wayland",
            _ => "unknown",
        }
    })
}

fn copy_via_command(program: &str, args: &[&str], text: &str) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning {program}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .with_context(|| format!("writing to {program}"))?;
    }

    let status = child.wait().with_context(|| format!("waiting for {program}"))?;
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(())
}

fn copy_via_arboard(text: &str) -> Result<()> {
    let mut clipboard = Arboard::new().context("opening clipboard")?;
    clipboard.set_text(text).context("setting clipboard text")?;
    Ok(())
}
