//! Runtime file locations under a secure per-user directory.
//!
//! `$XDG_RUNTIME_DIR/v2m` when available, otherwise `/tmp/v2m_<uid>`.
//! The directory is created 0700 and must be owned by the invoking user;
//! a directory owned by anyone else is refused outright rather than used.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

pub const SOCKET_NAME: &str = "v2m.sock";
pub const PID_FILE_NAME: &str = "v2m_daemon.pid";
pub const RECORDING_FLAG_NAME: &str = "v2m_recording.pid";
pub const AUDIO_DUMP_NAME: &str = "v2m_audio.wav";

#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub dir: PathBuf,
    pub socket: PathBuf,
    pub pid_file: PathBuf,
    pub recording_flag: PathBuf,
    pub audio_dump: PathBuf,
}

impl RuntimePaths {
    /// Resolve and prepare the runtime directory.
    pub fn resolve() -> Result<Self> {
        let dir = match std::env::var_os("XDG_RUNTIME_DIR") {
            Some(runtime) => PathBuf::from(runtime).join("v2m"),
            None => {
                let uid = current_uid();
                std::env::temp_dir().join(format!("v2m_{uid}"))
            }
        };
        Self::at(dir)
    }

    /// Prepare a specific directory (used by tests).
    pub fn at(dir: PathBuf) -> Result<Self> {
        ensure_secure_dir(&dir)?;
        Ok(Self {
            socket: dir.join(SOCKET_NAME),
            pid_file: dir.join(PID_FILE_NAME),
            recording_flag: dir.join(RECORDING_FLAG_NAME),
            audio_dump: dir.join(AUDIO_DUMP_NAME),
            dir,
        })
    }

    /// Remove socket, pid file and recording flag if present.
    pub fn remove_stale_files(&self) {
        for path in [&self.socket, &self.pid_file, &self.recording_flag] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::debug!(path = %path.display(), "could not remove stale file: {e}");
                } else {
                    tracing::debug!(path = %path.display(), "removed stale runtime file");
                }
            }
        }
    }
}

pub fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

fn ensure_secure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating runtime dir {}", dir.display()))?;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("setting 0700 on {}", dir.display()))?;
        return Ok(());
    }

    let meta = std::fs::metadata(dir)
        .with_context(|| format!("inspecting runtime dir {}", dir.display()))?;
    if meta.uid() != current_uid() {
        bail!(
            "runtime directory {} is not owned by the current user",
            dir.display()
        );
    }
    if meta.permissions().mode() & 0o777 != 0o700 {
        // We own it, so tightening must succeed.
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("tightening permissions on {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_directory_with_0700() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("runtime");
        let paths = RuntimePaths::at(dir.clone()).unwrap();

        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        assert_eq!(paths.socket.file_name().unwrap(), SOCKET_NAME);
        assert_eq!(paths.pid_file.file_name().unwrap(), PID_FILE_NAME);
    }

    #[test]
    fn tightens_loose_permissions_on_existing_dir() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("runtime");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        RuntimePaths::at(dir.clone()).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn remove_stale_files_clears_leftovers() {
        let base = tempfile::tempdir().unwrap();
        let paths = RuntimePaths::at(base.path().join("runtime")).unwrap();
        std::fs::write(&paths.pid_file, "12345").unwrap();
        std::fs::write(&paths.recording_flag, "").unwrap();

        paths.remove_stale_files();
        assert!(!paths.pid_file.exists());
        assert!(!paths.recording_flag.exists());
    }
}
