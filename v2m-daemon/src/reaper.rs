//! Orphan cleanup at daemon start.
//!
//! A crashed daemon leaves a process holding the model (and VRAM), plus a
//! socket, PID file and recording flag nobody will clean up. Before binding,
//! kill any other `v2m` process and delete the leftovers.

use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tracing::{info, warn};

use crate::paths::RuntimePaths;

/// Marker that identifies our processes in a command line.
const PROCESS_NAME: &str = "v2m";

pub fn reap_orphans(paths: &RuntimePaths) {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let self_pid = sysinfo::get_current_pid().ok();
    let mut killed = 0usize;

    for (pid, process) in system.processes() {
        if Some(*pid) == self_pid {
            continue;
        }
        if !is_v2m_process(process) {
            continue;
        }
        warn!(pid = pid.as_u32(), "killing orphaned v2m process");
        if process.kill() {
            killed += 1;
        }
    }

    if killed > 0 {
        // Give the kernel a moment to tear them down before we take over
        // their socket path.
        std::thread::sleep(Duration::from_millis(300));
        info!(killed, "reaped orphaned v2m processes");
    }

    paths.remove_stale_files();
}

fn is_v2m_process(process: &sysinfo::Process) -> bool {
    if process.name().to_string_lossy() == PROCESS_NAME {
        return true;
    }
    // Also match an interpreter or wrapper invoking our binary by path.
    process
        .cmd()
        .first()
        .map(|arg0| {
            std::path::Path::new(arg0)
                .file_name()
                .map(|f| f.to_string_lossy() == PROCESS_NAME)
                .unwrap_or(false)
        })
        .unwrap_or(false)
}
