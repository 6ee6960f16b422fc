//! System metrics for `GET_STATUS`.

use parking_lot::Mutex;
use serde_json::{json, Value};
use sysinfo::System;

pub struct Telemetry {
    system: Mutex<System>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    pub fn snapshot(&self) -> Value {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        let used = system.used_memory();
        let memory_percent = if total > 0 {
            (used as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        json!({
            "cpu_percent": system.global_cpu_usage(),
            "memory_percent": memory_percent,
            "memory_used_mb": used / (1024 * 1024),
            "memory_total_mb": total / (1024 * 1024),
            "pid": std::process::id(),
            "uptime_secs": System::uptime(),
        })
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_has_the_expected_fields() {
        let telemetry = Telemetry::new();
        let snap = telemetry.snapshot();
        assert!(snap["pid"].as_u64().unwrap() > 0);
        assert!(snap["memory_total_mb"].is_u64());
        assert!(snap["cpu_percent"].is_number());
    }
}
