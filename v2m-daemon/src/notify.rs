//! Desktop notifications, best-effort with auto-dismiss.

use notify_rust::{Notification, Timeout};
use tracing::debug;

/// Notification capability held by the workflow. Absence of a notification
/// daemon must never break a dictation.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

pub struct DesktopNotifier {
    expire_ms: u32,
}

impl DesktopNotifier {
    pub fn new(expire_ms: u32) -> Self {
        Self { expire_ms }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        let title = title.to_string();
        let message = message.to_string();
        let expire_ms = self.expire_ms;
        // D-Bus round trips don't belong on the control plane; a short
        // detached thread per notification is plenty at dictation rates.
        std::thread::spawn(move || {
            if let Err(e) = Notification::new()
                .summary(&title)
                .body(&message)
                .appname("voice2machine")
                .timeout(Timeout::Milliseconds(expire_ms))
                .show()
            {
                debug!("notification failed: {e}");
            }
        });
    }
}

/// Notifier that drops everything (notifications disabled in config).
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _title: &str, _message: &str) {}
}
