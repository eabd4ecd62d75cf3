//! Notification sink seam.
//!
//! Delivery (tray balloons, desktop toasts) belongs to an external
//! collaborator; the pipeline's only obligation is to emit well-formed
//! `(title, message, is_error)` events.

use tracing::{error, info};

pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str, is_error: bool);
}

/// Default sink: forwards events to the log stream.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, title: &str, message: &str, is_error: bool) {
        if is_error {
            error!(title, "{}", message);
        } else {
            info!(title, "{}", message);
        }
    }
}
