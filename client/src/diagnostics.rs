//! Non-fatal failure reporting shared between the network workers and the UI

use crate::queue::MessageQueue;
use log::{error, warn};

/// Receives every non-fatal failure the session layer runs into: decode
/// errors, unreachable probe targets, unknown probe responses, packets nobody
/// listens for, and server-initiated disconnects.
pub trait DiagnosticSink: Send + Sync {
    fn warn(&self, message: String);
    fn error(&self, message: String);
}

/// Default sink. Logs every message and keeps it queued until the UI takes it
/// for display.
#[derive(Default)]
pub struct ErrorQueues {
    warnings: MessageQueue<String>,
    errors: MessageQueue<String>,
}

impl ErrorQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_warnings(&self) -> Vec<String> {
        self.warnings.pop_all()
    }

    pub fn take_errors(&self) -> Vec<String> {
        self.errors.pop_all()
    }

    pub fn pending(&self) -> usize {
        self.warnings.len() + self.errors.len()
    }
}

impl DiagnosticSink for ErrorQueues {
    fn warn(&self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn error(&self, message: String) {
        error!("{}", message);
        self.errors.push(message);
    }
}
