//! Transport message log.
//!
//! Append-only, timestamped stream of human-readable transport events:
//! state transitions, fragment arrivals, errors. Purely diagnostic; nothing
//! reads it back for control flow. Fan-out is a broadcast channel so any
//! number of observers can subscribe and drop out independently; a slow
//! consumer only loses its own backlog.

use chrono::{DateTime, Local};
use tokio::sync::broadcast;

/// One published log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.timestamp.format("[%H:%M:%S%.3f] "))?;
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone)]
pub struct MessageLog {
    sender: broadcast::Sender<LogEntry>,
}

impl MessageLog {
    /// `capacity` bounds how far a subscriber may lag before it starts
    /// missing entries.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a line, stamped with the current wall clock. Delivery is
    /// best-effort; with no subscribers the line is dropped.
    pub fn publish(&self, text: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            text: text.into(),
        };
        tracing::debug!(target: "colibri_link::transport", "{}", entry.text);
        let _ = self.sender.send(entry);
    }

    /// Subscribe to everything published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(256)
    }
}
