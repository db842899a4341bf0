use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressLabel {
    Show(String),
    RebuildingIndex,
    CheckingActivity,
    Finishing,
}

impl fmt::Display for ProgressLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressLabel::Show(name) => write!(f, "{}...", name),
            ProgressLabel::RebuildingIndex => f.write_str("Rebuilding search index"),
            ProgressLabel::CheckingActivity => f.write_str("Checking trakt activity"),
            ProgressLabel::Finishing => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub current: usize,
    pub total: usize,
    pub label: ProgressLabel,
}

impl ProgressEvent {
    /// The last two steps have fixed labels; every other step shows the
    /// show being updated.
    pub fn new(current: usize, total: usize, show_name: &str) -> Self {
        let label = if current == total {
            ProgressLabel::Finishing
        } else if current + 1 == total {
            ProgressLabel::CheckingActivity
        } else if current + 2 == total {
            ProgressLabel::RebuildingIndex
        } else {
            ProgressLabel::Show(show_name.to_string())
        };
        Self {
            current,
            total,
            label,
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards progress into a channel, e.g. to drive a notification.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.tx.send(event);
    }
}
