//! Backend event model and the feed seam the bridge subscribes through.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::entry::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Start,
    Progress,
    Stdout,
    Stderr,
    Error,
    Success,
}

impl EventCategory {
    pub const ALL: [EventCategory; 6] = [
        EventCategory::Start,
        EventCategory::Progress,
        EventCategory::Stdout,
        EventCategory::Stderr,
        EventCategory::Error,
        EventCategory::Success,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::Start => "start",
            EventCategory::Progress => "progress",
            EventCategory::Stdout => "stdout",
            EventCategory::Stderr => "stderr",
            EventCategory::Error => "error",
            EventCategory::Success => "success",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EventCategory::Error | EventCategory::Success)
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One asynchronously delivered notification from the instance backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendEvent {
    pub subject: String,
    pub category: EventCategory,
    pub message_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub payload: String,
}

impl BackendEvent {
    pub fn new(
        subject: impl Into<String>,
        category: EventCategory,
        message_id: impl Into<String>,
        timestamp: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            category,
            message_id: message_id.into(),
            timestamp: timestamp.into(),
            payload: payload.into(),
        }
    }

    /// Parse one JSON-encoded event, as emitted line by line by the backend.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }

    pub fn to_entry(&self) -> LogEntry {
        LogEntry::new(&self.message_id, &self.payload, &self.timestamp)
    }
}

/// Current time as nanoseconds since the Unix epoch, zero-padded to 20
/// digits so that string order matches numeric order.
pub fn timestamp_now() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:020}")
}

/// Errors from the event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The backend cannot be reached, so no subscription was opened.
    Unreachable(String),
    /// The feed has been shut down.
    Closed,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Unreachable(msg) => write!(f, "event feed unreachable: {msg}"),
            FeedError::Closed => write!(f, "event feed closed"),
        }
    }
}

impl std::error::Error for FeedError {}

/// Source of backend events, one subscription per category.
pub trait EventFeed: Send + Sync {
    fn subscribe(
        &self,
        category: EventCategory,
    ) -> Result<broadcast::Receiver<BackendEvent>, FeedError>;
}
