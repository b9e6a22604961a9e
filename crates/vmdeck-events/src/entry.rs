use std::collections::HashSet;

use serde::{Deserialize, Serialize, Serializer};

/// One line of backend output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Backend-assigned id; the only deduplication key.
    pub id: String,
    pub message: String,
    /// Opaque, lexicographically comparable; used only for ordering.
    pub timestamp: String,
}

impl LogEntry {
    pub fn new(
        id: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Named buffers kept per subject. Progress events share the stdout buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
    Error,
}

/// A channel's entries, sorted by timestamp with unique ids.
///
/// Entries with equal timestamps keep their arrival order.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    entries: Vec<LogEntry>,
    ids: HashSet<String>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry` at its sorted position.
    ///
    /// Returns `false` without touching the buffer if an entry with the same
    /// id is already present, whatever its content.
    pub fn insert(&mut self, entry: LogEntry) -> bool {
        if self.ids.contains(&entry.id) {
            return false;
        }
        self.ids.insert(entry.id.clone());

        let in_order = self
            .entries
            .last()
            .map_or(true, |last| entry.timestamp >= last.timestamp);
        if in_order {
            self.entries.push(entry);
        } else {
            // First entry with a strictly greater timestamp; equal peers stay ahead.
            let at = self
                .entries
                .partition_point(|e| e.timestamp <= entry.timestamp);
            self.entries.insert(at, entry);
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }
}

impl Serialize for LogBuffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.entries)
    }
}

/// Everything the UI sees for one subject.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelState {
    pub stdout: LogBuffer,
    pub stderr: LogBuffer,
    pub error: LogBuffer,
    pub is_active: bool,
    /// Timestamp of the last terminal event, when the backend supplied one.
    #[serde(skip)]
    pub(crate) finished_at: Option<String>,
    /// Set when the last terminal event was a success: stdout and stderr
    /// lines at or before it belong to the cleared run.
    #[serde(skip)]
    pub(crate) cleared_through: Option<String>,
}

impl ChannelState {
    pub fn buffer(&self, channel: Channel) -> &LogBuffer {
        match channel {
            Channel::Stdout => &self.stdout,
            Channel::Stderr => &self.stderr,
            Channel::Error => &self.error,
        }
    }

    pub(crate) fn buffer_mut(&mut self, channel: Channel) -> &mut LogBuffer {
        match channel {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
            Channel::Error => &mut self.error,
        }
    }

    /// Whether a line at `timestamp` belongs to a run that already succeeded.
    pub(crate) fn is_cleared(&self, channel: Channel, timestamp: &str) -> bool {
        if channel == Channel::Error {
            return false;
        }
        self.cleared_through
            .as_deref()
            .is_some_and(|cleared| timestamp <= cleared)
    }

    pub(crate) fn clear_logs(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
        self.error.clear();
    }
}
