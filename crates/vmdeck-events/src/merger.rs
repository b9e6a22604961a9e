//! Per-subject, per-channel merge of asynchronously delivered log events.
//!
//! Events can arrive late, out of order, or more than once. Each channel is
//! kept sorted by timestamp after every insert (so a live tail can render it
//! incrementally) and deduplicated by message id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::entry::{Channel, ChannelState, LogEntry};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The entry is recorded in the error channel.
    Failure(LogEntry),
}

/// Per-subject log channels and run activity, fed by the event bridge.
///
/// All state lives behind one mutex; every successful mutation is announced
/// on [`subscribe_changes`](Self::subscribe_changes). Observers read copies
/// through [`snapshot`](Self::snapshot).
pub struct OrderedEventMerger {
    subjects: Mutex<HashMap<String, ChannelState>>,
    changes: broadcast::Sender<String>,
}

impl OrderedEventMerger {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            subjects: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ChannelState>> {
        self.subjects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, subject: &str) {
        // No receivers is fine.
        let _ = self.changes.send(subject.to_string());
    }

    /// Receive the subject name after every mutation.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    /// Insert `entry` into `subject`'s `channel`, keeping timestamp order.
    ///
    /// Redelivery of an id already in the channel is a no-op, as is a stdout
    /// or stderr line that arrives after the success of its run (timestamp
    /// at or before the success). Returns whether the entry was added.
    pub fn insert(&self, subject: &str, channel: Channel, entry: LogEntry) -> bool {
        let inserted = {
            let mut subjects = self.lock();
            let state = subjects.entry(subject.to_string()).or_default();
            if state.is_cleared(channel, &entry.timestamp) {
                log::debug!("{subject}: dropping {} after run success", entry.id);
                false
            } else {
                state.buffer_mut(channel).insert(entry)
            }
        };
        if inserted {
            self.notify(subject);
        }
        inserted
    }

    pub fn mark_start(&self, subject: &str) {
        self.lock().entry(subject.to_string()).or_default().is_active = true;
        log::debug!("{subject}: run started");
        self.notify(subject);
    }

    /// Like [`mark_start`](Self::mark_start), but ignored when a terminal
    /// event at or after `timestamp` has already been applied. Guards against
    /// a start overtaking the terminal event of the same run.
    pub fn mark_start_at(&self, subject: &str, timestamp: &str) -> bool {
        let applied = {
            let mut subjects = self.lock();
            let state = subjects.entry(subject.to_string()).or_default();
            match &state.finished_at {
                Some(finished) if finished.as_str() >= timestamp => false,
                _ => {
                    state.is_active = true;
                    true
                }
            }
        };
        if applied {
            log::debug!("{subject}: run started at {timestamp}");
            self.notify(subject);
        } else {
            log::debug!("{subject}: ignoring stale start at {timestamp}");
        }
        applied
    }

    /// End the subject's run.
    ///
    /// A failure records its entry in the error channel and keeps stdout and
    /// stderr for inspection. A success clears all three buffers. Either way
    /// the subject is no longer active.
    pub fn mark_terminal(&self, subject: &str, outcome: Outcome) {
        self.apply_terminal(subject, outcome, None);
    }

    /// [`mark_terminal`](Self::mark_terminal) with the backend timestamp of
    /// the terminal event, used to discard a start that arrives after it
    /// and, after a success, output lines of the finished run.
    pub fn mark_terminal_at(&self, subject: &str, outcome: Outcome, timestamp: &str) {
        self.apply_terminal(subject, outcome, Some(timestamp.to_string()));
    }

    fn apply_terminal(&self, subject: &str, outcome: Outcome, timestamp: Option<String>) {
        {
            let mut subjects = self.lock();
            let state = subjects.entry(subject.to_string()).or_default();
            state.is_active = false;
            if timestamp.is_some() {
                state.finished_at = timestamp.clone();
            }
            match outcome {
                Outcome::Success => {
                    state.cleared_through = timestamp;
                    state.clear_logs();
                    log::info!("{subject}: run succeeded");
                }
                Outcome::Failure(entry) => {
                    state.cleared_through = None;
                    log::info!("{subject}: run failed: {}", entry.message);
                    state.error.insert(entry);
                }
            }
        }
        self.notify(subject);
    }

    /// Discard everything known about `subject`, e.g. before a manual retry.
    pub fn reset(&self, subject: &str) {
        let removed = self.lock().remove(subject).is_some();
        if removed {
            log::debug!("{subject}: channel state reset");
            self.notify(subject);
        }
    }

    /// Copy of the subject's current state.
    pub fn snapshot(&self, subject: &str) -> Option<ChannelState> {
        self.lock().get(subject).cloned()
    }

    pub fn is_active(&self, subject: &str) -> bool {
        self.lock().get(subject).is_some_and(|s| s.is_active)
    }

    /// Subjects with any state, sorted.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.lock().keys().cloned().collect();
        subjects.sort();
        subjects
    }
}

impl Default for OrderedEventMerger {
    fn default() -> Self {
        Self::new()
    }
}
