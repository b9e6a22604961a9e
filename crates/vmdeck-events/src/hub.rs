use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::event::{BackendEvent, EventCategory, EventFeed, FeedError};

/// Default per-category buffer before slow receivers start lagging.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

type Senders = HashMap<EventCategory, broadcast::Sender<BackendEvent>>;

/// In-process event feed: one broadcast channel per category.
///
/// Backend adapters publish into the hub; bridges subscribe to it. After
/// [`shutdown`](Self::shutdown) live receivers see the channel close and new
/// subscriptions fail.
pub struct EventHub {
    senders: Mutex<Option<Senders>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let senders = EventCategory::ALL
            .iter()
            .map(|&category| (category, broadcast::channel(capacity.max(1)).0))
            .collect();
        Self {
            senders: Mutex::new(Some(senders)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Senders>> {
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver `event` to every subscriber of its category.
    ///
    /// Returns the number of receivers that got it.
    pub fn publish(&self, event: BackendEvent) -> Result<usize, FeedError> {
        let sender = {
            let senders = self.lock();
            let senders = senders.as_ref().ok_or(FeedError::Closed)?;
            senders.get(&event.category).cloned()
        };
        match sender {
            // Nobody listening is not an error for a broadcast feed.
            Some(sender) => Ok(sender.send(event).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Close every channel.
    pub fn shutdown(&self) {
        if self.lock().take().is_some() {
            log::debug!("event hub shut down");
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl EventFeed for EventHub {
    fn subscribe(
        &self,
        category: EventCategory,
    ) -> Result<broadcast::Receiver<BackendEvent>, FeedError> {
        let senders = self.lock();
        let senders = senders
            .as_ref()
            .ok_or_else(|| FeedError::Unreachable("event hub is shut down".to_string()))?;
        senders
            .get(&category)
            .map(|sender| sender.subscribe())
            .ok_or_else(|| FeedError::Unreachable(format!("no channel for {category}")))
    }
}
