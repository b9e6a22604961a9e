//! Drag-aware batching of viewport resizes.
//!
//! While the user drags a split-pane divider, every intermediate frame would
//! otherwise forward a resize to each visible session's backend. Panes instead
//! defer their resize until the drag ends and then flush exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Callback = Box<dyn FnOnce() + Send>;

struct DragState {
    dragging: bool,
    subscribers: Vec<(u64, Callback)>,
}

/// Shared resize signal for every session shown in one viewport.
pub struct ResizeCoordinator {
    state: Arc<Mutex<DragState>>,
    next_subscriber_id: AtomicU64,
}

/// Handle returned by [`ResizeCoordinator::subscribe`].
///
/// Dropping the handle does not deregister; call [`unsubscribe`](Self::unsubscribe).
pub struct ResizeSubscription {
    id: u64,
    state: Weak<Mutex<DragState>>,
}

impl ResizeSubscription {
    /// Deregister the callback. No-op if it already ran or was removed.
    pub fn unsubscribe(&self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl ResizeCoordinator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DragState {
                dragging: false,
                subscribers: Vec::new(),
            })),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Mark the start of a drag. Repeated starts are coalesced.
    pub fn on_drag_start(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.dragging {
            log::debug!("resize drag started");
        }
        state.dragging = true;
    }

    /// Mark the end of a drag and run every pending subscriber once.
    ///
    /// Subscribers are one-shot: they are removed before being invoked, and
    /// callbacks run without the internal lock held so they may subscribe
    /// again.
    pub fn on_drag_end(&self) {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.dragging = false;
            std::mem::take(&mut state.subscribers)
        };
        log::debug!("resize drag ended, flushing {} subscriber(s)", pending.len());
        for (_, callback) in pending {
            callback();
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).dragging
    }

    /// Register `callback` to run on the next drag end.
    pub fn subscribe<F>(&self, callback: F) -> ResizeSubscription
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.push_subscriber(&mut state, Box::new(callback))
    }

    /// Register `callback` only if a drag is in progress.
    ///
    /// The drag check and the registration happen under one lock, so a drag
    /// ending concurrently can never strand the callback. Returns `None` when
    /// not dragging; the caller should act immediately instead.
    pub fn subscribe_while_dragging<F>(&self, callback: F) -> Option<ResizeSubscription>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.dragging {
            return None;
        }
        Some(self.push_subscriber(&mut state, Box::new(callback)))
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }

    fn push_subscriber(&self, state: &mut DragState, callback: Callback) -> ResizeSubscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        state.subscribers.push((id, callback));
        ResizeSubscription {
            id,
            state: Arc::downgrade(&self.state),
        }
    }
}

impl Default for ResizeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
