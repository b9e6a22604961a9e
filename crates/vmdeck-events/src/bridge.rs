//! Adapts backend events for one subject into merger calls.
//!
//! Each attachment opens one subscription per category and forwards the
//! subject's events on its own task. Detaching flips a guarded liveness flag
//! before aborting the tasks, so nothing is applied to the merger once
//! `detach` has returned, even if a task was mid-delivery.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::entry::{Channel, LogEntry};
use crate::event::{timestamp_now, BackendEvent, EventCategory, EventFeed};
use crate::merger::{OrderedEventMerger, Outcome};

pub struct EventBridge {
    feed: Arc<dyn EventFeed>,
    merger: Arc<OrderedEventMerger>,
}

impl EventBridge {
    pub fn new(feed: Arc<dyn EventFeed>, merger: Arc<OrderedEventMerger>) -> Self {
        Self { feed, merger }
    }

    pub fn merger(&self) -> &Arc<OrderedEventMerger> {
        &self.merger
    }

    /// Start forwarding `subject`'s events. Must be called inside a tokio
    /// runtime.
    ///
    /// A category that cannot be subscribed to does not fail the attach: the
    /// subject is marked as failed with a synthetic error entry so observers
    /// reach a terminal state instead of waiting forever.
    pub fn attach(&self, subject: &str) -> BridgeAttachment {
        let live = Arc::new(Mutex::new(true));
        let mut tasks = Vec::with_capacity(EventCategory::ALL.len());

        for category in EventCategory::ALL {
            match self.feed.subscribe(category) {
                Ok(rx) => {
                    tasks.push(tokio::spawn(forward_events(
                        subject.to_string(),
                        rx,
                        Arc::clone(&self.merger),
                        Arc::clone(&live),
                    )));
                }
                Err(e) => {
                    log::warn!("{subject}: failed to subscribe to {category} events: {e}");
                    let entry = LogEntry::new(
                        format!("{subject}:subscribe-failed"),
                        format!("failed to subscribe to {category} events: {e}"),
                        timestamp_now(),
                    );
                    with_live(&live, || {
                        self.merger.mark_terminal(subject, Outcome::Failure(entry));
                    });
                }
            }
        }

        log::debug!("{subject}: bridge attached with {} subscription(s)", tasks.len());
        BridgeAttachment {
            subject: subject.to_string(),
            live,
            tasks: Mutex::new(tasks),
        }
    }
}

/// Live subscriptions for one subject. Dropping it detaches.
pub struct BridgeAttachment {
    subject: String,
    live: Arc<Mutex<bool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeAttachment {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_attached(&self) -> bool {
        *self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancel every subscription. Safe to call more than once.
    pub fn detach(&self) {
        {
            let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
            if !*live {
                return;
            }
            *live = false;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        log::debug!("{}: bridge detached", self.subject);
    }
}

impl Drop for BridgeAttachment {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Run `apply` only while the attachment is live, holding the flag so a
/// concurrent detach waits for it to finish.
fn with_live(live: &Mutex<bool>, apply: impl FnOnce()) -> bool {
    let guard = live.lock().unwrap_or_else(|e| e.into_inner());
    if !*guard {
        return false;
    }
    apply();
    true
}

async fn forward_events(
    subject: String,
    mut rx: broadcast::Receiver<BackendEvent>,
    merger: Arc<OrderedEventMerger>,
    live: Arc<Mutex<bool>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if event.subject != subject {
                    continue;
                }
                if !with_live(&live, || dispatch(&merger, event)) {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("{subject}: event receiver lagged, {skipped} event(s) skipped");
                // A skipped terminal event would leave the run active forever.
                let applied = with_live(&live, || {
                    if merger.is_active(&subject) {
                        let ts = timestamp_now();
                        let entry = LogEntry::new(
                            format!("{subject}:lagged:{ts}"),
                            format!("{skipped} backend event(s) were lost; run outcome unknown"),
                            ts,
                        );
                        merger.mark_terminal(&subject, Outcome::Failure(entry));
                    }
                });
                if !applied {
                    return;
                }
            }
            Err(RecvError::Closed) => {
                with_live(&live, || {
                    if merger.is_active(&subject) {
                        let entry = LogEntry::new(
                            format!("{subject}:feed-closed"),
                            "event feed closed before the run finished",
                            timestamp_now(),
                        );
                        merger.mark_terminal(&subject, Outcome::Failure(entry));
                    }
                });
                return;
            }
        }
    }
}

fn dispatch(merger: &OrderedEventMerger, event: BackendEvent) {
    let subject = event.subject.as_str();
    match event.category {
        EventCategory::Start => {
            merger.mark_start_at(subject, &event.timestamp);
        }
        EventCategory::Progress | EventCategory::Stdout => {
            merger.insert(subject, Channel::Stdout, event.to_entry());
        }
        EventCategory::Stderr => {
            merger.insert(subject, Channel::Stderr, event.to_entry());
        }
        EventCategory::Error => {
            merger.mark_terminal_at(subject, Outcome::Failure(event.to_entry()), &event.timestamp);
        }
        EventCategory::Success => {
            merger.mark_terminal_at(subject, Outcome::Success, &event.timestamp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FeedError;
    use crate::hub::EventHub;
    use std::time::Duration;

    struct UnreachableFeed;

    impl EventFeed for UnreachableFeed {
        fn subscribe(
            &self,
            _category: EventCategory,
        ) -> Result<broadcast::Receiver<BackendEvent>, FeedError> {
            Err(FeedError::Unreachable("connection refused".to_string()))
        }
    }

    fn event(subject: &str, category: EventCategory, id: &str, ts: &str) -> BackendEvent {
        BackendEvent::new(subject, category, id, ts, format!("{category} {id}"))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn setup() -> (Arc<EventHub>, Arc<OrderedEventMerger>, EventBridge) {
        setup_with_capacity(crate::hub::DEFAULT_HUB_CAPACITY)
    }

    fn setup_with_capacity(
        capacity: usize,
    ) -> (Arc<EventHub>, Arc<OrderedEventMerger>, EventBridge) {
        let hub = Arc::new(EventHub::new(capacity));
        let merger = Arc::new(OrderedEventMerger::new());
        let bridge = EventBridge::new(hub.clone(), merger.clone());
        (hub, merger, bridge)
    }

    #[tokio::test]
    async fn test_events_are_merged_for_subject() {
        let (hub, merger, bridge) = setup();
        let _attachment = bridge.attach("vm1");

        hub.publish(event("vm1", EventCategory::Start, "s", "01")).unwrap();
        hub.publish(event("vm1", EventCategory::Stdout, "b", "03")).unwrap();
        hub.publish(event("vm1", EventCategory::Progress, "a", "02")).unwrap();
        hub.publish(event("vm1", EventCategory::Stderr, "c", "04")).unwrap();
        hub.publish(event("vm2", EventCategory::Stdout, "x", "05")).unwrap();

        wait_for(|| {
            merger
                .snapshot("vm1")
                .is_some_and(|s| s.is_active && s.stdout.len() == 2 && s.stderr.len() == 1)
        })
        .await;

        let state = merger.snapshot("vm1").unwrap();
        let ids: Vec<&str> = state.stdout.ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(merger.snapshot("vm2").is_none());
    }

    #[tokio::test]
    async fn test_error_event_is_terminal() {
        let (hub, merger, bridge) = setup();
        let _attachment = bridge.attach("vm1");

        hub.publish(event("vm1", EventCategory::Start, "s", "01")).unwrap();
        wait_for(|| merger.is_active("vm1")).await;
        hub.publish(event("vm1", EventCategory::Error, "e", "02")).unwrap();

        wait_for(|| merger.snapshot("vm1").is_some_and(|s| s.error.len() == 1)).await;
        assert!(!merger.is_active("vm1"));
    }

    #[tokio::test]
    async fn test_success_event_clears_logs() {
        let (hub, merger, bridge) = setup();
        let _attachment = bridge.attach("vm1");

        hub.publish(event("vm1", EventCategory::Start, "s", "01")).unwrap();
        hub.publish(event("vm1", EventCategory::Stdout, "o", "02")).unwrap();
        wait_for(|| merger.snapshot("vm1").is_some_and(|s| s.stdout.len() == 1)).await;

        hub.publish(event("vm1", EventCategory::Success, "ok", "03")).unwrap();
        wait_for(|| merger.snapshot("vm1").is_some_and(|s| s.stdout.is_empty())).await;
        assert!(!merger.is_active("vm1"));
    }

    #[tokio::test]
    async fn test_output_delivered_after_success_stays_cleared() {
        let (hub, merger, bridge) = setup();
        let _attachment = bridge.attach("vm1");

        hub.publish(event("vm1", EventCategory::Start, "s", "01")).unwrap();
        hub.publish(event("vm1", EventCategory::Success, "ok", "30")).unwrap();
        wait_for(|| merger.snapshot("vm1").is_some_and(|s| s.finished_at.is_some())).await;

        // The run's last line shows up after its success; the next run's
        // line does not.
        hub.publish(event("vm1", EventCategory::Stdout, "late", "20")).unwrap();
        hub.publish(event("vm1", EventCategory::Stdout, "next", "40")).unwrap();
        wait_for(|| merger.snapshot("vm1").is_some_and(|s| s.stdout.len() == 1)).await;

        let state = merger.snapshot("vm1").unwrap();
        assert!(!state.is_active);
        assert_eq!(state.stdout.ids().collect::<Vec<_>>(), vec!["next"]);
    }

    #[tokio::test]
    async fn test_lagged_receiver_fails_active_run() {
        let (hub, merger, bridge) = setup_with_capacity(1);
        let _attachment = bridge.attach("vm1");

        hub.publish(event("vm1", EventCategory::Start, "s", "01")).unwrap();
        wait_for(|| merger.is_active("vm1")).await;

        // No await in between: the stdout receiver falls behind.
        for (id, ts) in [("1", "02"), ("2", "03"), ("3", "04")] {
            hub.publish(event("vm1", EventCategory::Stdout, id, ts)).unwrap();
        }

        wait_for(|| !merger.is_active("vm1")).await;
        let state = merger.snapshot("vm1").unwrap();
        assert_eq!(state.error.len(), 1);
        assert!(state.error.entries()[0].id.starts_with("vm1:lagged:"));
    }

    #[tokio::test]
    async fn test_subscription_failure_reaches_terminal_state() {
        let merger = Arc::new(OrderedEventMerger::new());
        let bridge = EventBridge::new(Arc::new(UnreachableFeed), merger.clone());
        merger.mark_start("vm1");

        let attachment = bridge.attach("vm1");

        let state = merger.snapshot("vm1").unwrap();
        assert!(!state.is_active);
        assert_eq!(state.error.len(), 1);
        let message = &state.error.entries()[0].message;
        assert!(message.contains("connection refused"), "unexpected: {message}");
        attachment.detach();
    }

    #[tokio::test]
    async fn test_detach_stops_delivery() {
        let (hub, merger, bridge) = setup();
        let attachment = bridge.attach("vm1");

        hub.publish(event("vm1", EventCategory::Stdout, "1", "01")).unwrap();
        wait_for(|| merger.snapshot("vm1").is_some_and(|s| s.stdout.len() == 1)).await;

        attachment.detach();
        attachment.detach();
        assert!(!attachment.is_attached());

        hub.publish(event("vm1", EventCategory::Stdout, "2", "02")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(merger.snapshot("vm1").unwrap().stdout.len(), 1);
    }

    #[tokio::test]
    async fn test_feed_shutdown_fails_active_run() {
        let (hub, merger, bridge) = setup();
        let _attachment = bridge.attach("vm1");

        hub.publish(event("vm1", EventCategory::Start, "s", "01")).unwrap();
        wait_for(|| merger.is_active("vm1")).await;

        hub.shutdown();
        wait_for(|| !merger.is_active("vm1")).await;

        let state = merger.snapshot("vm1").unwrap();
        assert_eq!(state.error.len(), 1);
        assert!(state.error.contains("vm1:feed-closed"));
    }
}
