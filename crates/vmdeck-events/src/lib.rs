//! vmdeck-events: ordered, deduplicated log buffers fed by asynchronous
//! backend events.
//!
//! - [`OrderedEventMerger`]: per-subject channel buffers kept sorted by
//!   timestamp and unique by message id, plus the run's active flag.
//! - [`EventHub`]: in-process event feed, one broadcast channel per category.
//! - [`EventBridge`]: subscribes to a subject's events and applies them to the
//!   merger.
//! - [`CommandRunner`]: runs instance lifecycle commands and publishes their
//!   output into the hub.

pub mod bridge;
pub mod entry;
pub mod event;
pub mod hub;
pub mod merger;
pub mod runner;

pub use bridge::{BridgeAttachment, EventBridge};
pub use entry::{Channel, ChannelState, LogBuffer, LogEntry};
pub use event::{timestamp_now, BackendEvent, EventCategory, EventFeed, FeedError};
pub use hub::{EventHub, DEFAULT_HUB_CAPACITY};
pub use merger::{OrderedEventMerger, Outcome};
pub use runner::{CommandRunner, InstanceAction, DEFAULT_MAX_CONCURRENCY};
