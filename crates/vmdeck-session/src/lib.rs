//! vmdeck-session: long-lived interactive and log-tailing sessions per VM
//! instance.
//!
//! # Architecture
//!
//! - [`Transport`] / [`Connector`]: the duplex byte connection to the backend
//!   and the seam that establishes it. [`PtyConnector`] runs the instance CLI
//!   inside a pseudo-terminal.
//! - [`Session`]: one addressable connection. Survives view detach, replays
//!   its scrollback to a re-attached view, and guards every asynchronous
//!   completion with an epoch token.
//! - [`SessionRegistry`]: the single owner of sessions, keyed by id.
//! - [`ResizeCoordinator`]: suppresses per-frame resizes during a split-pane
//!   drag and flushes one resize per pane when the drag ends.

mod io_thread;
pub mod registry;
pub mod resize;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use registry::SessionRegistry;
pub use resize::{ResizeCoordinator, ResizeSubscription};
pub use session::{
    session_id, CleanupHandle, OutputSink, Session, SessionConfig, SessionId, SessionOutput,
    TransportState, DEFAULT_SCROLLBACK_BYTES,
};
pub use transport::{
    Connector, PtyConnector, PtyTransport, SessionKind, TermSize, Transport, TransportError,
};
