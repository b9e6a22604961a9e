//! Application state shared between commands, session I/O, and output pumps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use vmdeck_events::{BridgeAttachment, CommandRunner, EventBridge, EventHub, OrderedEventMerger};
use vmdeck_session::{Connector, ResizeCoordinator, SessionRegistry};

use crate::config::EngineConfig;

/// Global app state handed to every command.
pub struct AppState {
    /// Every live session, keyed by `{subject}-{kind}`.
    pub registry: SessionRegistry,
    /// Shared split-pane drag state.
    pub coordinator: ResizeCoordinator,
    /// Starts transports for new sessions.
    pub connector: Arc<dyn Connector>,
    /// In-process backend event feed; the runner publishes into it.
    pub hub: Arc<EventHub>,
    pub merger: Arc<OrderedEventMerger>,
    pub bridge: EventBridge,
    /// Watched subjects and their bridge subscriptions.
    pub attachments: Mutex<HashMap<String, BridgeAttachment>>,
    pub runner: CommandRunner,
    /// Shared database connection.
    pub db: Arc<Mutex<Connection>>,
    pub config: EngineConfig,
}

impl AppState {
    /// Load settings from `db` and connect sessions through the instance CLI.
    pub fn new(db: Connection) -> Result<Self, String> {
        let config = EngineConfig::load(&db).map_err(|e| format!("Failed to load settings: {e}"))?;
        let connector = Arc::new(config.connector());
        Ok(Self::with_connector(db, config, connector))
    }

    pub fn with_connector(
        db: Connection,
        config: EngineConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let hub = Arc::new(EventHub::default());
        let merger = Arc::new(OrderedEventMerger::new());
        let bridge = EventBridge::new(hub.clone(), merger.clone());
        let runner = CommandRunner::with_concurrency(hub.clone(), config.max_concurrency);

        Self {
            registry: SessionRegistry::new(),
            coordinator: ResizeCoordinator::new(),
            connector,
            hub,
            merger,
            bridge,
            attachments: Mutex::new(HashMap::new()),
            runner,
            db: Arc::new(Mutex::new(db)),
            config,
        }
    }

    /// Dispose every session, drop every watch, and close the event feed.
    pub fn shutdown(&self) {
        let sessions = self.registry.dispose_all();
        let attachments: Vec<BridgeAttachment> = self
            .attachments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, attachment)| attachment)
            .collect();
        for attachment in &attachments {
            attachment.detach();
        }
        self.hub.shutdown();
        log::info!(
            "shut down: {sessions} session(s), {} watch(es)",
            attachments.len()
        );
    }
}
