//! vmdeck-app: the facade the UI layer talks to.
//!
//! [`AppState`] wires the session registry, the resize coordinator, the
//! event bridge and merger, the lifecycle command runner, and the settings
//! database together. The functions in [`commands`] are the only entry points
//! a UI needs.

pub mod commands;
pub mod config;
pub mod ipc;
mod output_pump;
pub mod state;

pub use config::EngineConfig;
pub use ipc::{SessionEvent, SessionInfo, ViewChannel};
pub use state::AppState;

use std::path::Path;

/// Open the database at `path`, mark runs cut short by a previous exit as
/// failed, and build the app state from its settings.
pub fn open(path: &Path) -> Result<AppState, String> {
    let db = vmdeck_db::open(path).map_err(|e| format!("Failed to open database: {e}"))?;
    let interrupted = vmdeck_db::runs::fail_interrupted_runs(&db)
        .map_err(|e| format!("Failed to recover runs: {e}"))?;
    if interrupted > 0 {
        log::warn!("marked {interrupted} interrupted run(s) as failed");
    }
    AppState::new(db)
}
