//! Split-pane drag gesture.
//!
//! While a drag is in progress, `resize_session` calls are held back and each
//! session's latest size is forwarded once when the drag ends.

use crate::state::AppState;

pub fn drag_start(state: &AppState) -> Result<(), String> {
    state.coordinator.on_drag_start();
    Ok(())
}

pub fn drag_end(state: &AppState) -> Result<(), String> {
    state.coordinator.on_drag_end();
    Ok(())
}
