//! Commands for interactive-shell and log-tail sessions.

use std::sync::Arc;

use tokio::sync::mpsc;
use vmdeck_session::{session_id, Session, SessionConfig, TermSize, TransportError};

use crate::ipc::{parse_kind, SessionInfo, ViewChannel};
use crate::output_pump::start_output_pump;
use crate::state::AppState;

fn lookup(state: &AppState, session_id: &str) -> Result<Arc<Session>, String> {
    state
        .registry
        .get(session_id)
        .ok_or_else(|| format!("Session {session_id} not found"))
}

/// Open (or re-open) the `kind` session for `subject` and show it in `channel`.
///
/// The session is created on first use and reused afterwards, so a view that
/// comes back gets the same connection and its scrollback. A session whose
/// attach failed or whose backend exited stays `closed`; close it to retry.
pub async fn open_session(
    state: &AppState,
    subject: String,
    kind: String,
    cols: Option<u16>,
    rows: Option<u16>,
    channel: ViewChannel,
) -> Result<SessionInfo, String> {
    if subject.is_empty() {
        return Err("Subject must not be empty".to_string());
    }
    let kind = parse_kind(&kind)?;
    let id = session_id(&subject, kind);
    let requested = match (cols, rows) {
        (Some(cols), Some(rows)) => Some(TermSize::new(cols, rows)),
        _ => None,
    };

    let config = SessionConfig::new(subject, kind)
        .with_size(requested.unwrap_or(state.config.default_size))
        .with_scrollback(state.config.scrollback_bytes);
    let session = state.registry.get_or_create(&id, config);

    if let Some(size) = requested {
        if session.size() != size {
            session
                .resize(size)
                .map_err(|e| format!("Resize error: {e}"))?;
        }
    }

    let (sink, output) = mpsc::unbounded_channel();
    session.attach_view(sink);
    session.add_cleanup(start_output_pump(output, channel));

    match session.attach(Arc::clone(&state.connector)).await {
        Ok(()) | Err(TransportError::Closed) => {}
        Err(e) => return Err(format!("Failed to attach session {id}: {e}")),
    }

    Ok(SessionInfo::from(session.as_ref()))
}

/// Write user input bytes to a session.
pub fn write_input(state: &AppState, session_id: &str, data: &[u8]) -> Result<(), String> {
    lookup(state, session_id)?
        .write_input(data)
        .map_err(|e| format!("Write error: {e}"))
}

/// Resize from a split-pane drag; deferred while the drag is in progress.
pub fn resize_session(
    state: &AppState,
    session_id: &str,
    cols: u16,
    rows: u16,
) -> Result<(), String> {
    lookup(state, session_id)?
        .request_resize(&state.coordinator, TermSize::new(cols, rows))
        .map_err(|e| format!("Resize error: {e}"))
}

/// Resize after a single pane's layout reflow; always immediate.
pub fn reflow_session(
    state: &AppState,
    session_id: &str,
    cols: u16,
    rows: u16,
) -> Result<(), String> {
    lookup(state, session_id)?
        .resize(TermSize::new(cols, rows))
        .map_err(|e| format!("Resize error: {e}"))
}

/// Stop showing a session. The connection stays up.
pub fn detach_view(state: &AppState, session_id: &str) -> Result<(), String> {
    lookup(state, session_id)?.detach_view();
    Ok(())
}

/// Dispose a session. Returns whether it existed.
pub fn close_session(state: &AppState, session_id: &str) -> Result<bool, String> {
    Ok(state.registry.dispose(session_id))
}

/// Tear down everything belonging to `subject`: all of its sessions and its
/// event watch. Returns the number of sessions disposed.
pub fn close_instance_sessions(state: &AppState, subject: &str) -> Result<usize, String> {
    let disposed = state.registry.dispose_subject(subject);
    let attachment = state
        .attachments
        .lock()
        .map_err(|e| format!("Lock error: {e}"))?
        .remove(subject);
    if let Some(attachment) = attachment {
        attachment.detach();
    }
    log::debug!("{subject}: closed {disposed} session(s)");
    Ok(disposed)
}

pub fn list_sessions(state: &AppState) -> Result<Vec<SessionInfo>, String> {
    Ok(state
        .registry
        .list_sessions()
        .iter()
        .filter_map(|id| state.registry.get(id))
        .map(|session| SessionInfo::from(session.as_ref()))
        .collect())
}

pub fn session_info(state: &AppState, session_id: &str) -> Result<SessionInfo, String> {
    lookup(state, session_id).map(|session| SessionInfo::from(session.as_ref()))
}
