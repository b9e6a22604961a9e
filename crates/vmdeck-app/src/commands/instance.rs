//! Commands for instance lifecycle runs and their merged log channels.

use rusqlite::Connection;
use vmdeck_db::runs::{self, Run, RunStatus};
use vmdeck_events::{ChannelState, InstanceAction};

use crate::state::AppState;

/// Run a database operation on the blocking pool.
async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|e| format!("db lock poisoned: {e}"))?;
        f(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("task join error: {e}"))?
}

/// Start merging `subject`'s backend events. Returns `false` if it was
/// already watched.
pub fn watch_instance(state: &AppState, subject: &str) -> Result<bool, String> {
    let mut attachments = state
        .attachments
        .lock()
        .map_err(|e| format!("Lock error: {e}"))?;
    if attachments.contains_key(subject) {
        return Ok(false);
    }
    attachments.insert(subject.to_string(), state.bridge.attach(subject));
    Ok(true)
}

/// Stop merging `subject`'s events. Buffers collected so far are kept.
pub fn unwatch_instance(state: &AppState, subject: &str) -> Result<bool, String> {
    let attachment = state
        .attachments
        .lock()
        .map_err(|e| format!("Lock error: {e}"))?
        .remove(subject);
    Ok(match attachment {
        Some(attachment) => {
            attachment.detach();
            true
        }
        None => false,
    })
}

/// Current buffers and activity for `subject`; empty if nothing arrived yet.
pub fn channel_snapshot(state: &AppState, subject: &str) -> Result<ChannelState, String> {
    Ok(state.merger.snapshot(subject).unwrap_or_default())
}

/// Clear `subject`'s buffers, e.g. before a manual retry.
pub fn reset_instance(state: &AppState, subject: &str) -> Result<(), String> {
    state.merger.reset(subject);
    Ok(())
}

/// Run a lifecycle action and record its outcome.
///
/// The subject is watched first so its output lands in the merged channels.
/// A command that runs but fails is not an error here: the returned run
/// carries the `failed` status and message.
pub async fn run_instance_action(
    state: &AppState,
    subject: String,
    action: String,
) -> Result<Run, String> {
    let action =
        InstanceAction::parse(&action).ok_or_else(|| format!("Unknown instance action: {action}"))?;
    watch_instance(state, &subject)?;

    let run_id = {
        let subject = subject.clone();
        with_db(state, move |conn| runs::create_run(conn, &subject, action.as_str())).await?
    };

    let result = state
        .runner
        .run_action(&state.config.cli_binary, action, &subject)
        .await;
    let (status, error) = match result {
        Ok(()) => (RunStatus::Succeeded, None),
        Err(message) => (RunStatus::Failed, Some(message)),
    };

    with_db(state, move |conn| {
        runs::finish_run(conn, run_id, status, error.as_deref())?;
        runs::get_run(conn, run_id)
    })
    .await?
    .ok_or_else(|| format!("Run {run_id} not found"))
}

/// Most recent recorded run for `subject`.
pub async fn last_run(state: &AppState, subject: String) -> Result<Option<Run>, String> {
    with_db(state, move |conn| runs::last_run(conn, &subject)).await
}
