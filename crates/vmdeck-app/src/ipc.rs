//! Types exchanged with the UI layer.
//!
//! Session output reaches a view as `SessionEvent`s, serialized as tagged
//! JSON, over the channel the view passed when it opened the session.

use serde::Serialize;
use tokio::sync::mpsc;
use vmdeck_session::{Session, SessionKind, SessionOutput, TransportState};

/// Events sent from a session to the view displaying it.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Bytes from the backend, coalesced per pump tick.
    Output { data: Vec<u8> },
    StateChanged { state: String },
    /// Attach failure or similar; also written inline into the output.
    Error { message: String },
    /// The backend ended the session.
    Exited,
}

impl From<SessionOutput> for SessionEvent {
    fn from(output: SessionOutput) -> Self {
        match output {
            SessionOutput::Data(data) => SessionEvent::Output { data },
            SessionOutput::StateChanged(state) => SessionEvent::StateChanged {
                state: state_str(state).to_string(),
            },
            SessionOutput::Error(message) => SessionEvent::Error { message },
            SessionOutput::Exited => SessionEvent::Exited,
        }
    }
}

/// Where a view receives its events.
pub type ViewChannel = mpsc::UnboundedSender<SessionEvent>;

pub fn state_str(state: TransportState) -> &'static str {
    match state {
        TransportState::Unattached => "unattached",
        TransportState::Attaching => "attaching",
        TransportState::Attached => "attached",
        TransportState::Closed => "closed",
    }
}

pub fn parse_kind(kind: &str) -> Result<SessionKind, String> {
    match kind {
        "shell" => Ok(SessionKind::InteractiveShell),
        "logs" => Ok(SessionKind::LogTail),
        other => Err(format!("Unknown session kind: {other}")),
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct SessionInfo {
    pub id: String,
    pub subject: String,
    pub kind: String,
    pub state: String,
    pub cols: u16,
    pub rows: u16,
    pub has_view: bool,
    pub last_error: Option<String>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        let size = session.size();
        Self {
            id: session.id().to_string(),
            subject: session.subject().to_string(),
            kind: session.kind().as_str().to_string(),
            state: state_str(session.state()).to_string(),
            cols: size.cols,
            rows: size.rows,
            has_view: session.has_view(),
            last_error: session.last_error(),
        }
    }
}
