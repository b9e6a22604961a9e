//! Forwards a session's output to its view.
//!
//! Each attached view gets a pump task. Data chunks arriving within one tick
//! are coalesced into a single `Output` event so a chatty backend does not
//! flood the UI. State changes and errors keep their position relative to
//! the data around them.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use vmdeck_session::SessionOutput;

use crate::ipc::{SessionEvent, ViewChannel};

/// ~60Hz
const TICK: Duration = Duration::from_micros(16_667);

/// Start a pump from `output` to `view`.
///
/// Stops when the session drops its sink (view detached or replaced, session
/// disposed), when the session exits, or when the view goes away.
pub fn start_output_pump(
    mut output: mpsc::UnboundedReceiver<SessionOutput>,
    view: ViewChannel,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Idle until the session produces something.
            let first = tokio::select! {
                msg = output.recv() => msg,
                _ = view.closed() => return,
            };
            let Some(first) = first else {
                return;
            };

            let mut batch = Batch::default();
            batch.push(first);
            interval.tick().await;
            let open = batch.drain(&mut output);

            for event in batch.finish() {
                let is_exited = matches!(event, SessionEvent::Exited);
                if view.send(event).is_err() || is_exited {
                    return;
                }
            }
            if !open {
                return;
            }
        }
    })
}

#[derive(Default)]
struct Batch {
    events: Vec<SessionEvent>,
    data: Vec<u8>,
}

impl Batch {
    fn push(&mut self, output: SessionOutput) {
        match output {
            SessionOutput::Data(chunk) => self.data.extend_from_slice(&chunk),
            other => {
                self.flush_data();
                self.events.push(other.into());
            }
        }
    }

    /// Take everything queued right now. Returns whether the sender is alive.
    fn drain(&mut self, output: &mut mpsc::UnboundedReceiver<SessionOutput>) -> bool {
        loop {
            match output.try_recv() {
                Ok(msg) => self.push(msg),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn flush_data(&mut self) {
        if !self.data.is_empty() {
            self.events.push(SessionEvent::Output {
                data: std::mem::take(&mut self.data),
            });
        }
    }

    fn finish(mut self) -> Vec<SessionEvent> {
        self.flush_data();
        self.events
    }
}
