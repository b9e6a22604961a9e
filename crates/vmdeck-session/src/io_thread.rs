//! Per-session I/O thread that drains the transport into the session output.
//!
//! Transport reads are blocking, so every attached session gets its own OS
//! thread. The thread holds only a weak reference and the attach epoch: once
//! the session is disposed (or re-attached under a newer epoch) the thread
//! stops delivering bytes and exits on the next read.

use std::io::{ErrorKind, Read};
use std::sync::{Arc, Weak};

use crate::session::Session;

/// Start the read loop for `session` on a dedicated OS thread.
pub(crate) fn start_io_thread(
    session: &Arc<Session>,
    epoch: u64,
    reader: Box<dyn Read + Send>,
) -> std::io::Result<()> {
    let weak = Arc::downgrade(session);
    std::thread::Builder::new()
        .name(format!("session-io-{}", session.id()))
        .spawn(move || io_loop(weak, epoch, reader))?;
    Ok(())
}

fn io_loop(session: Weak<Session>, epoch: u64, mut reader: Box<dyn Read + Send>) {
    let mut buf = [0u8; 65536];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // EIO once the child side of a PTY has gone away.
            Err(_) => break,
        };

        let Some(session) = session.upgrade() else {
            return;
        };
        if !session.push_output(epoch, &buf[..n]) {
            return;
        }
    }

    if let Some(session) = session.upgrade() {
        session.mark_exited(epoch);
    }
}
