use std::ffi::OsString;
use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

/// Errors from transport operations.
#[derive(Debug)]
pub enum TransportError {
    SpawnFailed(String),
    IoError(std::io::Error),
    ResizeFailed(String),
    /// The transport is not attached, or it has already been torn down.
    Closed,
    /// The operation was superseded before it completed.
    Cancelled,
    /// The owning session was disposed.
    Disposed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::SpawnFailed(msg) => write!(f, "transport spawn failed: {msg}"),
            TransportError::IoError(err) => write!(f, "transport I/O error: {err}"),
            TransportError::ResizeFailed(msg) => write!(f, "transport resize failed: {msg}"),
            TransportError::Closed => write!(f, "transport is closed"),
            TransportError::Cancelled => write!(f, "operation cancelled"),
            TransportError::Disposed => write!(f, "session was disposed"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::IoError(err)
    }
}

/// What a session is connected to on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    InteractiveShell,
    LogTail,
}

impl SessionKind {
    pub const ALL: [SessionKind; 2] = [SessionKind::InteractiveShell, SessionKind::LogTail];

    /// Short name used as the purpose suffix in session ids.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::InteractiveShell => "shell",
            SessionKind::LogTail => "logs",
        }
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// A duplex byte connection backing a session.
pub trait Transport: Send {
    /// Send input bytes to the backend.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Forward new viewport dimensions to the backend.
    fn resize(&mut self, size: TermSize) -> Result<(), TransportError>;

    /// Hand out the read half for a dedicated reader thread.
    ///
    /// Returns `None` once the reader has been taken.
    fn take_reader(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Tear the connection down. Calling this more than once is harmless.
    fn close(&mut self);
}

/// Establishes transports for a subject.
///
/// `connect` may block for as long as the backend handshake takes; callers run
/// it off the async runtime.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        subject: &str,
        kind: SessionKind,
        size: TermSize,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Owns a portable-pty child process, master pair, reader, and writer.
pub struct PtyTransport {
    master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    closed: bool,
}

impl PtyTransport {
    /// Spawn `cmd` inside a new PTY with the given dimensions.
    pub fn spawn(cmd: CommandBuilder, size: TermSize) -> Result<Self, TransportError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(size))
            .map_err(|e| TransportError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TransportError::SpawnFailed(format!("failed to spawn command: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TransportError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TransportError::SpawnFailed(format!("failed to take writer: {e}")))?;

        Ok(Self {
            master: pair.master,
            reader: Some(reader),
            writer,
            child,
            closed: false,
        })
    }

    /// Get the child process exit status if it has exited.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }
}

impl Transport for PtyTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, size: TermSize) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.master
            .resize(pty_size(size))
            .map_err(|e| TransportError::ResizeFailed(format!("{e}")))
    }

    fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.try_wait().is_none() {
            if let Err(e) = self.child.kill() {
                log::debug!("failed to kill transport child: {e}");
            }
            // Reap if it already went away; never block here.
            let _ = self.child.try_wait();
        }
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Placeholder replaced by the subject identifier in argument templates.
pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Starts sessions by running the instance-management CLI inside a PTY.
///
/// Interactive shells run `<cli> shell <subject>`; log tails follow the
/// instance journal through `<cli> exec`.
#[derive(Debug, Clone)]
pub struct PtyConnector {
    cli_binary: String,
    shell_args: Vec<String>,
    log_args: Vec<String>,
}

impl PtyConnector {
    pub fn new(cli_binary: impl Into<String>) -> Self {
        Self {
            cli_binary: cli_binary.into(),
            shell_args: vec!["shell".to_string(), SUBJECT_PLACEHOLDER.to_string()],
            log_args: [
                "exec",
                SUBJECT_PLACEHOLDER,
                "--",
                "journalctl",
                "--follow",
                "--no-pager",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    /// Override the argument template for interactive shells.
    pub fn with_shell_args(mut self, args: Vec<String>) -> Self {
        self.shell_args = args;
        self
    }

    /// Override the argument template for log tails.
    pub fn with_log_args(mut self, args: Vec<String>) -> Self {
        self.log_args = args;
        self
    }

    /// Full argv for a session, placeholders expanded.
    pub fn argv(&self, subject: &str, kind: SessionKind) -> Vec<String> {
        let template = match kind {
            SessionKind::InteractiveShell => &self.shell_args,
            SessionKind::LogTail => &self.log_args,
        };
        std::iter::once(self.cli_binary.clone())
            .chain(
                template
                    .iter()
                    .map(|arg| arg.replace(SUBJECT_PLACEHOLDER, subject)),
            )
            .collect()
    }
}

impl Connector for PtyConnector {
    fn connect(
        &self,
        subject: &str,
        kind: SessionKind,
        size: TermSize,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let argv: Vec<OsString> = self
            .argv(subject, kind)
            .into_iter()
            .map(OsString::from)
            .collect();
        let cmd = CommandBuilder::from_argv(argv);
        let transport = PtyTransport::spawn(cmd, size)?;
        Ok(Box::new(transport))
    }
}
