//! Runs instance lifecycle commands and publishes their progress as events.
//!
//! Each run emits `start`, one `stdout`/`stderr` event per output line, and
//! finally `success` or `error`. Message ids are `{subject}:{run}:{seq}`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::event::{timestamp_now, BackendEvent, EventCategory};
use crate::hub::EventHub;

/// Default maximum number of concurrent lifecycle commands.
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

/// Lifecycle verbs understood by the instance CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceAction {
    Start,
    Stop,
    Restart,
    Suspend,
    Delete,
}

impl InstanceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceAction::Start => "start",
            InstanceAction::Stop => "stop",
            InstanceAction::Restart => "restart",
            InstanceAction::Suspend => "suspend",
            InstanceAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(InstanceAction::Start),
            "stop" => Some(InstanceAction::Stop),
            "restart" => Some(InstanceAction::Restart),
            "suspend" => Some(InstanceAction::Suspend),
            "delete" => Some(InstanceAction::Delete),
            _ => None,
        }
    }
}

/// Build `<cli> <action> <subject>`.
pub fn build_command(cli_binary: &str, action: InstanceAction, subject: &str) -> Command {
    let mut cmd = Command::new(cli_binary);
    cmd.args([action.as_str(), subject]);
    cmd
}

/// One output line as text. Invalid UTF-8 is replaced, never fatal.
fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8_lossy(&raw).into_owned()
}

fn last_line(s: &str) -> &str {
    s.lines().last().unwrap_or(s).trim()
}

struct Publisher {
    hub: Arc<EventHub>,
    subject: String,
    run: u64,
    seq: AtomicU64,
}

impl Publisher {
    fn emit(&self, category: EventCategory, payload: &str) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = BackendEvent::new(
            &self.subject,
            category,
            format!("{}:{}:{seq}", self.subject, self.run),
            timestamp_now(),
            payload,
        );
        if let Err(e) = self.hub.publish(event) {
            log::debug!("{}: dropping {category} event: {e}", self.subject);
        }
    }
}

pub struct CommandRunner {
    hub: Arc<EventHub>,
    semaphore: Arc<Semaphore>,
    next_run: AtomicU64,
}

impl CommandRunner {
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self::with_concurrency(hub, DEFAULT_MAX_CONCURRENCY)
    }

    pub fn with_concurrency(hub: Arc<EventHub>, max_concurrency: usize) -> Self {
        Self::with_semaphore(hub, Arc::new(Semaphore::new(max_concurrency.max(1))))
    }

    /// Create a runner that shares an existing semaphore.
    pub fn with_semaphore(hub: Arc<EventHub>, semaphore: Arc<Semaphore>) -> Self {
        Self {
            hub,
            semaphore,
            next_run: AtomicU64::new(1),
        }
    }

    pub fn semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }

    /// Run a lifecycle action of the instance CLI against `subject`.
    pub async fn run_action(
        &self,
        cli_binary: &str,
        action: InstanceAction,
        subject: &str,
    ) -> Result<(), String> {
        self.run(subject, build_command(cli_binary, action, subject))
            .await
    }

    /// Run `cmd` on behalf of `subject`, publishing its output as events.
    ///
    /// Returns the failure message when the command cannot be spawned or
    /// exits unsuccessfully; the same message is published as the `error`
    /// event.
    pub async fn run(&self, subject: &str, mut cmd: Command) -> Result<(), String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| format!("semaphore closed: {e}"))?;

        let program = cmd.as_std().get_program().to_string_lossy().to_string();
        let publisher = Arc::new(Publisher {
            hub: Arc::clone(&self.hub),
            subject: subject.to_string(),
            run: self.next_run.fetch_add(1, Ordering::Relaxed),
            seq: AtomicU64::new(0),
        });

        log::info!("{subject}: running {program} (run {})", publisher.run);
        publisher.emit(EventCategory::Start, &format!("running {program}"));

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to spawn {program}: {e}");
                publisher.emit(EventCategory::Error, &message);
                return Err(message);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_publisher = Arc::clone(&publisher);
        let stderr_task = tokio::spawn(async move {
            let mut last = String::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).split(b'\n');
                while let Ok(Some(raw)) = lines.next_segment().await {
                    let line = decode_line(raw);
                    stderr_publisher.emit(EventCategory::Stderr, &line);
                    last = line;
                }
            }
            last
        });

        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).split(b'\n');
            while let Ok(Some(raw)) = lines.next_segment().await {
                publisher.emit(EventCategory::Stdout, &decode_line(raw));
            }
        }

        let last_stderr = stderr_task.await.unwrap_or_default();
        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                let message = format!("failed to wait for {program}: {e}");
                publisher.emit(EventCategory::Error, &message);
                return Err(message);
            }
        };

        if status.success() {
            publisher.emit(EventCategory::Success, "completed");
            return Ok(());
        }

        let code = status
            .code()
            .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
        let message = if last_stderr.is_empty() {
            format!("{program} exited with {code}")
        } else {
            format!("{program} exited with {code}: {}", last_line(&last_stderr))
        };
        publisher.emit(EventCategory::Error, &message);
        Err(message)
    }
}
