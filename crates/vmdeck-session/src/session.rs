use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::io_thread::start_io_thread;
use crate::resize::{ResizeCoordinator, ResizeSubscription};
use crate::transport::{Connector, SessionKind, TermSize, Transport, TransportError};

/// Registry key of a session, conventionally `{subject}-{purpose}`.
pub type SessionId = String;

/// Build the conventional id for a subject's session of the given kind.
pub fn session_id(subject: &str, kind: SessionKind) -> SessionId {
    format!("{subject}-{}", kind.as_str())
}

/// Default size of the replay buffer kept across view detach/reattach.
pub const DEFAULT_SCROLLBACK_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unattached,
    Attaching,
    Attached,
    Closed,
}

/// Everything a view receives from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    Data(Vec<u8>),
    StateChanged(TransportState),
    Error(String),
    Exited,
}

/// Where a visible view receives session output.
pub type OutputSink = mpsc::UnboundedSender<SessionOutput>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub subject: String,
    pub kind: SessionKind,
    pub size: TermSize,
    pub scrollback_bytes: usize,
}

impl SessionConfig {
    pub fn new(subject: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            subject: subject.into(),
            kind,
            size: TermSize::default(),
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
        }
    }

    pub fn with_size(mut self, size: TermSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_scrollback(mut self, bytes: usize) -> Self {
        self.scrollback_bytes = bytes;
        self
    }
}

/// A resource owned by a session and released when it is disposed.
pub enum CleanupHandle {
    Task(JoinHandle<()>),
    Callback(Box<dyn FnOnce() + Send>),
}

impl CleanupHandle {
    fn is_finished(&self) -> bool {
        match self {
            CleanupHandle::Task(handle) => handle.is_finished(),
            CleanupHandle::Callback(_) => false,
        }
    }

    fn release(self) {
        match self {
            CleanupHandle::Task(handle) => handle.abort(),
            CleanupHandle::Callback(callback) => callback(),
        }
    }
}

impl From<JoinHandle<()>> for CleanupHandle {
    fn from(handle: JoinHandle<()>) -> Self {
        CleanupHandle::Task(handle)
    }
}

struct SessionInner {
    state: TransportState,
    disposed: bool,
    transport: Option<Box<dyn Transport>>,
    size: TermSize,
    pending_resize: Option<TermSize>,
    resize_sub: Option<ResizeSubscription>,
    last_error: Option<String>,
    sink: Option<OutputSink>,
    scrollback: VecDeque<u8>,
    cleanup: Vec<CleanupHandle>,
}

/// Returns an abandoned attach to `Unattached`.
///
/// Armed across the connect await; if the attaching future is dropped there
/// (task aborted, timeout), the next attach connects again. Any transport the
/// abandoned connect produces is dropped, and so closed, by its blocking task.
struct PendingAttach<'a> {
    session: &'a Session,
    epoch: u64,
    armed: bool,
}

impl Drop for PendingAttach<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session = self.session;
        let mut inner = session.lock();
        if inner.disposed
            || !session.is_current(self.epoch)
            || inner.state != TransportState::Attaching
        {
            return;
        }
        log::warn!("session {}: attach abandoned before connecting", session.id);
        session.set_state(&mut inner, TransportState::Unattached);
    }
}

/// One addressable interactive or log-tailing connection.
///
/// Sessions are owned by the registry and outlive the views that display
/// them: a view installs an output sink with [`attach_view`](Self::attach_view)
/// and removes it with [`detach_view`](Self::detach_view) without touching the
/// transport.
///
/// Every attach captures the current epoch. Disposal bumps the epoch, so any
/// completion or reader that still carries the old value is discarded.
pub struct Session {
    id: SessionId,
    generation: u64,
    subject: String,
    kind: SessionKind,
    scrollback_limit: usize,
    epoch: AtomicU64,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(id: SessionId, generation: u64, config: SessionConfig) -> Self {
        Self {
            id,
            generation,
            subject: config.subject,
            kind: config.kind,
            scrollback_limit: config.scrollback_bytes,
            epoch: AtomicU64::new(0),
            inner: Mutex::new(SessionInner {
                state: TransportState::Unattached,
                disposed: false,
                transport: None,
                size: config.size,
                pending_resize: None,
                resize_sub: None,
                last_error: None,
                sink: None,
                scrollback: VecDeque::new(),
                cleanup: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registry-assigned counter; distinguishes a re-created session from a
    /// disposed one with the same id.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> TransportState {
        self.lock().state
    }

    pub fn size(&self) -> TermSize {
        self.lock().size
    }

    /// The error that closed the transport, if any.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn has_view(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Copy of the retained output.
    pub fn scrollback(&self) -> Vec<u8> {
        self.lock().scrollback.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Establish the backing transport.
    ///
    /// Returns immediately if the session is already attached or another
    /// attach is in flight. A failed attach leaves the session in the
    /// registry in the `Closed` state with a visible error marker; retrying
    /// requires disposing and re-creating it. Dropping the returned future
    /// before the connect finishes puts the session back to `Unattached`.
    pub async fn attach(
        self: &Arc<Self>,
        connector: Arc<dyn Connector>,
    ) -> Result<(), TransportError> {
        let (epoch, size) = {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(TransportError::Disposed);
            }
            match inner.state {
                TransportState::Attached | TransportState::Attaching => return Ok(()),
                TransportState::Closed => return Err(TransportError::Closed),
                TransportState::Unattached => {}
            }
            self.set_state(&mut inner, TransportState::Attaching);
            (self.epoch.load(Ordering::SeqCst), inner.size)
        };

        log::debug!("attaching session {} ({:?})", self.id, self.kind);
        let mut pending = PendingAttach {
            session: &**self,
            epoch,
            armed: true,
        };
        let subject = self.subject.clone();
        let kind = self.kind;
        let result = tokio::task::spawn_blocking(move || connector.connect(&subject, kind, size))
            .await
            .unwrap_or_else(|e| {
                Err(TransportError::SpawnFailed(format!("connect task failed: {e}")))
            });
        pending.armed = false;

        let mut inner = self.lock();
        if inner.disposed || !self.is_current(epoch) {
            drop(inner);
            if let Ok(mut transport) = result {
                transport.close();
            }
            log::warn!("discarding late attach completion for session {}", self.id);
            return Err(TransportError::Cancelled);
        }

        let mut transport = match result {
            Ok(transport) => transport,
            Err(e) => {
                self.fail_locked(&mut inner, &e);
                return Err(e);
            }
        };

        // The view may have resized while the handshake was pending.
        if inner.size != size {
            if let Err(e) = transport.resize(inner.size) {
                log::warn!("session {}: initial resize failed: {e}", self.id);
            }
        }

        let reader = transport.take_reader();
        inner.transport = Some(transport);
        self.set_state(&mut inner, TransportState::Attached);
        drop(inner);

        if let Some(reader) = reader {
            if let Err(e) = start_io_thread(self, epoch, reader) {
                let e = TransportError::from(e);
                let mut inner = self.lock();
                if self.is_current(epoch) {
                    if let Some(mut transport) = inner.transport.take() {
                        transport.close();
                    }
                    self.fail_locked(&mut inner, &e);
                }
                return Err(e);
            }
        }

        log::debug!("session {} attached", self.id);
        Ok(())
    }

    fn fail_locked(&self, inner: &mut SessionInner, err: &TransportError) {
        log::warn!("session {}: attach failed: {err}", self.id);
        let message = format!("failed to connect to {}: {err}", self.subject);
        let marker = format!("\r\n[vmdeck] {message}\r\n");
        self.append_locked(inner, marker.as_bytes());
        inner.last_error = Some(message.clone());
        self.emit_locked(inner, SessionOutput::Error(message));
        self.set_state(inner, TransportState::Closed);
    }

    /// Send user input to the backend.
    pub fn write_input(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(TransportError::Disposed);
        }
        match inner.transport.as_mut() {
            Some(transport) => transport.write(data),
            None => Err(TransportError::Closed),
        }
    }

    /// Forward a resize immediately.
    ///
    /// Used for layout reflow of a single pane. Before the transport is up the
    /// size is only remembered and applied when the attach completes.
    pub fn resize(&self, size: TermSize) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(TransportError::Disposed);
        }
        inner.size = size;
        match inner.transport.as_mut() {
            Some(transport) => transport.resize(size),
            None => Ok(()),
        }
    }

    /// Resize from the shared drag gesture.
    ///
    /// While `coordinator` reports a drag, only the latest size is kept and a
    /// single flush is scheduled for the drag end. Otherwise the resize is
    /// forwarded immediately.
    pub fn request_resize(
        self: &Arc<Self>,
        coordinator: &ResizeCoordinator,
        size: TermSize,
    ) -> Result<(), TransportError> {
        {
            let mut inner = self.lock();
            if inner.disposed {
                return Err(TransportError::Disposed);
            }
            if inner.resize_sub.is_some() {
                inner.pending_resize = Some(size);
                return Ok(());
            }
            let weak = Arc::downgrade(self);
            let deferred = coordinator.subscribe_while_dragging(move || {
                if let Some(session) = weak.upgrade() {
                    session.flush_pending_resize();
                }
            });
            if let Some(subscription) = deferred {
                inner.pending_resize = Some(size);
                inner.resize_sub = Some(subscription);
                return Ok(());
            }
        }
        self.resize(size)
    }

    fn flush_pending_resize(&self) {
        let pending = {
            let mut inner = self.lock();
            inner.resize_sub = None;
            inner.pending_resize.take()
        };
        if let Some(size) = pending {
            if let Err(e) = self.resize(size) {
                log::debug!("session {}: deferred resize dropped: {e}", self.id);
            }
        }
    }

    /// Install `sink` as the visible view, replacing any previous one.
    ///
    /// The retained scrollback and the current transport state are replayed
    /// into the new sink first.
    pub fn attach_view(&self, sink: OutputSink) {
        let mut inner = self.lock();
        if !inner.scrollback.is_empty() {
            let replay: Vec<u8> = inner.scrollback.iter().copied().collect();
            let _ = sink.send(SessionOutput::Data(replay));
        }
        let _ = sink.send(SessionOutput::StateChanged(inner.state));
        if let Some(error) = &inner.last_error {
            let _ = sink.send(SessionOutput::Error(error.clone()));
        }
        inner.sink = Some(sink);
    }

    /// Remove the visible view. The transport stays up.
    pub fn detach_view(&self) {
        self.lock().sink = None;
    }

    /// Hand a timer, task, or subscription to the session for release at
    /// disposal. Released immediately if the session is already disposed.
    pub fn add_cleanup(&self, handle: impl Into<CleanupHandle>) {
        let handle = handle.into();
        let mut inner = self.lock();
        if inner.disposed {
            drop(inner);
            handle.release();
            return;
        }
        inner.cleanup.retain(|h| !h.is_finished());
        inner.cleanup.push(handle);
    }

    /// Called by the I/O thread for every chunk read from the transport.
    ///
    /// Returns `false` when the reader belongs to a superseded epoch and
    /// must stop.
    pub(crate) fn push_output(&self, epoch: u64, data: &[u8]) -> bool {
        let mut inner = self.lock();
        if inner.disposed || !self.is_current(epoch) {
            return false;
        }
        self.append_locked(&mut inner, data);
        self.emit_locked(&mut inner, SessionOutput::Data(data.to_vec()));
        true
    }

    /// Called by the I/O thread when the transport reaches EOF.
    pub(crate) fn mark_exited(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.disposed || !self.is_current(epoch) {
            return;
        }
        if let Some(mut transport) = inner.transport.take() {
            transport.close();
        }
        log::debug!("session {} transport closed by backend", self.id);
        self.emit_locked(&mut inner, SessionOutput::Exited);
        self.set_state(&mut inner, TransportState::Closed);
    }

    /// Tear the session down: cancel pending work, release cleanup handles,
    /// and close the transport. Safe to call more than once.
    pub(crate) fn dispose(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let (transport, cleanup, subscription, sink) = {
            let mut inner = self.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.state = TransportState::Closed;
            inner.pending_resize = None;
            (
                inner.transport.take(),
                std::mem::take(&mut inner.cleanup),
                inner.resize_sub.take(),
                inner.sink.take(),
            )
        };

        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        for handle in cleanup {
            handle.release();
        }
        if let Some(mut transport) = transport {
            transport.close();
        }
        if let Some(sink) = sink {
            let _ = sink.send(SessionOutput::StateChanged(TransportState::Closed));
        }
        log::debug!("session {} disposed", self.id);
    }

    fn append_locked(&self, inner: &mut SessionInner, data: &[u8]) {
        if self.scrollback_limit == 0 {
            return;
        }
        inner.scrollback.extend(data);
        let excess = inner.scrollback.len().saturating_sub(self.scrollback_limit);
        if excess > 0 {
            inner.scrollback.drain(..excess);
        }
    }

    fn set_state(&self, inner: &mut SessionInner, state: TransportState) {
        if inner.state != state {
            inner.state = state;
            self.emit_locked(inner, SessionOutput::StateChanged(state));
        }
    }

    fn emit_locked(&self, inner: &mut SessionInner, output: SessionOutput) {
        if let Some(sink) = &inner.sink {
            if sink.send(output).is_err() {
                // The view went away without detaching.
                inner.sink = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn new_session(subject: &str) -> Arc<Session> {
        let config = SessionConfig::new(subject, SessionKind::InteractiveShell);
        Arc::new(Session::new(
            session_id(subject, SessionKind::InteractiveShell),
            1,
            config,
        ))
    }

    async fn next_data(rx: &mut UnboundedReceiver<SessionOutput>) -> Vec<u8> {
        loop {
            let output = tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("timed out waiting for output")
                .expect("sink closed");
            if let SessionOutput::Data(data) = output {
                return data;
            }
        }
    }

    #[test]
    fn test_session_id_convention() {
        assert_eq!(session_id("web-1", SessionKind::InteractiveShell), "web-1-shell");
        assert_eq!(session_id("web-1", SessionKind::LogTail), "web-1-logs");
    }

    #[tokio::test]
    async fn test_attach_and_write() {
        let connector = Arc::new(FakeConnector::new());
        let session = new_session("vm1");
        assert_eq!(session.state(), TransportState::Unattached);
        assert!(matches!(session.write_input(b"x"), Err(TransportError::Closed)));

        session.attach(connector.clone()).await.unwrap();
        assert_eq!(session.state(), TransportState::Attached);

        // A second attach is a no-op.
        session.attach(connector.clone()).await.unwrap();
        assert_eq!(connector.connect_count(), 1);

        session.write_input(b"ls\n").unwrap();
        assert_eq!(connector.last_spy().lock().unwrap().writes, b"ls\n");
    }

    #[tokio::test]
    async fn test_output_survives_view_detach() {
        let connector = Arc::new(FakeConnector::new());
        let session = new_session("vm1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach_view(tx);
        session.attach(connector.clone()).await.unwrap();

        connector.send_output(b"hello ");
        assert_eq!(next_data(&mut rx).await, b"hello ");

        session.detach_view();
        assert!(!session.has_view());
        connector.send_output(b"world");

        // Wait for the I/O thread to deliver while no view is attached.
        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while session.scrollback() != b"hello world" && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(session.state(), TransportState::Attached);

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        session.attach_view(tx2);
        assert_eq!(next_data(&mut rx2).await, b"hello world");
    }

    #[tokio::test]
    async fn test_attach_failure_closes_with_marker() {
        let connector = Arc::new(FakeConnector::failing());
        let session = new_session("vm1");

        let err = session.attach(connector.clone()).await.unwrap_err();
        assert!(matches!(err, TransportError::SpawnFailed(_)));
        assert_eq!(session.state(), TransportState::Closed);

        let error = session.last_error().expect("error recorded");
        assert!(error.contains("vm1"), "unexpected error: {error}");
        let scrollback = String::from_utf8(session.scrollback()).unwrap();
        assert!(scrollback.contains("failed to connect"));

        // Retrying in place is refused; callers dispose and re-create.
        assert!(matches!(
            session.attach(connector.clone()).await,
            Err(TransportError::Closed)
        ));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_cancels_pending_attach() {
        let connector = Arc::new(FakeConnector::slow(Duration::from_millis(200)));
        let session = new_session("vm1");

        let attaching = {
            let session = Arc::clone(&session);
            let connector = connector.clone();
            tokio::spawn(async move { session.attach(connector).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), TransportState::Attaching);
        session.dispose();

        let result = attaching.await.unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert_eq!(session.state(), TransportState::Closed);
        assert!(connector.last_spy().lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_aborted_attach_can_be_retried() {
        let connector = Arc::new(FakeConnector::slow(Duration::from_millis(100)));
        let session = new_session("vm1");

        let attaching = {
            let session = Arc::clone(&session);
            let connector = connector.clone();
            tokio::spawn(async move { session.attach(connector).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.state(), TransportState::Attaching);

        attaching.abort();
        assert!(attaching.await.unwrap_err().is_cancelled());
        assert_eq!(session.state(), TransportState::Unattached);

        session.attach(connector.clone()).await.unwrap();
        assert_eq!(session.state(), TransportState::Attached);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_timed_out_attach_can_be_retried() {
        let connector = Arc::new(FakeConnector::slow(Duration::from_millis(100)));
        let session = new_session("vm1");

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), session.attach(connector.clone()))
                .await;
        assert!(timed_out.is_err());
        assert_eq!(session.state(), TransportState::Unattached);

        session.attach(connector.clone()).await.unwrap();
        assert_eq!(session.state(), TransportState::Attached);
    }

    #[tokio::test]
    async fn test_resize_before_attach_is_applied() {
        let connector = Arc::new(FakeConnector::new());
        let session = new_session("vm1");
        session.resize(TermSize::new(132, 50)).unwrap();
        session.attach(connector.clone()).await.unwrap();

        assert_eq!(session.size(), TermSize::new(132, 50));
        assert_eq!(connector.last_connect_size(), Some(TermSize::new(132, 50)));
    }

    #[tokio::test]
    async fn test_drag_resize_is_batched() {
        let connector = Arc::new(FakeConnector::new());
        let coordinator = ResizeCoordinator::new();
        let session = new_session("vm1");
        session.attach(connector.clone()).await.unwrap();

        coordinator.on_drag_start();
        for cols in 81..=90 {
            session
                .request_resize(&coordinator, TermSize::new(cols, 24))
                .unwrap();
        }
        assert!(connector.last_spy().lock().unwrap().resizes.is_empty());
        assert_eq!(coordinator.subscriber_count(), 1);

        coordinator.on_drag_end();
        assert_eq!(
            connector.last_spy().lock().unwrap().resizes,
            vec![TermSize::new(90, 24)]
        );

        // Outside a drag the resize goes straight through.
        session
            .request_resize(&coordinator, TermSize::new(100, 30))
            .unwrap();
        assert_eq!(
            connector.last_spy().lock().unwrap().resizes,
            vec![TermSize::new(90, 24), TermSize::new(100, 30)]
        );
    }

    #[tokio::test]
    async fn test_reflow_resize_ignores_drag() {
        let connector = Arc::new(FakeConnector::new());
        let coordinator = ResizeCoordinator::new();
        let session = new_session("vm1");
        session.attach(connector.clone()).await.unwrap();

        coordinator.on_drag_start();
        session.resize(TermSize::new(70, 20)).unwrap();
        assert_eq!(
            connector.last_spy().lock().unwrap().resizes,
            vec![TermSize::new(70, 20)]
        );
        coordinator.on_drag_end();
    }

    #[tokio::test]
    async fn test_dispose_releases_resources() {
        let connector = Arc::new(FakeConnector::new());
        let coordinator = ResizeCoordinator::new();
        let session = new_session("vm1");
        session.attach(connector.clone()).await.unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        session.add_cleanup(CleanupHandle::Callback(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        })));
        let poller = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        session.add_cleanup(poller);

        coordinator.on_drag_start();
        session
            .request_resize(&coordinator, TermSize::new(10, 10))
            .unwrap();

        session.dispose();
        session.dispose();

        assert!(session.is_disposed());
        assert!(released.load(Ordering::SeqCst));
        assert!(connector.last_spy().lock().unwrap().closed);
        assert_eq!(coordinator.subscriber_count(), 0);
        assert!(matches!(
            session.write_input(b"x"),
            Err(TransportError::Disposed)
        ));

        // Cleanup added after disposal runs right away.
        let late = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&late);
        session.add_cleanup(CleanupHandle::Callback(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        })));
        assert!(late.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_backend_eof_closes_session() {
        let connector = Arc::new(FakeConnector::new());
        let session = new_session("vm1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.attach_view(tx);
        session.attach(connector.clone()).await.unwrap();

        connector.finish_output();

        let mut saw_exit = false;
        while let Ok(Some(output)) =
            tokio::time::timeout(Duration::from_secs(3), rx.recv()).await
        {
            if output == SessionOutput::Exited {
                saw_exit = true;
            }
            if output == SessionOutput::StateChanged(TransportState::Closed) {
                break;
            }
        }
        assert!(saw_exit);
        assert_eq!(session.state(), TransportState::Closed);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_scrollback_is_bounded() {
        let config = SessionConfig::new("vm1", SessionKind::LogTail).with_scrollback(8);
        let session = Session::new("vm1-logs".to_string(), 1, config);
        assert!(session.push_output(0, b"0123456789abc"));
        assert_eq!(session.scrollback(), b"56789abc");
    }
}
