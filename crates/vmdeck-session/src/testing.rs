//! In-memory connector used by the session and registry tests.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::transport::{Connector, SessionKind, TermSize, Transport, TransportError};

/// What the fake backend observed through one transport.
#[derive(Default)]
pub(crate) struct Spy {
    pub writes: Vec<u8>,
    pub resizes: Vec<TermSize>,
    pub closed: bool,
    output: Option<mpsc::Sender<Vec<u8>>>,
}

struct FakeTransport {
    spy: Arc<Mutex<Spy>>,
    reader: Option<Box<dyn Read + Send>>,
}

impl Transport for FakeTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut spy = self.spy.lock().unwrap();
        if spy.closed {
            return Err(TransportError::Closed);
        }
        spy.writes.extend_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, size: TermSize) -> Result<(), TransportError> {
        self.spy.lock().unwrap().resizes.push(size);
        Ok(())
    }

    fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    fn close(&mut self) {
        let mut spy = self.spy.lock().unwrap();
        spy.closed = true;
        spy.output = None;
    }
}

/// Blocking reader fed through a channel; EOF once every sender is gone.
struct ChannelReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(data) => self.pending = data,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

pub(crate) struct FakeConnector {
    fail: bool,
    delay: Duration,
    connects: AtomicUsize,
    sizes: Mutex<Vec<TermSize>>,
    spies: Mutex<Vec<Arc<Mutex<Spy>>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            fail: false,
            delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
            sizes: Mutex::new(Vec::new()),
            spies: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_connect_size(&self) -> Option<TermSize> {
        self.sizes.lock().unwrap().last().copied()
    }

    pub fn last_spy(&self) -> Arc<Mutex<Spy>> {
        self.spies
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport was created")
    }

    /// Push bytes out of the most recent transport as if the backend wrote them.
    pub fn send_output(&self, data: &[u8]) {
        let spy = self.last_spy();
        let spy = spy.lock().unwrap();
        if let Some(tx) = &spy.output {
            tx.send(data.to_vec()).unwrap();
        }
    }

    /// Simulate the backend closing the connection.
    pub fn finish_output(&self) {
        self.last_spy().lock().unwrap().output = None;
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        _subject: &str,
        _kind: SessionKind,
        size: TermSize,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.sizes.lock().unwrap().push(size);
        if self.fail {
            return Err(TransportError::SpawnFailed("backend unreachable".to_string()));
        }

        let (tx, rx) = mpsc::channel();
        let spy = Arc::new(Mutex::new(Spy {
            output: Some(tx),
            ..Spy::default()
        }));
        self.spies.lock().unwrap().push(Arc::clone(&spy));
        Ok(Box::new(FakeTransport {
            spy,
            reader: Some(Box::new(ChannelReader {
                rx,
                pending: Vec::new(),
            })),
        }))
    }
}
