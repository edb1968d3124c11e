//! In-memory serial link.
//!
//! The [`MemoryPeer`] plays the remote side: it sends lines to the bridge and
//! inspects everything the bridge wrote back.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{LineSink, LineSource, ReadOutcome};

/// Creates a connected (source, sink, peer) triple.
///
/// `read_timeout` bounds each [`LineSource::read_line`] call, like the
/// read timeout of a real port.
pub fn memory_link(read_timeout: Duration) -> (MemorySource, MemorySink, MemoryPeer) {
    let (tx, rx) = mpsc::channel();
    let written = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(AtomicUsize::new(0));

    (
        MemorySource { rx, read_timeout },
        MemorySink {
            written: written.clone(),
            closes: closes.clone(),
            closed: false,
        },
        MemoryPeer {
            tx: Some(tx),
            written,
            closes,
        },
    )
}

pub struct MemorySource {
    rx: Receiver<String>,
    read_timeout: Duration,
}

impl LineSource for MemorySource {
    fn read_line(&mut self) -> io::Result<ReadOutcome> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadOutcome::Closed),
        }
    }
}

pub struct MemorySink {
    written: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl LineSink for MemorySink {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link is closed"));
        }
        let mut written = self
            .written
            .lock()
            .map_err(|e| io::Error::other(format!("Failed to lock link buffer: {}", e)))?;
        written.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Remote end of a [`memory_link`].
pub struct MemoryPeer {
    tx: Option<Sender<String>>,
    written: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

impl MemoryPeer {
    /// Sends one line to the bridge. Returns false once the link is gone.
    pub fn send_line(&self, line: &str) -> bool {
        match &self.tx {
            Some(tx) => tx.send(line.to_string()).is_ok(),
            None => false,
        }
    }

    /// Disconnects the peer; the source reports [`ReadOutcome::Closed`] afterwards.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Every write the bridge made, in order.
    pub fn written(&self) -> Vec<String> {
        match self.written.lock() {
            Ok(written) => written.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// All writes concatenated.
    pub fn received_text(&self) -> String {
        self.written().concat()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
