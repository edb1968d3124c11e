//! Line-oriented access to the serial link.
//!
//! The link is split into a read half ([`LineSource`]), driven from a
//! dedicated blocking thread, and a write half ([`LineSink`]) owned by the
//! bridge. Two implementations exist: the real port and an in-memory pair.

mod memory;
mod port;

use std::io;

pub use memory::{MemoryPeer, MemorySink, MemorySource, memory_link};
pub use port::{PortLineSink, PortLineSource, open_port};

/// Result of one attempt to read a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line without its terminator. May be empty.
    Line(String),
    /// No complete line arrived within the read timeout.
    TimedOut,
    /// The link is gone and will never produce another line.
    Closed,
}

/// Read half of the serial link.
pub trait LineSource: Send + 'static {
    fn read_line(&mut self) -> io::Result<ReadOutcome>;
}

/// Write half of the serial link.
pub trait LineSink: Send {
    /// Writes `text` as a single write operation and flushes it.
    fn write_text(&mut self, text: &str) -> io::Result<()>;

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write_text(&line)
    }

    /// Flushes and releases the link. Calling it twice is harmless.
    fn close(&mut self) -> io::Result<()>;
}

/// Splits a byte stream into lines, keeping partial data between reads.
#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pops the next complete line, stripping `\n` and an optional `\r`.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
