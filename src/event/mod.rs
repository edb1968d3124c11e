//! Event sources feeding the bridge.
//!
//! Blocking input (the serial port, the operator's stdin) is read on
//! dedicated threads so the bridge task never blocks on it. Each thread
//! forwards what it reads over a tokio channel and stops once the shared
//! [`RunningFlag`] is cleared.

mod running;

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::serial::{LineSource, ReadOutcome};

pub use running::RunningFlag;

const SERIAL_EVENT_BUFFER: usize = 64;
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Events produced by the serial reader thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    /// A complete line from the peer; empty lines are handshake probes.
    Line(String),
    /// The link reported end of stream.
    Closed,
    /// The link failed with a non-timeout error.
    Failed(String),
}

/// Handle to the thread reading lines from the serial link.
pub struct SerialReader {
    events: Receiver<SerialEvent>,
    handle: JoinHandle<()>,
    join_grace: Duration,
}

impl SerialReader {
    /// Spawns the reader thread.
    ///
    /// Read timeouts are retried silently while `running` is set. `join_grace`
    /// bounds how long [`SerialReader::join`] waits for the thread, and should
    /// exceed the source's read timeout.
    pub fn spawn<S: LineSource>(mut source: S, running: RunningFlag, join_grace: Duration) -> Self {
        let (tx, events) = mpsc::channel(SERIAL_EVENT_BUFFER);

        let handle = thread::spawn(move || {
            while running.is_running() {
                let event = match source.read_line() {
                    Ok(ReadOutcome::Line(line)) => SerialEvent::Line(line),
                    Ok(ReadOutcome::TimedOut) => continue,
                    Ok(ReadOutcome::Closed) => SerialEvent::Closed,
                    Err(e) => {
                        error!("Serial read error: {}", e);
                        SerialEvent::Failed(e.to_string())
                    }
                };
                let last = !matches!(event, SerialEvent::Line(_));

                // Use blocking_send since we're in a std::thread
                if tx.blocking_send(event).is_err() {
                    debug!("Bridge dropped the serial event channel");
                    break;
                }
                if last {
                    break;
                }
            }
            debug!("Serial reader thread finished");
        });

        Self {
            events,
            handle,
            join_grace,
        }
    }

    pub async fn recv(&mut self) -> Option<SerialEvent> {
        self.events.recv().await
    }

    /// Waits for the thread to notice shutdown.
    ///
    /// Returns false if it is still blocked in a read after the grace
    /// period; the thread is then left to finish on its own.
    pub async fn join(self) -> bool {
        let Self {
            events,
            handle,
            join_grace,
        } = self;
        // Unblocks a pending blocking_send
        drop(events);

        let deadline = Instant::now() + join_grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Serial reader still blocked after {:?}, detaching it", join_grace);
                return false;
            }
            tokio::time::sleep(JOIN_POLL_INTERVAL).await;
        }

        if handle.join().is_err() {
            error!("Serial reader thread panicked");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::memory_link;

    #[tokio::test]
    async fn test_lines_are_forwarded_in_order() -> anyhow::Result<()> {
        let (source, _sink, peer) = memory_link(Duration::from_millis(20));
        let running = RunningFlag::new();
        let mut reader = SerialReader::spawn(source, running.clone(), Duration::from_secs(1));

        peer.send_line("dir");
        peer.send_line("");
        peer.send_line("ver");

        assert_eq!(reader.recv().await, Some(SerialEvent::Line("dir".to_string())));
        assert_eq!(reader.recv().await, Some(SerialEvent::Line(String::new())));
        assert_eq!(reader.recv().await, Some(SerialEvent::Line("ver".to_string())));

        running.stop();
        assert!(reader.join().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_timeouts_are_silent() -> anyhow::Result<()> {
        let (source, _sink, _peer) = memory_link(Duration::from_millis(5));
        let running = RunningFlag::new();
        let mut reader = SerialReader::spawn(source, running.clone(), Duration::from_secs(1));

        // Several read timeouts elapse without producing an event.
        let nothing = tokio::time::timeout(Duration::from_millis(60), reader.recv()).await;
        assert!(nothing.is_err());

        running.stop();
        assert!(reader.join().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_hang_up_reports_closed() -> anyhow::Result<()> {
        let (source, _sink, mut peer) = memory_link(Duration::from_millis(20));
        let mut reader = SerialReader::spawn(source, RunningFlag::new(), Duration::from_secs(1));

        peer.hang_up();
        assert_eq!(reader.recv().await, Some(SerialEvent::Closed));
        assert!(reader.join().await);
        Ok(())
    }
}
