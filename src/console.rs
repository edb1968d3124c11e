//! Local operator console.
//!
//! The operator types on the bridge machine's stdin: `QUIT` stops the bridge,
//! anything else is sent to the serial peer as a chat line. Status messages
//! for the operator go to stdout and are mirrored into the log.

use std::fmt::Display;
use std::io::BufRead;
use std::thread;

use tokio::sync::mpsc::{self, Receiver};
use tracing::{debug, error, info};

use crate::event::RunningFlag;

pub const QUIT_COMMAND: &str = "QUIT";

const CONSOLE_EVENT_BUFFER: usize = 64;

/// What a line typed by the operator means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Quit,
    /// Text to forward to the serial peer, never to the shell.
    Message(String),
}

impl ConsoleInput {
    pub fn parse(line: String) -> Self {
        if line.trim().eq_ignore_ascii_case(QUIT_COMMAND) {
            ConsoleInput::Quit
        } else {
            ConsoleInput::Message(line)
        }
    }
}

/// Prints a status line for the operator and records it in the log.
pub fn announce(message: impl Display) {
    println!("{message}");
    info!("{message}");
}

/// Spawns the console reader thread over `input` (normally locked stdin).
///
/// The thread stops `running` when the operator types `QUIT`. End of input
/// only ends the console loop; the bridge keeps serving the link.
///
/// # Returns
/// A receiver of operator messages destined for the serial link
pub fn spawn_console<R>(input: R, running: RunningFlag) -> Receiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CONSOLE_EVENT_BUFFER);

    thread::spawn(move || {
        announce(format!("Type {QUIT_COMMAND} to exit"));

        for line in input.lines() {
            if !running.is_running() {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Console read error: {}", e);
                    break;
                }
            };

            match ConsoleInput::parse(line) {
                ConsoleInput::Quit => {
                    running.stop();
                    announce("Shutdown requested");
                    break;
                }
                ConsoleInput::Message(text) => {
                    if tx.blocking_send(text).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Console loop finished");
    });

    rx
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_quit_is_case_insensitive() {
        assert_eq!(ConsoleInput::parse("QUIT".to_string()), ConsoleInput::Quit);
        assert_eq!(ConsoleInput::parse("quit".to_string()), ConsoleInput::Quit);
        assert_eq!(ConsoleInput::parse("Quit\r".to_string()), ConsoleInput::Quit);
        assert_eq!(ConsoleInput::parse("  qUiT ".to_string()), ConsoleInput::Quit);
    }

    #[test]
    fn test_other_input_is_a_message() {
        assert_eq!(
            ConsoleInput::parse("quit now".to_string()),
            ConsoleInput::Message("quit now".to_string())
        );
        assert_eq!(
            ConsoleInput::parse(String::new()),
            ConsoleInput::Message(String::new())
        );
    }

    #[tokio::test]
    async fn test_console_forwards_messages_then_stops_on_quit() -> anyhow::Result<()> {
        let running = RunningFlag::new();
        let input = Cursor::new("hello peer\nquit\nnever sent\n");
        let mut rx = spawn_console(input, running.clone());

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?;
        assert_eq!(first.as_deref(), Some("hello peer"));

        tokio::time::timeout(Duration::from_secs(1), running.stopped()).await?;
        let rest = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?;
        assert_eq!(rest, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_end_of_input_keeps_running() -> anyhow::Result<()> {
        let running = RunningFlag::new();
        let mut rx = spawn_console(Cursor::new("only line\n"), running.clone());

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?;
        assert_eq!(first.as_deref(), Some("only line"));
        let end = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await?;
        assert_eq!(end, None);
        assert!(running.is_running());
        Ok(())
    }
}
