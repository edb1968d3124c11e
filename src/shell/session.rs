//! Shell subprocess management and command submission.
//!
//! This module owns the long-lived shell process, writes command lines to its
//! stdin and forwards every non-empty stdout/stderr line on its own channel.

use std::process::{ExitStatus, Stdio};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

use crate::config::ShellConfig;

const PIPE_READ_BUFFER: usize = 16384;

#[cfg(windows)]
const SHELL_NEWLINE: &str = "\r\n";
#[cfg(not(windows))]
const SHELL_NEWLINE: &str = "\n";

/// Receiving ends of the shell's output streams.
///
/// Each channel has a single producer (the task draining that pipe) and
/// closes when the pipe reaches EOF.
pub struct ShellStreams {
    pub stdout: UnboundedReceiver<String>,
    pub stderr: UnboundedReceiver<String>,
}

/// Owns one interactive shell process.
pub struct ShellSession {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ShellSession {
    /// Spawns the shell with all three standard streams piped.
    ///
    /// Must be called from within a tokio runtime; one reader task is
    /// spawned per output pipe.
    ///
    /// # Returns
    /// A tuple of (ShellSession, ShellStreams carrying its output lines)
    pub fn start(config: &ShellConfig) -> Result<(Self, ShellStreams)> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start shell {:?}", config.program))?;

        let stdin = child.stdin.take().context("Shell stdin was not captured")?;
        let stdout = child.stdout.take().context("Shell stdout was not captured")?;
        let stderr = child.stderr.take().context("Shell stderr was not captured")?;

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, stdout_tx, "stdout"));
        tokio::spawn(forward_lines(stderr, stderr_tx, "stderr"));

        info!(
            "Started shell {} (pid {:?})",
            config.program,
            child.id()
        );

        Ok((
            Self {
                program: config.program.clone(),
                child,
                stdin: Some(stdin),
            },
            ShellStreams {
                stdout: stdout_rx,
                stderr: stderr_rx,
            },
        ))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Writes `command_line` and then `trailer` to the shell, each as its own line.
    ///
    /// An empty trailer produces a blank line, which makes an interactive
    /// shell print a fresh prompt once the command is done.
    pub async fn submit(&mut self, command_line: &str, trailer: &str) -> Result<()> {
        self.write_lines(&[command_line, trailer]).await?;
        debug!("Submitted {:?} to shell", command_line);
        Ok(())
    }

    /// Writes a single line, e.g. the blank line that asks for a prompt.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.write_lines(&[line]).await
    }

    async fn write_lines(&mut self, lines: &[&str]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("Shell input stream is already closed")?;

        let mut payload = String::new();
        for line in lines {
            payload.push_str(line);
            payload.push_str(SHELL_NEWLINE);
        }

        stdin
            .write_all(payload.as_bytes())
            .await
            .context("Failed to write command to shell")?;
        stdin.flush().await.context("Failed to flush shell input")?;
        Ok(())
    }

    /// Closes the shell's stdin. Interactive shells exit on EOF.
    pub fn close_input(&mut self) {
        if self.stdin.take().is_some() {
            debug!("Closed shell input stream");
        }
    }

    /// Closes stdin and waits for the shell to exit on its own.
    pub async fn shutdown(mut self) -> Result<ExitStatus> {
        self.close_input();
        let status = self
            .child
            .wait()
            .await
            .with_context(|| format!("Failed waiting for shell {} to exit", self.program))?;
        info!("Shell {} exited with {}", self.program, status);
        Ok(status)
    }
}

/// Reads `pipe` line by line and forwards each non-empty line without its terminator.
async fn forward_lines<R>(pipe: R, sink: UnboundedSender<String>, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(PIPE_READ_BUFFER, pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("Shell {} reached EOF", stream);
                break;
            }
            Ok(_) => {
                // Console code pages are not always UTF-8
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    continue;
                }
                if sink.send(line.to_string()).is_err() {
                    // Receiver dropped, bridge is gone
                    break;
                }
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::Interrupted {
                    error!("Shell {} read error: {}", stream, e);
                    break;
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn sh() -> ShellConfig {
        ShellConfig {
            program: "/bin/sh".to_string(),
            args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_submit_forwards_output_lines() -> Result<()> {
        let (mut shell, mut streams) = ShellSession::start(&sh())?;
        shell.submit("echo hello", "echo world").await?;

        let first = timeout(Duration::from_secs(5), streams.stdout.recv()).await?;
        let second = timeout(Duration::from_secs(5), streams.stdout.recv()).await?;
        assert_eq!(first.as_deref(), Some("hello"));
        assert_eq!(second.as_deref(), Some("world"));

        shell.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_send_line_writes_one_line() -> Result<()> {
        let (mut shell, mut streams) = ShellSession::start(&sh())?;
        shell.send_line("echo single").await?;

        let line = timeout(Duration::from_secs(5), streams.stdout.recv()).await?;
        assert_eq!(line.as_deref(), Some("single"));

        shell.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_lines_are_dropped() -> Result<()> {
        let (mut shell, mut streams) = ShellSession::start(&sh())?;
        shell.submit("printf '\\n\\nafter\\n'", "").await?;

        let line = timeout(Duration::from_secs(5), streams.stdout.recv()).await?;
        assert_eq!(line.as_deref(), Some("after"));

        shell.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_stderr_has_its_own_channel() -> Result<()> {
        let (mut shell, mut streams) = ShellSession::start(&sh())?;
        shell.submit("echo oops 1>&2", "").await?;

        let line = timeout(Duration::from_secs(5), streams.stderr.recv()).await?;
        assert_eq!(line.as_deref(), Some("oops"));
        assert!(streams.stdout.try_recv().is_err());

        shell.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams() -> Result<()> {
        let (shell, mut streams) = ShellSession::start(&sh())?;
        let status = shell.shutdown().await?;
        assert!(status.success());

        let end = timeout(Duration::from_secs(5), streams.stdout.recv()).await?;
        assert!(end.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let config = ShellConfig {
            program: "/nonexistent/shell-for-bridge-tests".to_string(),
            args: Vec::new(),
        };
        assert!(ShellSession::start(&config).is_err());
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() -> Result<()> {
        let (mut shell, _streams) = ShellSession::start(&sh())?;
        shell.close_input();
        assert!(shell.submit("echo late", "").await.is_err());
        shell.shutdown().await?;
        Ok(())
    }
}
