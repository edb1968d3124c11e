//! The command bridge.
//!
//! Lines from the serial peer are run in the shell one at a time. Output is
//! collected until the completion detector reports the shell idle again, then
//! written back to the link in one piece. An empty line from the peer is a
//! handshake and is answered with the greeting banner captured at startup.


use std::mem;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use tokio::sync::mpsc::Receiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{BridgeConfig, BridgeTiming};
use crate::console::announce;
use crate::event::{RunningFlag, SerialEvent, SerialReader};
use crate::serial::LineSink;
use crate::shell::{CompletionDetector, ShellSession, ShellStreams};
use crate::transcript::{CommandLog, CommandRecord, Completion, TranscriptWriter};

/// First line of every handshake answer.
pub const WAIT_NOTICE: &str = "Please wait...";

/// Terminator appended to each shell line collected for the peer.
const OUTPUT_LINE_ENDING: &str = "\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    AwaitingLine,
    CommandInFlight,
    Stopped,
}

/// Summary returned once the bridge has shut down.
#[derive(Debug)]
pub struct BridgeReport {
    pub commands: usize,
    pub handshakes: usize,
    pub shell_status: std::process::ExitStatus,
    /// The most recent command cycles.
    pub history: CommandLog,
}

enum StreamLine {
    Stdout(Option<String>),
    Stderr(Option<String>),
    Tick,
}

pub struct CommandBridge {
    shell: ShellSession,
    streams: ShellStreams,
    stdout_open: bool,
    stderr_open: bool,
    detector: Box<dyn CompletionDetector>,
    sink: Box<dyn LineSink>,
    timing: BridgeTiming,
    running: RunningFlag,
    greeting: String,
    // Output and error text of the command in flight
    output: String,
    error: String,
    state: BridgeState,
    // Numbers completion trailers; 0 is the banner
    cycle: u64,
    log: CommandLog,
    transcript: Option<TranscriptWriter>,
    commands: usize,
    handshakes: usize,
}

impl CommandBridge {
    /// Starts the configured shell and captures its banner.
    pub async fn launch(
        config: &BridgeConfig,
        sink: Box<dyn LineSink>,
        running: RunningFlag,
    ) -> Result<Self> {
        let detector = config.detector()?;
        let transcript = config
            .transcript
            .as_deref()
            .map(TranscriptWriter::open)
            .transpose()?;

        let (shell, streams) = ShellSession::start(&config.shell)?;
        let mut bridge = Self::start(shell, streams, detector, sink, config.timing, running).await?;
        bridge.transcript = transcript;
        Ok(bridge)
    }

    /// Wraps an already running shell and captures its banner.
    ///
    /// Fails if the shell does not come to rest within the banner timeout.
    pub async fn start(
        shell: ShellSession,
        streams: ShellStreams,
        detector: Box<dyn CompletionDetector>,
        sink: Box<dyn LineSink>,
        timing: BridgeTiming,
        running: RunningFlag,
    ) -> Result<Self> {
        let mut bridge = Self {
            shell,
            streams,
            stdout_open: true,
            stderr_open: true,
            detector,
            sink,
            timing,
            running,
            greeting: String::new(),
            output: String::new(),
            error: String::new(),
            state: BridgeState::AwaitingLine,
            cycle: 0,
            log: CommandLog::default(),
            transcript: None,
            commands: 0,
            handshakes: 0,
        };
        bridge.capture_greeting().await?;
        Ok(bridge)
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn history(&self) -> &CommandLog {
        &self.log
    }

    /// True when no collected text is waiting to be written.
    pub fn buffers_empty(&self) -> bool {
        self.output.is_empty() && self.error.is_empty()
    }

    async fn capture_greeting(&mut self) -> Result<()> {
        let trailer = self.detector.trailer(self.cycle);
        self.shell
            .send_line(&trailer)
            .await
            .context("Failed to ask the shell for its banner")?;

        let completion = self.collect_until_idle(self.timing.banner_timeout).await;
        if completion != Completion::Idle {
            anyhow::bail!(
                "Shell {} did not reach an idle prompt within {:?} ({:?})",
                self.shell.program(),
                self.timing.banner_timeout,
                completion
            );
        }

        let banner = self.detector.finish(mem::take(&mut self.output), self.cycle);
        let stray = mem::take(&mut self.error);
        if !stray.is_empty() {
            warn!("Discarding shell error output at startup: {}", stray.trim_end());
        }

        self.greeting = if banner.trim().is_empty() {
            format!("{} ready", self.shell.program())
        } else {
            banner
        };
        announce(self.greeting.trim_end());
        announce("Shell process ready.");
        Ok(())
    }

    /// Handles one line from the peer while awaiting input.
    pub async fn handle_line(&mut self, line: String) -> Result<()> {
        if line.is_empty() {
            return self.answer_handshake();
        }
        if !self.running.is_running() {
            warn!("Dropping {:?}: shutdown in progress", line);
            return Ok(());
        }

        announce(&line);
        self.run_command(&line).await?;
        Ok(())
    }

    fn answer_handshake(&mut self) -> Result<()> {
        self.handshakes += 1;
        debug!("Answering handshake #{}", self.handshakes);
        self.sink
            .write_line(WAIT_NOTICE)
            .context("Failed to write wait notice")?;
        self.sink
            .write_line(&self.greeting)
            .context("Failed to write greeting")?;
        Ok(())
    }

    /// Writes a line typed by the local operator to the peer.
    pub fn send_operator_message(&mut self, text: &str) -> Result<()> {
        self.sink
            .write_line(text)
            .context("Failed to send operator message")
    }

    /// Runs one command through the shell and writes its output to the link.
    pub async fn run_command(&mut self, command_line: &str) -> Result<CommandRecord> {
        self.discard_stale();
        self.state = BridgeState::CommandInFlight;

        let started_at = Local::now().to_rfc3339();
        let started = Instant::now();
        self.cycle += 1;
        let trailer = self.detector.trailer(self.cycle);
        self.shell.submit(command_line, &trailer).await?;

        let completion = self.collect_until_idle(self.timing.command_timeout).await;
        let output = self.detector.finish(mem::take(&mut self.output), self.cycle);
        let error = mem::take(&mut self.error);
        self.write_results(&output, &error, completion)?;
        self.state = BridgeState::AwaitingLine;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match completion {
            Completion::Idle => debug!("{:?} finished in {} ms", command_line, duration_ms),
            other => warn!("{:?} ended as {:?} after {} ms", command_line, other, duration_ms),
        }

        let record = CommandRecord {
            command_line: command_line.to_string(),
            output,
            error,
            started_at,
            duration_ms,
            completion,
        };
        self.record(record.clone());
        Ok(record)
    }

    fn write_results(&mut self, output: &str, error: &str, completion: Completion) -> Result<()> {
        if !output.is_empty() {
            self.sink
                .write_text(output)
                .context("Failed to write command output")?;
        }
        if !error.is_empty() {
            self.sink
                .write_text(error)
                .context("Failed to write command error output")?;
        }
        match completion {
            Completion::Idle => {}
            Completion::TimedOut => self
                .sink
                .write_line(&format!(
                    "[command timed out after {:?}]",
                    self.timing.command_timeout
                ))
                .context("Failed to write timeout notice")?,
            Completion::ShellExited => self
                .sink
                .write_line("[shell exited]")
                .context("Failed to write shell exit notice")?,
        }
        Ok(())
    }

    fn record(&mut self, record: CommandRecord) {
        self.commands += 1;
        if let Some(writer) = self.transcript.as_mut() {
            if let Err(e) = writer.append(&record) {
                warn!("Failed to append to transcript: {:#}", e);
            }
        }
        self.log.push(record);
    }

    /// Collects shell output until the detector reports idle or `limit` passes.
    async fn collect_until_idle(&mut self, limit: Duration) -> Completion {
        let deadline = Instant::now() + limit;

        loop {
            if self.detector.is_idle(&self.output, self.cycle) {
                self.settle().await;
                return Completion::Idle;
            }
            if !self.stdout_open {
                self.drain_ready();
                return Completion::ShellExited;
            }

            let now = Instant::now();
            if now >= deadline {
                return Completion::TimedOut;
            }
            let wait = self.timing.poll_interval.min(deadline - now);

            let event = {
                let ShellStreams { stdout, stderr } = &mut self.streams;
                tokio::select! {
                    line = stdout.recv(), if self.stdout_open => StreamLine::Stdout(line),
                    line = stderr.recv(), if self.stderr_open => StreamLine::Stderr(line),
                    _ = tokio::time::sleep(wait) => StreamLine::Tick,
                }
            };
            self.apply(event);
        }
    }

    fn apply(&mut self, event: StreamLine) {
        match event {
            StreamLine::Stdout(Some(line)) => append_line(&mut self.output, &line),
            StreamLine::Stdout(None) => {
                debug!("Shell stdout closed");
                self.stdout_open = false;
            }
            StreamLine::Stderr(Some(line)) => append_line(&mut self.error, &line),
            StreamLine::Stderr(None) => {
                debug!("Shell stderr closed");
                self.stderr_open = false;
            }
            StreamLine::Tick => {}
        }
    }

    /// Gives trailing lines (usually stderr) a moment to arrive.
    async fn settle(&mut self) {
        if !self.timing.settle_delay.is_zero() {
            tokio::time::sleep(self.timing.settle_delay).await;
        }
        self.drain_ready();
    }

    /// Moves every already queued line into the buffers without waiting.
    fn drain_ready(&mut self) -> usize {
        let mut drained = 0;
        while self.stdout_open {
            match self.streams.stdout.try_recv() {
                Ok(line) => {
                    append_line(&mut self.output, &line);
                    drained += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.stdout_open = false,
            }
        }
        while self.stderr_open {
            match self.streams.stderr.try_recv() {
                Ok(line) => {
                    append_line(&mut self.error, &line);
                    drained += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.stderr_open = false,
            }
        }
        drained
    }

    /// Empties the buffers before a new command is submitted.
    ///
    /// Output still in flight from a timed-out command is cut off later by
    /// the detector, when it sees that command's numbered marker.
    fn discard_stale(&mut self) {
        let stale = self.drain_ready();
        if stale > 0 {
            warn!(
                "Discarding {} stale shell line(s): {:?} {:?}",
                stale, self.output, self.error
            );
        }
        self.output.clear();
        self.error.clear();
    }

    /// Serves the link until shutdown is requested, the peer goes away or the shell exits,
    /// then closes the link and the shell, in that order.
    pub async fn run(
        mut self,
        mut serial: SerialReader,
        mut operator: Receiver<String>,
    ) -> Result<BridgeReport> {
        let served = self.serve(&mut serial, &mut operator).await;
        if let Err(e) = &served {
            error!("Bridge stopped on error: {:#}", e);
        }
        self.running.stop();

        let report = self.shutdown(serial).await;
        served.and(report)
    }

    async fn serve(
        &mut self,
        serial: &mut SerialReader,
        operator: &mut Receiver<String>,
    ) -> Result<()> {
        let running = self.running.clone();
        let mut operator_open = true;

        loop {
            tokio::select! {
                biased;

                _ = running.stopped() => {
                    info!("Shutdown requested, leaving the serial loop");
                    return Ok(());
                }
                event = serial.recv() => match event {
                    Some(SerialEvent::Line(line)) => {
                        self.handle_line(line).await?;
                        if !self.stdout_open {
                            announce("Shell process exited");
                            return Ok(());
                        }
                    }
                    Some(SerialEvent::Closed) | None => {
                        warn!("Serial link closed by the peer");
                        return Ok(());
                    }
                    Some(SerialEvent::Failed(reason)) => {
                        return Err(anyhow!("Serial link failed: {reason}"));
                    }
                },
                message = operator.recv(), if operator_open => match message {
                    Some(text) => self.send_operator_message(&text)?,
                    None => operator_open = false,
                },
            }
        }
    }

    async fn shutdown(mut self, serial: SerialReader) -> Result<BridgeReport> {
        self.state = BridgeState::Stopped;

        serial.join().await;
        if let Err(e) = self.sink.close() {
            error!("Failed to close serial link: {}", e);
        }
        announce("Serial port closed");

        self.shell.close_input();
        announce("Input stream closed");
        let shell_status = self.shell.shutdown().await?;
        announce("Exit");

        Ok(BridgeReport {
            commands: self.commands,
            handshakes: self.handshakes,
            shell_status,
            history: self.log,
        })
    }
}

fn append_line(buffer: &mut String, line: &str) {
    buffer.push_str(line);
    buffer.push_str(OUTPUT_LINE_ENDING);
}
