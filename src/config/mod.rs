//! Configuration for the serial link, the shell and the bridge loop.
//!
//! Serial settings come from `serialport.cfg`; everything else has
//! platform defaults that the command line can override.

mod serial;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub use serial::{ConfigError, Handshake, Parity, SerialSettings, StopBits};

use crate::shell::{CompletionDetector, PromptDetector, SentinelDetector};

/// Idle prompt of `cmd.exe`, e.g. `C:\Users\me>`.
pub const DEFAULT_PROMPT_PATTERN: &str = r"^\w:\\.*>*$";
pub const DEFAULT_MARKER: &str = "__SERIAL_BRIDGE_DONE__";

/// How the bridge decides that a command has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CompletionMode {
    /// Wait for the shell's idle prompt to reappear.
    Prompt,
    /// Ask the shell to echo a marker line after every command.
    Sentinel,
}

impl CompletionMode {
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            CompletionMode::Prompt
        } else {
            CompletionMode::Sentinel
        }
    }
}

/// The shell program to run and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let program = if cfg!(windows) { "cmd.exe" } else { "/bin/sh" };
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTiming {
    /// Upper bound on how long the bridge waits between completion checks.
    pub poll_interval: Duration,
    /// Hard limit for a single command.
    pub command_timeout: Duration,
    /// Grace period after completion for trailing stderr lines.
    pub settle_delay: Duration,
    /// Limit for capturing the greeting banner at startup.
    pub banner_timeout: Duration,
}

impl Default for BridgeTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            command_timeout: Duration::from_secs(120),
            settle_delay: Duration::from_millis(100),
            banner_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub shell: ShellConfig,
    pub completion: CompletionMode,
    pub prompt_pattern: String,
    pub marker: String,
    pub timing: BridgeTiming,
    /// Append every finished command as a JSON line to this file.
    pub transcript: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            completion: CompletionMode::platform_default(),
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            marker: DEFAULT_MARKER.to_string(),
            timing: BridgeTiming::default(),
            transcript: None,
        }
    }
}

impl BridgeConfig {
    /// Build the completion strategy selected by this configuration.
    pub fn detector(&self) -> Result<Box<dyn CompletionDetector>> {
        let detector: Box<dyn CompletionDetector> = match self.completion {
            CompletionMode::Prompt => Box::new(
                PromptDetector::new(&self.prompt_pattern)
                    .with_context(|| format!("Invalid prompt pattern {:?}", self.prompt_pattern))?,
            ),
            CompletionMode::Sentinel => {
                if !SentinelDetector::is_valid_marker(&self.marker) {
                    anyhow::bail!(
                        "Sentinel marker {:?} must be non-empty and use only letters, digits and '_'",
                        self.marker
                    );
                }
                Box::new(SentinelDetector::new(self.marker.clone()))
            }
        };
        Ok(detector)
    }
}
