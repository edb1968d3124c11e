//! Command line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{
    BridgeConfig, BridgeTiming, CompletionMode, DEFAULT_MARKER, DEFAULT_PROMPT_PATTERN,
    ShellConfig,
};

/// Runs lines received on a serial port as shell commands and sends the output back.
#[derive(Parser, Debug)]
#[command(name = "serial-bridge", version, about)]
pub struct Cli {
    /// Serial settings file (key=value lines)
    #[arg(long, default_value = "serialport.cfg")]
    pub config: PathBuf,

    /// Shell program to run [default: cmd.exe on Windows, /bin/sh elsewhere]
    #[arg(long)]
    pub shell: Option<String>,

    /// Argument passed to the shell, repeatable
    #[arg(long = "shell-arg", allow_hyphen_values = true)]
    pub shell_args: Vec<String>,

    /// How command completion is detected [default: prompt on Windows, sentinel elsewhere]
    #[arg(long, value_enum)]
    pub completion: Option<CompletionMode>,

    /// Regex matching the shell's idle prompt, used in prompt mode
    #[arg(long, default_value = DEFAULT_PROMPT_PATTERN)]
    pub prompt_pattern: String,

    /// Marker printed after each command in sentinel mode (letters, digits, _)
    #[arg(long, default_value = DEFAULT_MARKER)]
    pub marker: String,

    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Hard limit for a single command
    #[arg(long, default_value_t = 120)]
    pub command_timeout_secs: u64,

    /// Wait after completion for trailing error output
    #[arg(long, default_value_t = 100)]
    pub settle_ms: u64,

    /// Limit for the shell to print its banner at startup
    #[arg(long, default_value_t = 10)]
    pub banner_timeout_secs: u64,

    /// Append every command cycle to this file as JSON lines
    #[arg(long)]
    pub transcript: Option<PathBuf>,

    /// Directory for log files [default: logs/ next to the executable]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    pub fn bridge_config(&self) -> BridgeConfig {
        let defaults = ShellConfig::default();
        let shell = ShellConfig {
            program: self.shell.clone().unwrap_or(defaults.program),
            args: self.shell_args.clone(),
        };

        BridgeConfig {
            shell,
            completion: self.completion.unwrap_or_else(CompletionMode::platform_default),
            prompt_pattern: self.prompt_pattern.clone(),
            marker: self.marker.clone(),
            timing: BridgeTiming {
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
                command_timeout: Duration::from_secs(self.command_timeout_secs),
                settle_delay: Duration::from_millis(self.settle_ms),
                banner_timeout: Duration::from_secs(self.banner_timeout_secs),
            },
            transcript: self.transcript.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_bridge_defaults() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["serial-bridge"])?;
        let config = cli.bridge_config();
        let expected = BridgeConfig::default();

        assert_eq!(cli.config, PathBuf::from("serialport.cfg"));
        assert_eq!(config.shell, expected.shell);
        assert_eq!(config.completion, expected.completion);
        assert_eq!(config.prompt_pattern, expected.prompt_pattern);
        assert_eq!(config.marker, expected.marker);
        assert_eq!(config.timing, expected.timing);
        assert!(config.transcript.is_none());
        Ok(())
    }

    #[test]
    fn test_overrides() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "serial-bridge",
            "--shell",
            "/bin/bash",
            "--shell-arg",
            "--norc",
            "--shell-arg",
            "-i",
            "--completion",
            "prompt",
            "--command-timeout-secs",
            "5",
            "--settle-ms",
            "0",
            "--transcript",
            "out/cycles.jsonl",
        ])?;
        let config = cli.bridge_config();

        assert_eq!(config.shell.program, "/bin/bash");
        assert_eq!(config.shell.args, vec!["--norc", "-i"]);
        assert_eq!(config.completion, CompletionMode::Prompt);
        assert_eq!(config.timing.command_timeout, Duration::from_secs(5));
        assert!(config.timing.settle_delay.is_zero());
        assert_eq!(config.transcript, Some(PathBuf::from("out/cycles.jsonl")));
        Ok(())
    }

    #[test]
    fn test_unknown_completion_mode_is_rejected() {
        assert!(Cli::try_parse_from(["serial-bridge", "--completion", "magic"]).is_err());
    }
}
