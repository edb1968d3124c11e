//! Main entry point for the serial shell bridge.
//!
//! Loads the serial settings, opens the port, starts the shell and serves
//! the link until the operator types QUIT or the peer goes away.

use std::io::BufReader;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use serial_shell_bridge::bridge::CommandBridge;
use serial_shell_bridge::cli::Cli;
use serial_shell_bridge::config::SerialSettings;
use serial_shell_bridge::console::{announce, spawn_console};
use serial_shell_bridge::event::{RunningFlag, SerialReader};
use serial_shell_bridge::serial::open_port;
use serial_shell_bridge::utils;

/// Upper bound on waiting for the serial reader at shutdown.
const MAX_READER_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging before anything else
    let _log_guard = utils::logger::init_logging(cli.log_dir.clone());

    let settings = SerialSettings::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let config = cli.bridge_config();

    let (source, sink) = open_port(&settings)?;
    announce(format!(
        "Opened {} at {} baud",
        settings.port_name, settings.baud_rate
    ));

    let running = RunningFlag::new();
    let bridge = CommandBridge::launch(&config, Box::new(sink), running.clone()).await?;

    let grace = settings
        .read_timeout
        .map(|t| t + Duration::from_secs(1))
        .unwrap_or(MAX_READER_GRACE)
        .min(MAX_READER_GRACE);
    let reader = SerialReader::spawn(source, running.clone(), grace);
    let operator = spawn_console(BufReader::new(std::io::stdin()), running);

    let report = bridge.run(reader, operator).await?;
    tracing::info!(
        "Served {} command(s) and {} handshake(s); shell exited with {}",
        report.commands,
        report.handshakes,
        report.shell_status
    );
    for record in report.history.unfinished() {
        tracing::warn!(
            "{:?} ended as {:?} after {} ms",
            record.command_line,
            record.completion,
            record.duration_ms
        );
    }
    Ok(())
}
