//! serial-shell-bridge - remote shell access over a serial line
//!
//! A peer on the serial link sends command lines; each one is run in a
//! long-lived shell process and the collected output is sent back. This
//! library provides:
//! - Serial configuration loading and port access
//! - Shell process management and completion detection
//! - The command bridge state machine
//! - The local operator console
//!
//! # Example
//!
//! ```no_run
//! use serial_shell_bridge::bridge::CommandBridge;
//! use serial_shell_bridge::config::{BridgeConfig, SerialSettings};
//! use serial_shell_bridge::event::{RunningFlag, SerialReader};
//! use serial_shell_bridge::serial::open_port;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = SerialSettings::load("serialport.cfg".as_ref())?;
//!     let (source, sink) = open_port(&settings)?;
//!     let running = RunningFlag::new();
//!
//!     let bridge =
//!         CommandBridge::launch(&BridgeConfig::default(), Box::new(sink), running.clone()).await?;
//!     let reader = SerialReader::spawn(source, running, Duration::from_secs(2));
//!     let (_tx, operator) = tokio::sync::mpsc::channel(1);
//!
//!     let report = bridge.run(reader, operator).await?;
//!     println!("{} commands served", report.commands);
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod cli;
pub mod config;
pub mod console;
pub mod event;
pub mod serial;
pub mod shell;
pub mod transcript;
pub mod utils;

// Re-export commonly used types
pub use bridge::{BridgeReport, BridgeState, CommandBridge};
pub use config::{BridgeConfig, ConfigError, SerialSettings};
pub use event::{RunningFlag, SerialEvent, SerialReader};
pub use transcript::{CommandLog, CommandRecord, Completion};
