//! Shell execution and process management module.
//!
//! This module handles shell subprocess creation, command submission,
//! output line forwarding and command completion detection.

mod detector;
mod session;

pub use detector::{CompletionDetector, PromptDetector, SentinelDetector};
pub use session::{ShellSession, ShellStreams};
