//! Serial port settings loaded from a `key=value` file.
//!
//! The file format is the one the bridge has always used (`serialport.cfg`):
//! one `Key=Value` pair per line. Enumerated values accept either their name
//! (case-insensitive) or their numeric ordinal.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Errors raised while reading or applying serial settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected `Key=Value`, got {text:?}")]
    MalformedLine { line: usize, text: String },

    #[error("line {line}: invalid number {value:?} for {key}")]
    InvalidNumber {
        line: usize,
        key: &'static str,
        value: String,
    },

    #[error("line {line}: unknown {key} value {value:?}")]
    InvalidEnum {
        line: usize,
        key: &'static str,
        value: String,
    },

    #[error("line {line}: DataBits must be between 5 and 8, got {value}")]
    DataBitsOutOfRange { line: usize, value: u8 },

    #[error("{0} is not supported by the serial driver")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopBits {
    None,
    One,
    Two,
    OnePointFive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Handshake {
    None,
    XOnXOff,
    RequestToSend,
    RequestToSendXOnXOff,
}

// Table order is the ordinal accepted in the file.
const PARITY_NAMES: &[(&str, Parity)] = &[
    ("None", Parity::None),
    ("Odd", Parity::Odd),
    ("Even", Parity::Even),
    ("Mark", Parity::Mark),
    ("Space", Parity::Space),
];

const STOP_BITS_NAMES: &[(&str, StopBits)] = &[
    ("None", StopBits::None),
    ("One", StopBits::One),
    ("Two", StopBits::Two),
    ("OnePointFive", StopBits::OnePointFive),
];

const HANDSHAKE_NAMES: &[(&str, Handshake)] = &[
    ("None", Handshake::None),
    ("XOnXOff", Handshake::XOnXOff),
    ("RequestToSend", Handshake::RequestToSend),
    ("RequestToSendXOnXOff", Handshake::RequestToSendXOnXOff),
];

/// Settings used to open the serial link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub handshake: Handshake,
    /// `None` blocks until a full line arrives.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        let port_name = if cfg!(windows) { "COM1" } else { "/dev/ttyS0" };
        Self {
            port_name: port_name.to_string(),
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: StopBits::One,
            handshake: Handshake::None,
            read_timeout: Some(Duration::from_millis(500)),
            write_timeout: Some(Duration::from_millis(500)),
        }
    }
}

impl SerialSettings {
    /// Load settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("{} not found, using default serial settings", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse the contents of a settings file on top of the defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::MalformedLine {
                    line,
                    text: raw.to_string(),
                });
            };
            let value = value.trim();

            match key.trim() {
                "PortName" => settings.port_name = value.to_string(),
                "BaudRate" => settings.baud_rate = parse_number(line, "BaudRate", value)?,
                "Parity" => settings.parity = parse_enum(line, "Parity", value, PARITY_NAMES)?,
                "DataBits" => {
                    let bits: u8 = parse_number(line, "DataBits", value)?;
                    if !(5..=8).contains(&bits) {
                        return Err(ConfigError::DataBitsOutOfRange { line, value: bits });
                    }
                    settings.data_bits = bits;
                }
                "StopBits" => {
                    settings.stop_bits = parse_enum(line, "StopBits", value, STOP_BITS_NAMES)?
                }
                "Handshake" => {
                    settings.handshake = parse_enum(line, "Handshake", value, HANDSHAKE_NAMES)?
                }
                "ReadTimeout" => settings.read_timeout = parse_timeout(line, "ReadTimeout", value)?,
                "WriteTimeout" => {
                    settings.write_timeout = parse_timeout(line, "WriteTimeout", value)?
                }
                other => debug!("ignoring unrecognized serial setting {other:?} on line {line}"),
            }
        }

        Ok(settings)
    }
}

fn parse_number<T: std::str::FromStr>(
    line: usize,
    key: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        line,
        key,
        value: value.to_string(),
    })
}

fn parse_enum<T: Copy>(
    line: usize,
    key: &'static str,
    value: &str,
    names: &[(&str, T)],
) -> Result<T, ConfigError> {
    if let Some((_, variant)) = names
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
    {
        return Ok(*variant);
    }

    value
        .parse::<usize>()
        .ok()
        .and_then(|ordinal| names.get(ordinal))
        .map(|(_, variant)| *variant)
        .ok_or_else(|| ConfigError::InvalidEnum {
            line,
            key,
            value: value.to_string(),
        })
}

/// Milliseconds; any negative value means "wait forever".
fn parse_timeout(
    line: usize,
    key: &'static str,
    value: &str,
) -> Result<Option<Duration>, ConfigError> {
    let millis: i64 = parse_number(line, key, value)?;
    Ok(u64::try_from(millis).ok().map(Duration::from_millis))
}
