//! Serial port backed implementation of the link halves.

use std::io::{self, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::SerialPort;
use tracing::{debug, info};

use super::{LineAssembler, LineSink, LineSource, ReadOutcome};
use crate::config::{ConfigError, Handshake, Parity, SerialSettings, StopBits};

const PORT_READ_BUFFER: usize = 1024;

// Stand-in for "no timeout"; the reader simply retries after it expires.
const BLOCKING_TIMEOUT: Duration = Duration::from_secs(3600);

/// Opens the configured port and returns its read and write halves.
pub fn open_port(settings: &SerialSettings) -> Result<(PortLineSource, PortLineSink)> {
    let port = serialport::new(&settings.port_name, settings.baud_rate)
        .data_bits(data_bits(settings.data_bits)?)
        .parity(parity(settings.parity)?)
        .stop_bits(stop_bits(settings.stop_bits)?)
        .flow_control(flow_control(settings.handshake)?)
        .timeout(settings.read_timeout.unwrap_or(BLOCKING_TIMEOUT))
        .open()
        .with_context(|| format!("Failed to open serial port {}", settings.port_name))?;

    let mut writer = port
        .try_clone()
        .with_context(|| format!("Failed to clone serial port {}", settings.port_name))?;
    writer
        .set_timeout(settings.write_timeout.unwrap_or(BLOCKING_TIMEOUT))
        .context("Failed to set serial write timeout")?;

    info!(
        "Opened serial port {} at {} baud",
        settings.port_name, settings.baud_rate
    );

    Ok((
        PortLineSource {
            port,
            assembler: LineAssembler::default(),
        },
        PortLineSink { port: Some(writer) },
    ))
}

fn data_bits(bits: u8) -> Result<serialport::DataBits, ConfigError> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(ConfigError::Unsupported(format!("{other} data bits"))),
    }
}

fn parity(parity: Parity) -> Result<serialport::Parity, ConfigError> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(ConfigError::Unsupported(format!("{parity:?} parity"))),
    }
}

fn stop_bits(stop_bits: StopBits) -> Result<serialport::StopBits, ConfigError> {
    match stop_bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::None | StopBits::OnePointFive => {
            Err(ConfigError::Unsupported(format!("{stop_bits:?} stop bits")))
        }
    }
}

fn flow_control(handshake: Handshake) -> Result<serialport::FlowControl, ConfigError> {
    match handshake {
        Handshake::None => Ok(serialport::FlowControl::None),
        Handshake::XOnXOff => Ok(serialport::FlowControl::Software),
        Handshake::RequestToSend => Ok(serialport::FlowControl::Hardware),
        Handshake::RequestToSendXOnXOff => Err(ConfigError::Unsupported(
            "combined RTS and XON/XOFF handshake".to_string(),
        )),
    }
}

pub struct PortLineSource {
    port: Box<dyn SerialPort>,
    assembler: LineAssembler,
}

impl LineSource for PortLineSource {
    fn read_line(&mut self) -> io::Result<ReadOutcome> {
        let mut buf = [0u8; PORT_READ_BUFFER];
        loop {
            if let Some(line) = self.assembler.next_line() {
                return Ok(ReadOutcome::Line(line));
            }
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => self.assembler.push(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(ReadOutcome::TimedOut),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct PortLineSink {
    port: Option<Box<dyn SerialPort>>,
}

impl LineSink for PortLineSink {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))?;
        port.write_all(text.as_bytes())?;
        port.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut port) = self.port.take() {
            port.flush()?;
            debug!("Released serial port writer");
        }
        Ok(())
    }
}
