//! Physical serial link to the modem.

use serialport::SerialPort;
use std::{
    io::{self, Read, Write},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open serial port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port is closed")]
    Closed,

    #[error("no line received within {0:?}")]
    Timeout(Duration),

    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A line-oriented, half-duplex link.
///
/// Implementations own the device exclusively while open.
pub trait Transport: Send {
    fn is_open(&self) -> bool;

    /// Reopens a closed link. A no-op when already open.
    fn reopen(&mut self) -> Result<(), TransportError>;

    /// Writes `line` followed by CR+LF.
    fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Reads a single line, without its terminator, within `timeout`.
    fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError>;

    fn close(&mut self);
}

/// Opens transports on demand; lets the session (re)connect without knowing
/// the device type.
pub trait Connector: Send + Sync {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Human readable identifier used in logs.
    fn describe(&self) -> String;
}

/// Settings of a physical serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Connector for SerialConfig {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(self.clone())?))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.port, self.baud_rate)
    }
}

/// Appends the CR+LF terminator the modem expects.
fn frame(line: &str) -> String {
    format!("{line}\r\n")
}

/// Accumulates raw reads and hands out complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next `\n`-terminated line with trailing CR/LF stripped, if one is complete.
    fn take_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);

        Some(line.trim_end_matches(['\r', '\n']).to_owned())
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

/// [`Transport`] backed by an OS serial device.
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    buffer: LineBuffer,
}

impl SerialTransport {
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        let port = open_port(&config)?;
        debug!(port = %config.port, baud = config.baud_rate, "opened serial port");

        Ok(Self {
            config,
            port: Some(port),
            buffer: LineBuffer::default(),
        })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }
}

fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort>, TransportError> {
    serialport::new(&config.port, config.baud_rate)
        .timeout(config.timeout)
        .open()
        .map_err(|source| TransportError::Open {
            port: config.port.clone(),
            source,
        })
}

impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        if self.port.is_none() {
            self.port = Some(open_port(&self.config)?);
            self.buffer.clear();
            debug!(port = %self.config.port, "reopened serial port");
        }

        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        // Drop anything left from a previous exchange that timed out.
        self.buffer.clear();
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            debug!(port = %self.config.port, error = %e, "failed to clear serial input buffer");
        }

        port.write_all(frame(line).as_bytes())?;
        port.flush()?;

        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];

        loop {
            if let Some(line) = self.buffer.take_line() {
                return Ok(line);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(timeout));
            }

            let port = self.port.as_mut().ok_or(TransportError::Closed)?;
            if let Err(e) = port.set_timeout(remaining) {
                debug!(port = %self.config.port, error = %e, "failed to set serial read timeout");
            }

            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => self.buffer.push(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(port = %self.config.port, error = %e, "serial read failed");
                    return Err(e.into());
                }
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.config.port, "closed serial port");
        }
        self.buffer.clear();
    }
}
