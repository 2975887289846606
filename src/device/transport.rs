// Byte-stream link to the device shell
//
// The device runs a line-oriented shell over USB serial. Every reply ends
// with the shell prompt, so a read runs until the prompt's '$'. Replies are
// cleaned of terminal escape sequences and the trailing prompt before they
// reach the session.

use regex::bytes::Regex;
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::{DeviceError, Result};
use crate::config::PROMPT;

/// ESC + Fe byte or a C1 control (raw, or UTF-8 encoded as C2 xx), then
/// parameter/intermediate bytes, then a final byte. Matched on raw bytes so a
/// lone C1 byte never reaches UTF-8 decoding.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)(?:\x1B[@-_]|\xC2?[\x80-\x9F])[0-?]*[ -/]*[@-~]")
        .expect("escape pattern is valid")
});

/// Which way a logged line travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
    Send,
    Receive,
}

impl fmt::Display for LogDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogDirection::Send => write!(f, "send"),
            LogDirection::Receive => write!(f, "receive"),
        }
    }
}

/// Receives every line written to and read from the device
pub trait LogSink: Send + Sync {
    fn log(&self, text: &str, direction: LogDirection);
}

/// Forwards wire traffic to `tracing` under the `pluto::wire` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, text: &str, direction: LogDirection) {
        info!(target: "pluto::wire", %direction, "{}", text);
    }
}

/// A serial port the device may be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub id: String,
    pub description: String,
}

/// List serial ports visible to the OS
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                id: port.port_name,
                description,
            }
        })
        .collect())
}

/// Strip terminal escapes and the trailing shell prompt from a raw reply
pub fn clean_response(raw: &[u8]) -> String {
    let stripped = ANSI_ESCAPE.replace_all(raw, &b""[..]);
    let text = String::from_utf8_lossy(&stripped);
    let text = text.trim();
    match text.strip_suffix(PROMPT) {
        Some(rest) => rest.trim().to_string(),
        None => text.to_string(),
    }
}

/// Connection to the device used by the session
pub trait Transport: Send {
    /// Write raw bytes; `log` controls whether the line reaches the log sink
    fn write(&mut self, bytes: &[u8], log: bool) -> Result<()>;

    /// Read until `delimiter` (inclusive) or the read timeout, returning the cleaned reply
    fn read_until(&mut self, delimiter: u8, log: bool) -> Result<String>;

    /// Flush both directions and close. Safe to call when already closed.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Serial transport backed by the `serialport` crate
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    port_id: String,
    read_timeout: Duration,
    sink: Arc<dyn LogSink>,
}

impl SerialTransport {
    /// Open `port_id` at `baudrate`; reads give up after `read_timeout`
    pub fn connect(
        port_id: &str,
        baudrate: u32,
        read_timeout: Duration,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let port = serialport::new(port_id, baudrate)
            .timeout(read_timeout)
            .open()
            .map_err(|source| DeviceError::Connect {
                port: port_id.to_string(),
                source,
            })?;

        info!("Connected to {} at {} baud", port_id, baudrate);
        Ok(Self {
            port: Some(port),
            port_id: port_id.to_string(),
            read_timeout,
            sink,
        })
    }

}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8], log: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(DeviceError::Disconnected)?;
        port.write_all(bytes)?;
        port.flush()?;
        if log {
            self.sink
                .log(String::from_utf8_lossy(bytes).trim(), LogDirection::Send);
        }
        Ok(())
    }

    fn read_until(&mut self, delimiter: u8, log: bool) -> Result<String> {
        let port = self.port.as_mut().ok_or(DeviceError::Disconnected)?;
        let deadline = Instant::now() + self.read_timeout;
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match port.read(&mut byte) {
                Ok(0) => {}
                Ok(_) => {
                    raw.push(byte[0]);
                    if byte[0] == delimiter {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(DeviceError::Io(e)),
            }

            if Instant::now() >= deadline {
                debug!("Read timed out after {} bytes", raw.len());
                return Err(DeviceError::Timeout {
                    command: String::new(),
                });
            }
        }

        let response = clean_response(&raw);
        if log {
            self.sink.log(&response, LogDirection::Receive);
        }
        Ok(response)
    }

    fn disconnect(&mut self) {
        if let Some(port) = self.port.take() {
            if let Err(e) = port.clear(ClearBuffer::All) {
                warn!("Failed to flush {} on disconnect: {}", self.port_id, e);
            }
            info!("Disconnected from {}", self.port_id);
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
