//! Serial transport over the `serialport` crate.
//!
//! The OSpRad enumerates as a USB CDC serial device. The port is either given
//! explicitly or, when omitted, the first port reported by the operating
//! system is used.

use super::{Transport, TransportFactory};
use crate::error::{AppResult, DaqError};
use std::time::Duration;
#[cfg(feature = "instrument_serial")]
use std::time::Instant;
#[cfg(feature = "instrument_serial")]
use tracing::{debug, info};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Poll interval of the underlying port; the overall deadline is enforced on top.
#[cfg(feature = "instrument_serial")]
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest accepted response line. A full frame is under 4 KiB.
#[cfg(feature = "instrument_serial")]
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Serial adapter for the device's USB serial link.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (115200 for the OSpRad firmware)
    baud_rate: u32,

    #[cfg(feature = "instrument_serial")]
    port: Box<dyn SerialPort>,
}

impl SerialAdapter {
    /// Open `port_name` at `baud_rate`.
    #[cfg(feature = "instrument_serial")]
    pub fn open(port_name: &str, baud_rate: u32) -> AppResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(PORT_POLL_TIMEOUT)
            .open()
            .map_err(|e| {
                DaqError::Connection(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    port_name, baud_rate, e
                ))
            })?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            port,
        })
    }

    /// Open `port_name` at `baud_rate`.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(_port_name: &str, _baud_rate: u32) -> AppResult<Self> {
        Err(DaqError::SerialFeatureDisabled)
    }

    /// Port this adapter talks to.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// List the serial ports known to the operating system.
#[cfg(feature = "instrument_serial")]
pub fn list_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| DaqError::Connection(format!("Failed to enumerate serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// List the serial ports known to the operating system.
#[cfg(not(feature = "instrument_serial"))]
pub fn list_ports() -> AppResult<Vec<String>> {
    Err(DaqError::SerialFeatureDisabled)
}

#[cfg(feature = "instrument_serial")]
impl Transport for SerialAdapter {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        use std::io::Write;

        self.port.write_all(bytes)?;
        self.port.flush()?;
        debug!(
            "[{}] Sent: {}",
            self.port_name,
            String::from_utf8_lossy(bytes).trim()
        );
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> AppResult<String> {
        use std::io::Read;

        let start = Instant::now();
        let mut line: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            if start.elapsed() > timeout {
                return Err(DaqError::ProtocolTimeout(timeout));
            }

            match self.port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    line.push(byte[0]);
                    if line.len() > MAX_LINE_BYTES {
                        return Err(DaqError::Protocol(format!(
                            "response line exceeds {} bytes",
                            MAX_LINE_BYTES
                        )));
                    }
                }
                Ok(_) => {
                    return Err(DaqError::Connection(format!(
                        "Unexpected EOF from serial port '{}'",
                        self.port_name
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // port poll interval is shorter than our deadline
                    continue;
                }
                Err(e) => return Err(DaqError::Io(e)),
            }
        }

        let response = String::from_utf8_lossy(&line).trim().to_string();
        debug!(
            "[{}] Received {} bytes in {:?}",
            self.port_name,
            line.len(),
            start.elapsed()
        );
        Ok(response)
    }

    fn discard_input(&mut self) -> AppResult<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| DaqError::Connection(format!("Failed to clear input buffer: {}", e)))
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Transport for SerialAdapter {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn write(&mut self, _bytes: &[u8]) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn read_line(&mut self, _timeout: Duration) -> AppResult<String> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

/// Opens [`SerialAdapter`]s for an explicit or auto-detected port.
#[derive(Debug, Clone)]
pub struct SerialTransportFactory {
    port: Option<String>,
    baud_rate: u32,
}

impl SerialTransportFactory {
    /// Factory for `port`, or for the first available port when `None`.
    pub fn new(port: Option<String>, baud_rate: u32) -> Self {
        Self { port, baud_rate }
    }

    fn resolve_port(&self) -> AppResult<String> {
        if let Some(port) = &self.port {
            return Ok(port.clone());
        }
        let ports = list_ports()?;
        #[cfg(feature = "instrument_serial")]
        info!("Available ports: {:?}", ports);
        ports
            .into_iter()
            .next()
            .ok_or_else(|| DaqError::Connection("No serial ports found".to_string()))
    }
}

impl TransportFactory for SerialTransportFactory {
    fn describe(&self) -> String {
        match &self.port {
            Some(port) => format!("serial {} @ {} baud", port, self.baud_rate),
            None => format!("serial <first available> @ {} baud", self.baud_rate),
        }
    }

    fn open(&self) -> AppResult<Box<dyn Transport>> {
        let port = self.resolve_port()?;
        let adapter = SerialAdapter::open(&port, self.baud_rate)?;
        Ok(Box::new(adapter))
    }
}
