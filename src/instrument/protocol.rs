//! OSpRad serial command protocol
//!
//! Protocol Overview:
//! - Command: a single ASCII character, optionally followed by a decimal integer
//! - Settings commands (`t`, `n`, `a`) are answered with one acknowledgment line
//! - Measurement commands (`r`, `i`) are answered with one comma-separated line
//!   of floating-point fields:
//!
//! ```text
//! unit_number, <reserved>, num_scans, actual_integration_time_ms, saturation_percent,
//! raw_count[0], ..., raw_count[287]
//! ```
//!
//! - Timing: half-duplex request/response, one exchange in flight at a time
//!
//! The firmware itself has no timeout; a silent device is detected here with a
//! per-exchange deadline and a bounded number of attempts.

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use crate::instrument::SENSOR_PIXELS;
use crate::measurement::MeasurementKind;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Fields preceding the raw counts in a measurement frame.
pub const FRAME_HEADER_FIELDS: usize = 5;

/// Total field count of a well-formed measurement frame.
pub const FRAME_FIELDS: usize = FRAME_HEADER_FIELDS + SENSOR_PIXELS;

/// Commands understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `t<ms>`: integration time, 0 = automatic
    SetIntegrationTime(u32),
    /// `n<count>`: minimum number of scans averaged
    SetMinScans(u32),
    /// `a<count>`: maximum number of scans averaged
    SetMaxScans(u32),
    /// `r` or `i`: acquire and return one frame
    Measure(MeasurementKind),
}

impl Command {
    /// Wire representation, without terminator.
    pub fn encode(&self) -> String {
        match self {
            Command::SetIntegrationTime(ms) => format!("t{}", ms),
            Command::SetMinScans(n) => format!("n{}", n),
            Command::SetMaxScans(n) => format!("a{}", n),
            Command::Measure(kind) => kind.command_char().to_string(),
        }
    }

    /// Whether the command may be written again after a timeout.
    ///
    /// A second `r` or `i` starts another acquisition whose frame would be
    /// left unread, so measurements are never resent.
    pub fn is_resendable(&self) -> bool {
        !matches!(self, Command::Measure(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Defines a policy for retrying an exchange the device did not answer.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::ZERO,
        }
    }
}

/// Framing and timing shared by every exchange on one link.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolOptions {
    /// Retry policy for silent exchanges
    pub retry: RetryPolicy,
    /// Deadline for a settings acknowledgment
    pub ack_timeout: Duration,
    /// Deadline for a measurement frame
    pub response_timeout: Duration,
    /// Appended to each command
    pub terminator: String,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            ack_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(120),
            terminator: String::new(),
        }
    }
}

/// One unprocessed measurement frame as reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Calibration unit number of the reporting device
    pub unit_number: u32,
    /// Scans averaged by the device
    pub num_scans_averaged: u32,
    /// Integration time the device actually used
    pub actual_integration_time_ms: u32,
    /// Share of saturated pixels, in percent
    pub saturation_percent: f64,
    /// One averaged count per pixel
    pub raw_counts: Vec<f64>,
}

impl RawFrame {
    /// Parse a response line.
    pub fn parse(line: &str) -> AppResult<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(DaqError::Protocol("empty response line".to_string()));
        }

        let fields = trimmed
            .split(',')
            .enumerate()
            .map(|(i, field)| {
                field.trim().parse::<f64>().map_err(|_| {
                    DaqError::Protocol(format!("field {} is not a number: '{}'", i, field.trim()))
                })
            })
            .collect::<AppResult<Vec<f64>>>()?;

        Self::from_fields(&fields)
    }

    /// Interpret already-parsed fields.
    pub fn from_fields(fields: &[f64]) -> AppResult<Self> {
        if fields.len() < FRAME_FIELDS {
            return Err(DaqError::Protocol(format!(
                "incomplete frame: {} fields, expected {}",
                fields.len(),
                FRAME_FIELDS
            )));
        }

        let raw_counts = fields[FRAME_HEADER_FIELDS..].to_vec();
        if raw_counts.len() != SENSOR_PIXELS {
            return Err(DaqError::Protocol(format!(
                "spectrum length mismatch: {} counts, expected {}",
                raw_counts.len(),
                SENSOR_PIXELS
            )));
        }

        let saturation_percent = fields[4];
        if !saturation_percent.is_finite() {
            return Err(DaqError::Protocol(format!(
                "saturation is not finite: {}",
                saturation_percent
            )));
        }

        Ok(Self {
            unit_number: header_integer(fields[0], "unit number")?,
            num_scans_averaged: header_integer(fields[2], "scan count")?,
            actual_integration_time_ms: header_integer(fields[3], "integration time")?,
            saturation_percent,
            raw_counts,
        })
    }
}

/// Header fields arrive as floats; truncate like the firmware's integer fields.
fn header_integer(value: f64, what: &str) -> AppResult<u32> {
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return Err(DaqError::Protocol(format!("invalid {}: {}", what, value)));
    }
    Ok(value.trunc() as u32)
}

/// Write `command` and read one line, retrying while the device stays silent.
///
/// Settings commands are written again on each retry. Measurement commands
/// are written once and later attempts only wait again, so a late frame is
/// still taken as the answer.
fn exchange(
    transport: &mut dyn Transport,
    command: &Command,
    options: &ProtocolOptions,
    timeout: Duration,
) -> AppResult<String> {
    let payload = format!("{}{}", command.encode(), options.terminator);
    let attempts = options.retry.max_attempts.max(1);
    let mut last_error = DaqError::ProtocolTimeout(timeout);

    // half-duplex: nothing received before this write can answer it
    transport.discard_input()?;
    transport.write(payload.as_bytes())?;
    debug!("[{}] Sent command: {}", transport.name(), command);

    for attempt in 1..=attempts {
        match transport.read_line(timeout) {
            Ok(line) => return Ok(line),
            Err(e) if e.is_timeout() => {
                warn!(
                    "[{}] No response to '{}' (attempt {}/{})",
                    transport.name(),
                    command,
                    attempt,
                    attempts
                );
                last_error = e;
            }
            Err(e) => return Err(e),
        }

        if attempt < attempts && command.is_resendable() {
            std::thread::sleep(options.retry.backoff_delay);
            transport.discard_input()?;
            transport.write(payload.as_bytes())?;
            debug!("[{}] Resent command: {}", transport.name(), command);
        }
    }

    Err(last_error)
}

/// Send a settings command and wait for its acknowledgment.
///
/// The acknowledgment content is not interpreted.
pub fn send(
    transport: &mut dyn Transport,
    command: &Command,
    options: &ProtocolOptions,
) -> AppResult<()> {
    let ack = exchange(transport, command, options, options.ack_timeout)?;
    debug!("[{}] Ack for '{}': {}", transport.name(), command, ack);
    Ok(())
}

/// Send a measurement command and parse the returned frame.
pub fn request(
    transport: &mut dyn Transport,
    command: &Command,
    options: &ProtocolOptions,
) -> AppResult<RawFrame> {
    let line = exchange(transport, command, options, options.response_timeout)?;
    RawFrame::parse(&line)
}
