//! Byte-stream transports
//!
//! This module defines the [`Transport`] trait, the low-level I/O seam between
//! the device driver and the physical link, and the [`TransportFactory`] that
//! opens one. The factory is chosen explicitly by whoever builds the device;
//! nothing in the driver inspects the environment to pick a link.

pub mod mock;
pub mod serial_adapter;

pub use mock::{MockAdapter, MockTransportFactory};
pub use serial_adapter::{SerialAdapter, SerialTransportFactory};

use crate::error::AppResult;
use std::time::Duration;

/// A half-duplex, line-oriented byte channel to the instrument.
///
/// Implementations block the caller; the protocol never has more than one
/// exchange in flight.
pub trait Transport: Send {
    /// Short identifier used in log messages
    fn name(&self) -> &str;

    /// Write `bytes` and flush.
    fn write(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Read one newline-terminated line, without the terminator.
    ///
    /// Returns [`DaqError::ProtocolTimeout`](crate::error::DaqError::ProtocolTimeout)
    /// if no complete line arrives within `timeout`.
    fn read_line(&mut self, timeout: Duration) -> AppResult<String>;

    /// Drop any bytes received but not yet read, e.g. a late reply before a retry.
    fn discard_input(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// Opens transports for a device.
pub trait TransportFactory: Send {
    /// Human-readable description of the link, e.g. the port name
    fn describe(&self) -> String;

    /// Open a new transport.
    fn open(&self) -> AppResult<Box<dyn Transport>>;
}
