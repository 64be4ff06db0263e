//! In-memory simulated instrument
//!
//! `MockAdapter` behaves like the OSpRad firmware on the other end of the
//! serial link: settings commands (`t`, `n`, `a`) are acknowledged with an echo
//! line, measurement commands (`r`, `i`) are answered with the configured frame
//! line. Scripted replies override this behaviour one command at a time, and a
//! silent mode makes every read time out.
//!
//! All adapters opened from one [`MockTransportFactory`] share state through a
//! [`MockHandle`], so tests can inspect the commands the driver wrote.
//!
//! # Example
//!
//! ```
//! use osprad::adapters::mock::{format_frame, MockTransportFactory};
//!
//! let factory = MockTransportFactory::new();
//! factory.handle().set_frame(format_frame(1, 5, 100, 0.0, &[1000.0; 288]));
//! assert!(factory.handle().commands().is_empty());
//! ```

use super::{Transport, TransportFactory};
use crate::error::{AppResult, DaqError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A reply queued for the next command written.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Answer with this line
    Line(String),
    /// Do not answer at all
    Silence,
}

#[derive(Debug, Default)]
struct MockState {
    commands: Vec<String>,
    pending: VecDeque<String>,
    scripted: VecDeque<MockReply>,
    frame: Option<String>,
    silent: bool,
    opened: usize,
    fail_open: Option<String>,
}

/// Shared view of a simulated instrument.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Commands written so far, in order, without terminators.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Forget the recorded commands.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Line returned for `r` and `i` commands.
    pub fn set_frame(&self, line: impl Into<String>) {
        self.state.lock().frame = Some(line.into());
    }

    /// Queue a reply for the next command, ahead of the default behaviour.
    pub fn push_reply(&self, reply: MockReply) {
        self.state.lock().scripted.push_back(reply);
    }

    /// When silent, no command is ever answered.
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Make subsequent `open` calls fail with `reason`.
    pub fn fail_open(&self, reason: Option<String>) {
        self.state.lock().fail_open = reason;
    }

    /// Number of transports opened from the factory.
    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }
}

/// Transport end of the simulated instrument.
pub struct MockAdapter {
    name: String,
    handle: MockHandle,
}

impl MockAdapter {
    /// Create an adapter bound to `handle`.
    pub fn new(handle: MockHandle) -> Self {
        Self {
            name: "mock".to_string(),
            handle,
        }
    }
}

impl Transport for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        let command = String::from_utf8_lossy(bytes).trim().to_string();
        let mut state = self.handle.state.lock();
        state.commands.push(command.clone());

        if state.silent {
            return Ok(());
        }

        let reply = match state.scripted.pop_front() {
            Some(MockReply::Line(line)) => Some(line),
            Some(MockReply::Silence) => None,
            None => match command.chars().next() {
                Some('t' | 'n' | 'a') => Some(command),
                Some('r' | 'i') => state.frame.clone(),
                _ => None,
            },
        };

        if let Some(line) = reply {
            state.pending.push_back(line);
        }
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> AppResult<String> {
        self.handle
            .state
            .lock()
            .pending
            .pop_front()
            .ok_or(DaqError::ProtocolTimeout(timeout))
    }

    fn discard_input(&mut self) -> AppResult<()> {
        self.handle.state.lock().pending.clear();
        Ok(())
    }
}

/// Factory handing out [`MockAdapter`]s that share one [`MockHandle`].
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    handle: MockHandle,
}

impl MockTransportFactory {
    /// New simulated instrument with no frame configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// New simulated instrument answering measurements with `frame`.
    pub fn with_frame(frame: impl Into<String>) -> Self {
        let factory = Self::new();
        factory.handle.set_frame(frame);
        factory
    }

    /// Handle for inspecting and steering the simulated instrument.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn describe(&self) -> String {
        "mock transport".to_string()
    }

    fn open(&self) -> AppResult<Box<dyn Transport>> {
        let mut state = self.handle.state.lock();
        if let Some(reason) = &state.fail_open {
            return Err(DaqError::Connection(reason.clone()));
        }
        state.opened += 1;
        drop(state);
        Ok(Box::new(MockAdapter::new(self.handle.clone())))
    }
}

/// Build a measurement response line the way the firmware formats it.
///
/// The reserved second field is always zero.
pub fn format_frame(
    unit_number: u32,
    num_scans: u32,
    integration_time_ms: u32,
    saturation_percent: f64,
    raw_counts: &[f64],
) -> String {
    let mut fields = vec![
        unit_number.to_string(),
        "0".to_string(),
        num_scans.to_string(),
        integration_time_ms.to_string(),
        saturation_percent.to_string(),
    ];
    fields.extend(raw_counts.iter().map(|c| c.to_string()));
    fields.join(",")
}
