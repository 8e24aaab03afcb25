//! GPIO output line abstraction.
//!
//! Actuator drivers hold [`OutputLine`] handles and never talk to a chip
//! directly. A [`HardwareContext`] owns the backend, claims lines on
//! behalf of the drivers at startup, and refuses to hand out the same
//! line twice. Claim failures are configuration errors surfaced before
//! any motion happens.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

/// GPIO access failure.
#[derive(Error, Debug)]
pub enum GpioError {
    /// The line could not be claimed. Fatal at startup.
    #[error("GPIO line {line} unavailable: {reason}")]
    Unavailable { line: u32, reason: String },

    /// A level write on an already-claimed line failed.
    #[error("write failed on GPIO line {line}: {reason}")]
    Write { line: u32, reason: String },
}

/// A single claimed digital output line.
pub trait OutputLine: Send {
    /// Chip-relative line offset, for diagnostics.
    fn line(&self) -> u32;

    /// Drive the line high or low.
    fn set(&mut self, high: bool) -> Result<(), GpioError>;
}

/// Backend that can claim output lines from some GPIO provider.
pub trait GpioBackend: Send {
    fn claim_output(
        &mut self,
        line: u32,
        consumer: &str,
    ) -> Result<Box<dyn OutputLine>, GpioError>;
}

/// Owns the GPIO backend for the lifetime of a session.
///
/// All actuators are constructed against one context; dropping the
/// context (after the actuators) releases every claimed line.
pub struct HardwareContext {
    backend: Box<dyn GpioBackend>,
    claimed: HashSet<u32>,
}

impl HardwareContext {
    pub fn new(backend: Box<dyn GpioBackend>) -> Self {
        Self {
            backend,
            claimed: HashSet::new(),
        }
    }

    /// Claim a line as an output, initialized low.
    ///
    /// # Errors
    /// Returns [`GpioError::Unavailable`] if the line is already claimed
    /// or the backend refuses it.
    pub fn claim_output(
        &mut self,
        line: u32,
        consumer: &str,
    ) -> Result<Box<dyn OutputLine>, GpioError> {
        if !self.claimed.insert(line) {
            return Err(GpioError::Unavailable {
                line,
                reason: "already claimed".to_string(),
            });
        }
        debug!(line, consumer, "claiming GPIO output");
        self.backend.claim_output(line, consumer)
    }
}

/// One recorded level change on a mock line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub line: u32,
    pub level: bool,
}

/// Shared event log for a [`MockBackend`].
#[derive(Debug, Clone, Default)]
pub struct PinLog {
    events: Arc<Mutex<Vec<PinEvent>>>,
}

impl PinLog {
    fn push(&self, event: PinEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// All level changes in issue order.
    pub fn events(&self) -> Vec<PinEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Count of low-to-high transitions on a line.
    pub fn rising_edges(&self, line: u32) -> usize {
        let events = self.events.lock().unwrap();
        let mut level = false;
        let mut edges = 0;
        for event in events.iter().filter(|e| e.line == line) {
            if event.level && !level {
                edges += 1;
            }
            level = event.level;
        }
        edges
    }

    /// Last level driven onto a line, if any write happened.
    pub fn last_level(&self, line: u32) -> Option<bool> {
        let events = self.events.lock().unwrap();
        events.iter().rev().find(|e| e.line == line).map(|e| e.level)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

struct MockLine {
    line: u32,
    log: PinLog,
}

impl OutputLine for MockLine {
    fn line(&self) -> u32 {
        self.line
    }

    fn set(&mut self, high: bool) -> Result<(), GpioError> {
        self.log.push(PinEvent {
            line: self.line,
            level: high,
        });
        Ok(())
    }
}

/// Recording backend for tests and dry runs.
///
/// Every claimed line writes into a shared [`PinLog`], so a test can
/// count pulse edges or check the final level of an enable line.
#[derive(Default)]
pub struct MockBackend {
    log: PinLog,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the shared event log. Valid across all claimed lines.
    pub fn log(&self) -> PinLog {
        self.log.clone()
    }
}

impl GpioBackend for MockBackend {
    fn claim_output(
        &mut self,
        line: u32,
        _consumer: &str,
    ) -> Result<Box<dyn OutputLine>, GpioError> {
        Ok(Box::new(MockLine {
            line,
            log: self.log.clone(),
        }))
    }
}

/// Character-device backend for real hardware.
#[cfg(target_os = "linux")]
pub use linux::GpiodBackend;

#[cfg(target_os = "linux")]
mod linux {
    use super::{GpioBackend, GpioError, OutputLine};
    use gpiod::{Chip, Lines, Options, Output};

    /// Backend over a `/dev/gpiochipN` character device.
    pub struct GpiodBackend {
        chip: Chip,
    }

    impl GpiodBackend {
        /// Open a GPIO chip by name, e.g. `"gpiochip0"`.
        pub fn open(chip_name: &str) -> Result<Self, GpioError> {
            let chip = Chip::new(chip_name).map_err(|e| GpioError::Unavailable {
                line: 0,
                reason: format!("failed to open chip {chip_name}: {e}"),
            })?;
            Ok(Self { chip })
        }
    }

    struct GpiodLine {
        line: u32,
        request: Lines<Output>,
    }

    impl OutputLine for GpiodLine {
        fn line(&self) -> u32 {
            self.line
        }

        fn set(&mut self, high: bool) -> Result<(), GpioError> {
            self.request
                .set_values([high])
                .map_err(|e| GpioError::Write {
                    line: self.line,
                    reason: e.to_string(),
                })
        }
    }

    impl GpioBackend for GpiodBackend {
        fn claim_output(
            &mut self,
            line: u32,
            consumer: &str,
        ) -> Result<Box<dyn OutputLine>, GpioError> {
            let options = Options::output([line]).values([false]).consumer(consumer);
            let request = self
                .chip
                .request_lines(options)
                .map_err(|e| GpioError::Unavailable {
                    line,
                    reason: e.to_string(),
                })?;
            Ok(Box::new(GpiodLine { line, request }))
        }
    }
}
