//! Core types for the dashboard pipeline
//!
//! Frames flow from bus readers into the hub, which turns them into
//! broadcast events. Everything here is a plain value: frames are
//! immutable once built and events are never persisted.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Wall-clock timestamp used for status reports
pub type Timestamp = DateTime<Utc>;

/// Result type for dashboard core operations
pub type Result<T> = std::result::Result<T, DashError>;

/// Errors that can occur in the dashboard core
#[derive(Debug, thiserror::Error)]
pub enum DashError {
    #[error("Failed to open bus: {0}")]
    ConnectError(String),

    #[error("Bus transport error: {0}")]
    TransientIoError(String),

    #[error("Failed to load signal database: {0}")]
    DatabaseLoadError(String),

    #[error("Failed to decode frame: {0}")]
    DecodeError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

static CLOCK_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed on the process-wide monotonic clock.
///
/// All frame timestamps share this origin, so values from different buses
/// are directly comparable.
pub fn monotonic_now() -> f64 {
    CLOCK_ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Raw CAN frame as received from one bus
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Name of the bus this frame arrived on
    pub bus_name: String,
    /// CAN identifier (11-bit or 29-bit)
    pub identifier: u32,
    /// Payload bytes (0-8 for classic CAN, up to 64 for CAN-FD)
    pub payload: Vec<u8>,
    /// Arrival time in monotonic seconds
    pub timestamp: f64,
    /// True if the adapter flagged this as an error frame
    pub is_error: bool,
}

impl Frame {
    pub fn new(bus_name: impl Into<String>, identifier: u32, payload: Vec<u8>, timestamp: f64) -> Self {
        Self {
            bus_name: bus_name.into(),
            identifier,
            payload,
            timestamp,
            is_error: false,
        }
    }

    /// Mark the frame as an error frame
    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    /// Get the data length code (DLC) - number of payload bytes
    pub fn dlc(&self) -> usize {
        self.payload.len()
    }

    /// Payload formatted as space-separated upper-case hex
    pub fn payload_hex(&self) -> String {
        self.payload
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One physical signal value decoded from a frame
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    pub bus_name: String,
    pub identifier: u32,
    pub message_name: String,
    pub signal_name: String,
    pub value: f64,
    /// Timestamp of the frame the value was decoded from
    pub timestamp: f64,
}

/// Event broadcast by the frame hub
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A raw frame, emitted before any decoding
    RawFrame(Frame),
    /// A decoded signal value
    Signal(DecodedSignal),
}

impl HubEvent {
    /// Name of the bus the event originated from
    pub fn bus_name(&self) -> &str {
        match self {
            HubEvent::RawFrame(frame) => &frame.bus_name,
            HubEvent::Signal(signal) => &signal.bus_name,
        }
    }

    /// Get the CAN identifier of this event
    pub fn identifier(&self) -> u32 {
        match self {
            HubEvent::RawFrame(frame) => frame.identifier,
            HubEvent::Signal(signal) => signal.identifier,
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> f64 {
        match self {
            HubEvent::RawFrame(frame) => frame.timestamp,
            HubEvent::Signal(signal) => signal.timestamp,
        }
    }
}

impl fmt::Display for HubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubEvent::RawFrame(frame) => write!(
                f,
                "{} 0x{:03X} [{}] {}",
                frame.bus_name,
                frame.identifier,
                frame.dlc(),
                frame.payload_hex()
            ),
            HubEvent::Signal(signal) => write!(
                f,
                "{} {}.{} = {}",
                signal.bus_name, signal.message_name, signal.signal_name, signal.value
            ),
        }
    }
}
