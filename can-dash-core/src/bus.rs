//! Bus connections
//!
//! The core only depends on the [`BusConnection`] capability: blocking
//! receive with a timeout, plus shutdown. Physical adapters plug in through
//! a [`BusConnector`]; the built-in connector provides the in-process
//! virtual network and candump log replay.

use crate::replay::ReplayConnection;
use crate::types::{DashError, Result};
use crate::virtual_bus::VirtualNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Maximum number of buses running at the same time
pub const MAX_BUSES: usize = 3;

/// Kind of adapter a bus is opened through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// In-process virtual bus
    Virtual,
    /// PEAK PCAN adapter
    Pcan,
    /// Linux SocketCAN interface
    Socketcan,
    /// Replay of a candump log file; the channel is the file path
    Replay,
}

impl InterfaceKind {
    /// Channel names worth trying when the configured channel fails to open
    pub fn candidate_channels(&self) -> Vec<String> {
        match self {
            InterfaceKind::Pcan => (1..=8).map(|i| format!("PCAN_USBBUS{}", i)).collect(),
            InterfaceKind::Socketcan => (0..4).map(|i| format!("can{}", i)).collect(),
            InterfaceKind::Virtual | InterfaceKind::Replay => Vec::new(),
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceKind::Virtual => write!(f, "virtual"),
            InterfaceKind::Pcan => write!(f, "pcan"),
            InterfaceKind::Socketcan => write!(f, "socketcan"),
            InterfaceKind::Replay => write!(f, "replay"),
        }
    }
}

/// Configuration of one bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConf {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interface")]
    pub interface: InterfaceKind,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    /// Friendly name; stamped on every frame from this bus
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_interface() -> InterfaceKind {
    InterfaceKind::Virtual
}

fn default_channel() -> String {
    "vcan0".to_string()
}

fn default_bitrate() -> u32 {
    500_000
}

fn default_name() -> String {
    "BUS1".to_string()
}

impl Default for BusConf {
    fn default() -> Self {
        Self {
            enabled: false,
            interface: default_interface(),
            channel: default_channel(),
            bitrate: default_bitrate(),
            name: default_name(),
        }
    }
}

impl BusConf {
    pub fn new(name: impl Into<String>, interface: InterfaceKind, channel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface,
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Builder method: enable or disable the bus
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder method: set the bitrate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }
}

/// A frame as delivered by a connection, before the reader timestamps it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub identifier: u32,
    pub payload: Vec<u8>,
    pub is_error: bool,
}

impl ReceivedFrame {
    pub fn new(identifier: u32, payload: Vec<u8>) -> Self {
        Self {
            identifier,
            payload,
            is_error: false,
        }
    }
}

/// An open channel to one bus
pub trait BusConnection: Send + Sync {
    /// Block for at most `timeout` waiting for a frame.
    ///
    /// `Ok(None)` means the timeout elapsed. Errors are transport failures
    /// (`TransientIoError`) and may clear on their own.
    fn receive(&self, timeout: Duration) -> Result<Option<ReceivedFrame>>;

    /// Release the underlying adapter
    fn shutdown(&self);
}

/// Opens bus connections from configuration
pub trait BusConnector: Send + Sync {
    /// Open a connection, failing with `ConnectError`
    fn open(&self, conf: &BusConf) -> Result<Arc<dyn BusConnection>>;

    /// Return the first candidate channel that can be opened
    fn find_channel(&self, conf: &BusConf, candidates: &[String]) -> Option<String> {
        candidates.iter().find_map(|channel| {
            let trial = BusConf {
                channel: channel.clone(),
                ..conf.clone()
            };
            match self.open(&trial) {
                Ok(connection) => {
                    connection.shutdown();
                    log::info!("Channel available: {} {}", conf.interface, channel);
                    Some(channel.clone())
                }
                Err(e) => {
                    log::debug!("Channel unavailable: {} {} -> {}", conf.interface, channel, e);
                    None
                }
            }
        })
    }
}

/// Connector for the interfaces that need no external adapter
#[derive(Clone, Default)]
pub struct DefaultConnector {
    network: VirtualNetwork,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector attached to an existing virtual network
    pub fn with_network(network: VirtualNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &VirtualNetwork {
        &self.network
    }
}

impl BusConnector for DefaultConnector {
    fn open(&self, conf: &BusConf) -> Result<Arc<dyn BusConnection>> {
        match conf.interface {
            InterfaceKind::Virtual => Ok(Arc::new(self.network.connect(&conf.channel))),
            InterfaceKind::Replay => {
                let connection = ReplayConnection::open(Path::new(&conf.channel))?;
                Ok(Arc::new(connection))
            }
            other => Err(DashError::ConnectError(format!(
                "{}: no adapter available for interface '{}' (channel {})",
                conf.name, other, conf.channel
            ))),
        }
    }
}
