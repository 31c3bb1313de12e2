//! Signal database
//!
//! Maps CAN identifiers to message definitions loaded from a DBC file.
//! A database is immutable once built; reloading produces a new instance
//! that the hub swaps in as a whole.

use crate::types::Result;
use std::collections::HashMap;
use std::path::Path;

/// One `BO_` entry: a frame layout and the signals packed into it
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    /// Identifier with the DBC extended-frame flag removed
    pub id: u32,
    pub name: String,
    /// Payload length the layout was written for; decoding pads or truncates to it
    pub size: usize,
    pub sender: Option<String>,
    /// In `SG_` order, which is also the order decoded values are emitted in
    pub signals: Vec<SignalDefinition>,
    pub is_multiplexed: bool,
    /// Name of the `M` switch signal
    pub multiplexer_signal: Option<String>,
}

/// One `SG_` entry
#[derive(Debug, Clone)]
pub struct SignalDefinition {
    pub name: String,
    /// DBC start bit: LSB for Intel signals, MSB for Motorola signals
    pub start_bit: u16,
    pub length: u16,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
    /// physical = raw * factor + offset
    pub factor: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    pub unit: Option<String>,
    /// Set for `mN` signals
    pub multiplexer_info: Option<MultiplexerInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Intel, `@1`
    LittleEndian,
    /// Motorola, `@0`
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Signed,
    Unsigned,
}

/// Switch values under which a multiplexed signal is present
#[derive(Debug, Clone)]
pub struct MultiplexerInfo {
    pub multiplexer_signal: String,
    pub multiplexer_values: Vec<u64>,
}

/// Identifier-indexed signal database
#[derive(Debug, Default)]
pub struct SignalDatabase {
    /// Key: CAN ID. A later definition with the same ID replaces the earlier one.
    messages: HashMap<u32, MessageDefinition>,

    /// Key: message name, Value: CAN ID
    message_lookup: HashMap<String, u32>,

    /// File the definitions were loaded from, if any
    source: Option<String>,
}

impl SignalDatabase {
    /// Empty database; every lookup misses
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a DBC file into a fresh database.
    ///
    /// Fails with `DatabaseLoadError` on unreadable or malformed input.
    pub fn load(path: &Path) -> Result<Self> {
        let messages = super::dbc::parse_dbc_file(path)?;

        let mut db = Self::from_messages(messages);
        db.source = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        log::info!(
            "Signal database loaded from {:?}: {} messages, {} signals",
            path,
            db.stats().num_messages,
            db.stats().num_signals
        );
        Ok(db)
    }

    /// Build a database from already-parsed message definitions
    pub fn from_messages(messages: impl IntoIterator<Item = MessageDefinition>) -> Self {
        let mut db = Self::new();
        for message in messages {
            db.add_message(message);
        }
        db
    }

    /// Add a message definition, replacing any previous one with the same ID
    pub fn add_message(&mut self, message: MessageDefinition) {
        if let Some(previous) = self.messages.get(&message.id) {
            log::debug!(
                "Message 0x{:X} redefined: '{}' replaces '{}'",
                message.id,
                message.name,
                previous.name
            );
            self.message_lookup.remove(&previous.name);
        }

        self.message_lookup.insert(message.name.clone(), message.id);
        self.messages.insert(message.id, message);
    }

    /// Look up the message definition for a CAN ID
    pub fn lookup(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.messages.get(&can_id)
    }

    /// Look up a message definition by name
    pub fn lookup_by_name(&self, message_name: &str) -> Option<&MessageDefinition> {
        self.message_lookup
            .get(message_name)
            .and_then(|can_id| self.messages.get(can_id))
    }

    /// Iterate over all message definitions (unordered)
    pub fn messages(&self) -> impl Iterator<Item = &MessageDefinition> {
        self.messages.values()
    }

    /// File name the database was loaded from
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Message and signal counts
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|msg| msg.signals.len()).sum(),
        }
    }

    /// Defined identifiers in ascending order
    pub fn can_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.messages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Counts reported after a database load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub num_messages: usize,
    pub num_signals: usize,
}
