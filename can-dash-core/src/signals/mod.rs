//! Signal database and DBC parser
//!
//! This module contains the DBC parser and the identifier-indexed signal
//! database the hub decodes against.

pub mod database;
pub mod dbc;

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, MessageDefinition, MultiplexerInfo, SignalDatabase,
    SignalDefinition, ValueType,
};
