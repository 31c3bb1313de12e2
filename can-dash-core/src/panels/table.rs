//! Frame table panel
//!
//! One row per CAN identifier seen in raw frames, with the cycle time since
//! the previous frame of the same identifier. When a signal database is
//! supplied, raw-frame rows take their message name from it. Decoded signals
//! fill in the message name and per-signal child values of rows that already
//! exist.

use super::PanelUpdate;
use crate::panel::{PanelConf, SignalFilter};
use crate::signals::SignalDatabase;
use crate::types::{DecodedSignal, Frame, HubEvent};
use std::collections::BTreeMap;

/// One table row
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub identifier: u32,
    pub bus_name: String,
    pub message_name: Option<String>,
    /// Milliseconds since the previous frame with this identifier
    pub cycle_ms: Option<f64>,
    pub dlc: usize,
    pub data_hex: String,
    /// Latest decoded values, in first-seen order
    pub signals: Vec<(String, f64)>,
    last_timestamp: f64,
}

impl TableRow {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            identifier: frame.identifier,
            bus_name: frame.bus_name.clone(),
            message_name: None,
            cycle_ms: None,
            dlc: frame.dlc(),
            data_hex: frame.payload_hex(),
            signals: Vec::new(),
            last_timestamp: frame.timestamp,
        }
    }

    /// Identifier formatted for the ID column
    pub fn id_hex(&self) -> String {
        format!("0x{:03X}", self.identifier)
    }

    fn update_frame(&mut self, frame: &Frame) {
        self.cycle_ms = Some((frame.timestamp - self.last_timestamp) * 1000.0);
        self.last_timestamp = frame.timestamp;
        self.bus_name = frame.bus_name.clone();
        self.dlc = frame.dlc();
        self.data_hex = frame.payload_hex();
    }

    fn update_signal(&mut self, signal: &DecodedSignal) {
        self.message_name = Some(signal.message_name.clone());
        match self.signals.iter_mut().find(|(name, _)| *name == signal.signal_name) {
            Some(entry) => entry.1 = signal.value,
            None => self.signals.push((signal.signal_name.clone(), signal.value)),
        }
    }
}

#[derive(Debug)]
pub struct TablePanel {
    conf: PanelConf,
    filter: SignalFilter,
    rows: BTreeMap<u32, TableRow>,
}

impl TablePanel {
    pub fn new(conf: PanelConf) -> Self {
        let filter = conf.filter();
        Self {
            conf,
            filter,
            rows: BTreeMap::new(),
        }
    }

    pub fn conf(&self) -> &PanelConf {
        &self.conf
    }

    /// Rows sorted by identifier
    pub fn rows(&self) -> impl Iterator<Item = &TableRow> {
        self.rows.values()
    }

    pub fn row(&self, identifier: u32) -> Option<&TableRow> {
        self.rows.get(&identifier)
    }

    pub fn handle(&mut self, event: &HubEvent) -> Option<PanelUpdate> {
        self.handle_with_database(event, None)
    }

    /// Like [`handle`](Self::handle), naming raw-frame rows from `database`
    pub fn handle_with_database(
        &mut self,
        event: &HubEvent,
        database: Option<&SignalDatabase>,
    ) -> Option<PanelUpdate> {
        if !self.filter.bus_match(event.bus_name()) {
            return None;
        }

        let row = match event {
            HubEvent::RawFrame(frame) => {
                let row = self
                    .rows
                    .entry(frame.identifier)
                    .and_modify(|row| row.update_frame(frame))
                    .or_insert_with(|| TableRow::from_frame(frame));
                if row.message_name.is_none() {
                    row.message_name = database
                        .and_then(|db| db.lookup(frame.identifier))
                        .map(|msg| msg.name.clone());
                }
                row
            }
            HubEvent::Signal(signal) => {
                if !self.filter.signal_match(&signal.message_name, &signal.signal_name) {
                    return None;
                }
                let row = self.rows.get_mut(&signal.identifier)?;
                row.update_signal(signal);
                row
            }
        };

        Some(PanelUpdate::TableRow(row.clone()))
    }
}
