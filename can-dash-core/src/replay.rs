//! Candump log replay
//!
//! Replays a `candump -l` style log as a bus connection, pacing frames by
//! their recorded timestamps:
//!
//! ```text
//! (1436509052.249713) vcan0 044#2A366C2BBA
//! (1436509052.449847) vcan0 1F334455#R
//! (1436509052.650004) vcan0 123##1DEADBEEF
//! ```

use crate::bus::{BusConnection, ReceivedFrame};
use crate::types::{DashError, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Error flag in the 32-bit candump identifier
const CAN_ERR_FLAG: u32 = 0x2000_0000;
const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// One parsed candump line
#[derive(Debug, Clone, PartialEq)]
pub struct CandumpRecord {
    pub timestamp: f64,
    pub interface: String,
    pub frame: ReceivedFrame,
}

/// Parse one candump log line; returns None for blank or malformed lines
pub fn parse_candump_line(line: &str) -> Option<CandumpRecord> {
    let mut parts = line.split_whitespace();
    let timestamp = parts
        .next()?
        .strip_prefix('(')?
        .strip_suffix(')')?
        .parse::<f64>()
        .ok()
        .filter(|ts| ts.is_finite())?;
    let interface = parts.next()?.to_string();
    let (id_text, data_text) = parts.next()?.split_once('#')?;

    let raw_id = u32::from_str_radix(id_text, 16).ok()?;
    let is_error = id_text.len() == 8 && raw_id & CAN_ERR_FLAG != 0;
    let identifier = raw_id & CAN_EFF_MASK;

    let data_hex = if let Some(fd) = data_text.strip_prefix('#') {
        // CAN-FD: one flags nibble precedes the data
        fd.get(1..).unwrap_or("")
    } else if data_text.starts_with('R') {
        ""
    } else {
        data_text
    };

    let payload = decode_hex(data_hex)?;

    Some(CandumpRecord {
        timestamp,
        interface,
        frame: ReceivedFrame {
            identifier,
            payload,
            is_error,
        },
    })
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let text: String = text.chars().filter(|c| *c != '.').collect();
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

struct ReplayState {
    pending: VecDeque<CandumpRecord>,
    /// Wall-clock instant matching the first record's timestamp
    origin: Option<(Instant, f64)>,
}

/// Bus connection that plays back a candump log once
pub struct ReplayConnection {
    state: Mutex<ReplayState>,
    closed: AtomicBool,
}

impl ReplayConnection {
    /// Open and parse a log file; fails with `ConnectError` if unreadable
    pub fn open(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DashError::ConnectError(format!("Failed to read replay log {:?}: {}", path, e))
        })?;
        let connection = Self::from_log(&content);
        log::info!(
            "Replay log {:?} loaded: {} frames",
            path,
            connection.remaining()
        );
        Ok(connection)
    }

    /// Build a replay from log text, skipping lines that do not parse
    pub fn from_log(content: &str) -> Self {
        let mut pending = VecDeque::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_candump_line(line) {
                Some(record) => pending.push_back(record),
                None => log::debug!("Skipping malformed replay line {}: {:?}", line_no + 1, line),
            }
        }

        Self {
            state: Mutex::new(ReplayState {
                pending,
                origin: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Frames not yet delivered
    pub fn remaining(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time until the next frame is due, or None when the log is exhausted.
    ///
    /// A gap too large to schedule makes the frame due immediately.
    fn next_due(&self) -> Option<Duration> {
        let mut state = self.lock();
        let next_ts = state.pending.front()?.timestamp;
        let (start, first_ts) = *state.origin.get_or_insert((Instant::now(), next_ts));

        let due = Duration::try_from_secs_f64((next_ts - first_ts).max(0.0))
            .ok()
            .and_then(|gap| start.checked_add(gap));
        match due {
            Some(due) => Some(due.saturating_duration_since(Instant::now())),
            None => {
                log::warn!(
                    "Replay gap of {} s cannot be scheduled, delivering frame now",
                    next_ts - first_ts
                );
                Some(Duration::ZERO)
            }
        }
    }
}

impl BusConnection for ReplayConnection {
    fn receive(&self, timeout: Duration) -> Result<Option<ReceivedFrame>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DashError::TransientIoError("replay is shut down".to_string()));
        }

        let Some(wait) = self.next_due() else {
            thread::sleep(timeout);
            return Ok(None);
        };
        if wait > timeout {
            thread::sleep(timeout);
            return Ok(None);
        }
        if !wait.is_zero() {
            thread::sleep(wait);
        }

        Ok(self.lock().pending.pop_front().map(|record| record.frame))
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
