//! Bus health statistics
//!
//! Reader threads record every frame; a periodic status tick takes a
//! report, which reads and resets all counters in one critical section.

use crate::types::Timestamp;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Bitrate assumed for buses that were never registered
pub const DEFAULT_BITRATE: u32 = 500_000;

/// Default status reporting interval
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(1000);

/// Raw counters accumulated during one reporting interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusCounters {
    pub frames: u64,
    pub bytes: u64,
    pub errors: u64,
}

impl BusCounters {
    fn add(&mut self, payload_len: usize, is_error: bool) {
        self.frames += 1;
        self.bytes += payload_len as u64;
        if is_error {
            self.errors += 1;
        }
    }
}

/// Three-level bus load classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusLoad {
    Light,
    Moderate,
    Heavy,
}

impl BusLoad {
    /// `HEAVY` above 50% load or 150 fps, `LIGHT` below 5% and 10 fps
    pub fn classify(load_pct: f64, fps: f64) -> Self {
        if load_pct > 50.0 || fps > 150.0 {
            BusLoad::Heavy
        } else if load_pct < 5.0 && fps < 10.0 {
            BusLoad::Light
        } else {
            BusLoad::Moderate
        }
    }
}

impl fmt::Display for BusLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusLoad::Light => write!(f, "LIGHT"),
            BusLoad::Moderate => write!(f, "MOD"),
            BusLoad::Heavy => write!(f, "HEAVY"),
        }
    }
}

/// Derived statistics for one bus over one interval
#[derive(Debug, Clone, PartialEq)]
pub struct BusStatsReport {
    pub bus_name: String,
    pub counters: BusCounters,
    pub bitrate: u32,
    /// Frames per second
    pub fps: f64,
    /// Payload bits as a percentage of bus capacity, capped at 100
    pub load_pct: f64,
    /// Error frames per second
    pub errors_per_sec: f64,
    pub load: BusLoad,
}

impl BusStatsReport {
    fn compute(bus_name: &str, counters: BusCounters, bitrate: u32, interval: Duration) -> Self {
        let secs = interval.as_secs_f64().max(1e-3);
        let capacity = f64::from(bitrate.max(1)) * secs;
        let load_pct = (counters.bytes as f64 * 8.0 / capacity * 100.0).min(100.0);
        let fps = counters.frames as f64 / secs;

        Self {
            bus_name: bus_name.to_string(),
            counters,
            bitrate,
            fps,
            load_pct,
            errors_per_sec: counters.errors as f64 / secs,
            load: BusLoad::classify(load_pct, fps),
        }
    }
}

impl fmt::Display for BusStatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} | FPS {:.0} | Load~{:.1}% | Err/s {:.0}",
            self.bus_name, self.load, self.fps, self.load_pct, self.errors_per_sec
        )
    }
}

/// All bus reports taken at one status tick
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub taken_at: Timestamp,
    pub interval: Duration,
    /// Sorted by bus name
    pub buses: Vec<BusStatsReport>,
}

impl StatsSnapshot {
    pub fn get(&self, bus_name: &str) -> Option<&BusStatsReport> {
        self.buses.iter().find(|r| r.bus_name == bus_name)
    }

    /// One-line summary for a status bar
    pub fn status_line(&self) -> String {
        if self.buses.is_empty() {
            return "No buses running".to_string();
        }
        self.buses
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("   |   ")
    }
}

#[derive(Default)]
struct StatsInner {
    counters: HashMap<String, BusCounters>,
    bitrates: HashMap<String, u32>,
}

/// Per-bus frame/byte/error accumulator
#[derive(Default)]
pub struct BusStatsAggregator {
    inner: Mutex<StatsInner>,
}

impl BusStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bus so it is reported even while idle
    pub fn set_bitrate(&self, bus_name: &str, bitrate: u32) {
        self.lock().bitrates.insert(bus_name.to_string(), bitrate);
    }

    /// Forget a bus and its pending counters
    pub fn remove_bus(&self, bus_name: &str) {
        let mut inner = self.lock();
        inner.bitrates.remove(bus_name);
        inner.counters.remove(bus_name);
    }

    /// Record one received frame
    pub fn record(&self, bus_name: &str, payload_len: usize, is_error: bool) {
        let mut inner = self.lock();
        if let Some(counters) = inner.counters.get_mut(bus_name) {
            counters.add(payload_len, is_error);
        } else {
            inner
                .counters
                .entry(bus_name.to_string())
                .or_default()
                .add(payload_len, is_error);
        }
    }

    /// Counters accumulated so far in the current interval
    pub fn peek(&self, bus_name: &str) -> BusCounters {
        self.lock().counters.get(bus_name).copied().unwrap_or_default()
    }

    /// Read and reset all counters, deriving rates over `interval`
    pub fn take_report(&self, interval: Duration) -> StatsSnapshot {
        let (counters, bitrates) = {
            let mut inner = self.lock();
            (std::mem::take(&mut inner.counters), inner.bitrates.clone())
        };

        let names: BTreeSet<&String> = bitrates.keys().chain(counters.keys()).collect();
        let buses = names
            .into_iter()
            .map(|name| {
                let bitrate = bitrates.get(name).copied().unwrap_or(DEFAULT_BITRATE);
                let counts = counters.get(name).copied().unwrap_or_default();
                BusStatsReport::compute(name, counts, bitrate, interval)
            })
            .collect();

        StatsSnapshot {
            taken_at: Utc::now(),
            interval,
            buses,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
