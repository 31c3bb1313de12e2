//! Bus reader threads
//!
//! Each active bus gets one reader: a dedicated thread that polls the
//! connection with a bounded timeout and publishes every frame to the hub
//! and the statistics aggregator. Transport errors are retried after a
//! short backoff; nothing a bus does can end the thread except `stop()`.

use crate::bus::{BusConnection, ReceivedFrame};
use crate::hub::FrameHub;
use crate::stats::BusStatsAggregator;
use crate::types::{monotonic_now, DashError, Frame, Result};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReaderState::Idle,
            1 => ReaderState::Running,
            2 => ReaderState::Stopping,
            _ => ReaderState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ReaderState::Idle => 0,
            ReaderState::Running => 1,
            ReaderState::Stopping => 2,
            ReaderState::Stopped => 3,
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderState::Idle => write!(f, "idle"),
            ReaderState::Running => write!(f, "running"),
            ReaderState::Stopping => write!(f, "stopping"),
            ReaderState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Reader loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Receive timeout; bounds how long `stop()` takes to be observed
    pub receive_timeout: Duration,
    /// Pause after a transport error before retrying
    pub error_backoff: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(10),
            error_backoff: Duration::from_millis(50),
        }
    }
}

/// Reader thread for a single bus connection
pub struct BusReader {
    bus_name: String,
    connection: Arc<dyn BusConnection>,
    hub: Arc<FrameHub>,
    stats: Arc<BusStatsAggregator>,
    config: ReaderConfig,
    stop_flag: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl BusReader {
    pub fn new(
        bus_name: impl Into<String>,
        connection: Arc<dyn BusConnection>,
        hub: Arc<FrameHub>,
        stats: Arc<BusStatsAggregator>,
    ) -> Self {
        Self {
            bus_name: bus_name.into(),
            connection,
            hub,
            stats,
            config: ReaderConfig::default(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(ReaderState::Idle.as_u8())),
            handle: None,
        }
    }

    /// Builder method: override loop timing
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Spawn the reader thread. Only valid from `Idle`.
    pub fn start(&mut self) -> Result<()> {
        let state = self.state();
        if state != ReaderState::Idle {
            return Err(DashError::ConfigError(format!(
                "reader for {} cannot start from state {}",
                self.bus_name, state
            )));
        }

        let worker = ReaderLoop {
            bus_name: self.bus_name.clone(),
            connection: Arc::clone(&self.connection),
            hub: Arc::clone(&self.hub),
            stats: Arc::clone(&self.stats),
            config: self.config,
            stop_flag: Arc::clone(&self.stop_flag),
        };
        let state = Arc::clone(&self.state);

        self.state.store(ReaderState::Running.as_u8(), Ordering::Release);
        let spawned = thread::Builder::new()
            .name(format!("bus-reader-{}", self.bus_name))
            .spawn(move || {
                let _exit = MarkStopped(state);
                worker.run();
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                log::info!("Reader started for {}", self.bus_name);
                Ok(())
            }
            Err(e) => {
                self.state.store(ReaderState::Idle.as_u8(), Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Ask the reader to exit; observed within one receive timeout
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        let _ = self.state.compare_exchange(
            ReaderState::Running.as_u8(),
            ReaderState::Stopping.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.state.compare_exchange(
            ReaderState::Idle.as_u8(),
            ReaderState::Stopped.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns false if it is still running; the caller may try again.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                self.handle = Some(handle);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }

        if handle.join().is_err() {
            log::error!("Reader thread for {} panicked", self.bus_name);
            self.state.store(ReaderState::Stopped.as_u8(), Ordering::Release);
        }
        true
    }
}

impl Drop for BusReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Publishes `Stopped` when the reader thread exits, however it exits
struct MarkStopped(Arc<AtomicU8>);

impl Drop for MarkStopped {
    fn drop(&mut self) {
        self.0.store(ReaderState::Stopped.as_u8(), Ordering::Release);
    }
}

struct ReaderLoop {
    bus_name: String,
    connection: Arc<dyn BusConnection>,
    hub: Arc<FrameHub>,
    stats: Arc<BusStatsAggregator>,
    config: ReaderConfig,
    stop_flag: Arc<AtomicBool>,
}

impl ReaderLoop {
    fn run(&self) {
        let mut consecutive_errors: u64 = 0;

        while !self.stop_flag.load(Ordering::Acquire) {
            match self.receive() {
                Ok(Some(received)) => {
                    if consecutive_errors > 0 {
                        log::info!(
                            "{} recovered after {} receive errors",
                            self.bus_name,
                            consecutive_errors
                        );
                        consecutive_errors = 0;
                    }

                    self.publish(received);
                }
                Ok(None) => continue,
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors == 1 {
                        log::warn!("{} receive error, retrying: {}", self.bus_name, e);
                    } else {
                        log::debug!("{} receive error #{}: {}", self.bus_name, consecutive_errors, e);
                    }
                    thread::sleep(self.config.error_backoff);
                }
            }
        }

        log::info!("Reader for {} exited", self.bus_name);
    }

    /// Receive one frame; a panicking connection counts as a transport error
    fn receive(&self) -> Result<Option<ReceivedFrame>> {
        let timeout = self.config.receive_timeout;
        panic::catch_unwind(AssertUnwindSafe(|| self.connection.receive(timeout))).unwrap_or_else(|_| {
            Err(DashError::TransientIoError(format!(
                "{} connection panicked in receive",
                self.bus_name
            )))
        })
    }

    fn publish(&self, received: ReceivedFrame) {
        let identifier = received.identifier;
        let payload_len = received.payload.len();
        let is_error = received.is_error;
        let frame = Frame {
            bus_name: self.bus_name.clone(),
            identifier,
            payload: received.payload,
            timestamp: monotonic_now(),
            is_error,
        };

        let published = panic::catch_unwind(AssertUnwindSafe(|| self.hub.ingest_raw_frame(frame)));
        if published.is_err() {
            log::error!("{} frame 0x{:X} dropped: ingest panicked", self.bus_name, identifier);
        }
        self.stats.record(&self.bus_name, payload_len, is_error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Interest;
    use crate::virtual_bus::VirtualNetwork;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Connection that replays a fixed script of receive outcomes
    struct ScriptedConnection {
        script: Mutex<VecDeque<Result<Option<ReceivedFrame>>>>,
    }

    impl BusConnection for ScriptedConnection {
        fn receive(&self, timeout: Duration) -> Result<Option<ReceivedFrame>> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => {
                    thread::sleep(timeout);
                    Ok(None)
                }
            }
        }

        fn shutdown(&self) {}
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_lifecycle() {
        let network = VirtualNetwork::new();
        let connection: Arc<dyn BusConnection> = Arc::new(network.connect("vcan0"));
        let mut reader = BusReader::new(
            "BUS1",
            connection,
            Arc::new(FrameHub::new()),
            Arc::new(BusStatsAggregator::new()),
        );

        assert_eq!(reader.state(), ReaderState::Idle);
        reader.start().unwrap();
        assert_eq!(reader.state(), ReaderState::Running);
        assert!(reader.start().is_err());

        reader.stop();
        assert!(reader.join(Duration::from_secs(2)));
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_stop_before_start() {
        let network = VirtualNetwork::new();
        let reader = BusReader::new(
            "BUS1",
            Arc::new(network.connect("vcan0")),
            Arc::new(FrameHub::new()),
            Arc::new(BusStatsAggregator::new()),
        );
        reader.stop();
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_transport_errors_do_not_kill_reader() {
        let script = VecDeque::from(vec![
            Err(DashError::TransientIoError("cable unplugged".to_string())),
            Err(DashError::TransientIoError("bus off".to_string())),
            Ok(Some(ReceivedFrame::new(0x100, vec![1, 2]))),
            Ok(Some(ReceivedFrame {
                identifier: 0x0,
                payload: vec![],
                is_error: true,
            })),
        ]);
        let connection = Arc::new(ScriptedConnection {
            script: Mutex::new(script),
        });
        let hub = Arc::new(FrameHub::new());
        let stats = Arc::new(BusStatsAggregator::new());
        let receiver = hub.subscribe_queue(Interest::RawFrames, None);

        let mut reader = BusReader::new("BUS1", connection, Arc::clone(&hub), Arc::clone(&stats))
            .with_config(ReaderConfig {
                receive_timeout: Duration::from_millis(5),
                error_backoff: Duration::from_millis(1),
            });
        reader.start().unwrap();

        assert!(wait_for(|| stats.peek("BUS1").frames == 2));
        assert_eq!(reader.state(), ReaderState::Running);

        let counters = stats.peek("BUS1");
        assert_eq!(counters.bytes, 2);
        assert_eq!(counters.errors, 1);

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.identifier(), 0x100);
        assert_eq!(first.bus_name(), "BUS1");

        reader.stop();
        assert!(reader.join(Duration::from_secs(2)));
    }

    #[test]
    fn test_panicking_receive_does_not_kill_reader() {
        struct FlakyConnection {
            panicked: AtomicBool,
            delivered: AtomicBool,
        }
        impl BusConnection for FlakyConnection {
            fn receive(&self, timeout: Duration) -> Result<Option<ReceivedFrame>> {
                if !self.panicked.swap(true, Ordering::SeqCst) {
                    panic!("driver fault");
                }
                if !self.delivered.swap(true, Ordering::SeqCst) {
                    return Ok(Some(ReceivedFrame::new(0x42, vec![7])));
                }
                thread::sleep(timeout);
                Ok(None)
            }
            fn shutdown(&self) {}
        }

        let stats = Arc::new(BusStatsAggregator::new());
        let mut reader = BusReader::new(
            "BUS1",
            Arc::new(FlakyConnection {
                panicked: AtomicBool::new(false),
                delivered: AtomicBool::new(false),
            }),
            Arc::new(FrameHub::new()),
            Arc::clone(&stats),
        )
        .with_config(ReaderConfig {
            receive_timeout: Duration::from_millis(5),
            error_backoff: Duration::from_millis(1),
        });
        reader.start().unwrap();

        assert!(wait_for(|| stats.peek("BUS1").frames == 1));
        assert_eq!(reader.state(), ReaderState::Running);

        reader.stop();
        assert!(reader.join(Duration::from_secs(2)));
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn test_state_is_stopped_if_thread_dies() {
        let state = Arc::new(AtomicU8::new(ReaderState::Running.as_u8()));
        let guard_state = Arc::clone(&state);

        let handle = thread::spawn(move || {
            let _exit = MarkStopped(guard_state);
            panic!("reader fault");
        });
        assert!(handle.join().is_err());
        assert_eq!(ReaderState::from_u8(state.load(Ordering::Acquire)), ReaderState::Stopped);
    }

    #[test]
    fn test_join_times_out_on_stuck_connection() {
        struct StuckConnection;
        impl BusConnection for StuckConnection {
            fn receive(&self, _timeout: Duration) -> Result<Option<ReceivedFrame>> {
                thread::sleep(Duration::from_millis(300));
                Ok(None)
            }
            fn shutdown(&self) {}
        }

        let mut reader = BusReader::new(
            "BUS1",
            Arc::new(StuckConnection),
            Arc::new(FrameHub::new()),
            Arc::new(BusStatsAggregator::new()),
        );
        reader.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        reader.stop();

        assert!(!reader.join(Duration::from_millis(10)));
        assert_eq!(reader.state(), ReaderState::Stopping);
        assert!(reader.join(Duration::from_secs(2)));
        assert_eq!(reader.state(), ReaderState::Stopped);
    }
}
