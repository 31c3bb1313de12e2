//! Bus lifecycle management
//!
//! Opens the configured buses, runs one [`BusReader`] per open connection and
//! tears everything down again. Failures are per bus: a bus that cannot be
//! opened is reported and the others still start.

use crate::bus::{BusConf, BusConnection, BusConnector, MAX_BUSES};
use crate::hub::FrameHub;
use crate::reader::{BusReader, ReaderConfig};
use crate::stats::BusStatsAggregator;
use crate::types::{DashError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Join timeout used when the manager is dropped while buses are running
const DROP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

struct RunningBus {
    conf: BusConf,
    connection: Arc<dyn BusConnection>,
    reader: BusReader,
}

/// Outcome of a start request
#[derive(Debug, Default)]
pub struct StartReport {
    /// Names of buses now running
    pub started: Vec<String>,
    /// Buses that were enabled but could not be started
    pub failed: Vec<(String, DashError)>,
}

impl StartReport {
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct BusManager {
    hub: Arc<FrameHub>,
    stats: Arc<BusStatsAggregator>,
    connector: Box<dyn BusConnector>,
    reader_config: ReaderConfig,
    running: Vec<RunningBus>,
}

impl BusManager {
    pub fn new(hub: Arc<FrameHub>, stats: Arc<BusStatsAggregator>, connector: Box<dyn BusConnector>) -> Self {
        Self {
            hub,
            stats,
            connector,
            reader_config: ReaderConfig::default(),
            running: Vec::new(),
        }
    }

    /// Builder method: reader timing for buses started from now on
    pub fn with_reader_config(mut self, config: ReaderConfig) -> Self {
        self.reader_config = config;
        self
    }

    pub fn hub(&self) -> &Arc<FrameHub> {
        &self.hub
    }

    pub fn stats(&self) -> &Arc<BusStatsAggregator> {
        &self.stats
    }

    /// Configurations of the buses currently running
    pub fn running_buses(&self) -> Vec<&BusConf> {
        self.running.iter().map(|bus| &bus.conf).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    /// Stop whatever is running, then start every enabled bus in `confs`.
    ///
    /// At most [`MAX_BUSES`] buses run at once; extra enabled entries and
    /// duplicate names are reported as failures.
    pub fn start(&mut self, confs: &[BusConf]) -> StartReport {
        if self.is_running() {
            self.stop(DROP_JOIN_TIMEOUT);
        }

        let mut report = StartReport::default();
        for conf in confs.iter().filter(|c| c.enabled) {
            if self.running.iter().any(|bus| bus.conf.name == conf.name) {
                let err = DashError::ConfigError(format!("bus name '{}' is used twice", conf.name));
                log::warn!("{}", err);
                report.failed.push((conf.name.clone(), err));
                continue;
            }
            if self.running.len() >= MAX_BUSES {
                let err = DashError::ConfigError(format!(
                    "at most {} buses can run at once, '{}' not started",
                    MAX_BUSES, conf.name
                ));
                log::warn!("{}", err);
                report.failed.push((conf.name.clone(), err));
                continue;
            }

            match self.start_one(conf) {
                Ok(()) => report.started.push(conf.name.clone()),
                Err(e) => {
                    log::error!("{} ({} {}) failed to start: {}", conf.name, conf.interface, conf.channel, e);
                    report.failed.push((conf.name.clone(), e));
                }
            }
        }

        if report.started.is_empty() {
            log::warn!("No buses started");
        }
        report
    }

    /// Start the enabled buses, re-selecting adapter channels first.
    ///
    /// An enabled bus whose configured channel cannot be opened is moved to
    /// the first of its interface's candidate channels that can, skipping
    /// channels claimed by other enabled buses. Buses with no working
    /// channel are left as configured and fail in [`BusManager::start`].
    pub fn autostart(&mut self, confs: &[BusConf]) -> StartReport {
        let mut resolved: Vec<BusConf> = confs.to_vec();

        for index in 0..resolved.len() {
            let conf = &resolved[index];
            let candidates = conf.interface.candidate_channels();
            if !conf.enabled || candidates.is_empty() {
                continue;
            }
            if self.connector.find_channel(conf, &[conf.channel.clone()]).is_some() {
                continue;
            }

            let claimed: Vec<&str> = resolved
                .iter()
                .enumerate()
                .filter(|(other, c)| *other != index && c.enabled)
                .map(|(_, c)| c.channel.as_str())
                .collect();
            let free: Vec<String> = candidates
                .into_iter()
                .filter(|c| *c != conf.channel && !claimed.contains(&c.as_str()))
                .collect();

            if let Some(channel) = self.connector.find_channel(conf, &free) {
                log::info!("Auto-selected available {} channel for {}: {}", conf.interface, conf.name, channel);
                resolved[index].channel = channel;
            }
        }

        self.start(&resolved)
    }

    fn start_one(&mut self, conf: &BusConf) -> Result<()> {
        let connection = self.connector.open(conf)?;
        self.stats.set_bitrate(&conf.name, conf.bitrate);

        let mut reader = BusReader::new(
            conf.name.clone(),
            Arc::clone(&connection),
            Arc::clone(&self.hub),
            Arc::clone(&self.stats),
        )
        .with_config(self.reader_config);

        if let Err(e) = reader.start() {
            connection.shutdown();
            self.stats.remove_bus(&conf.name);
            return Err(e);
        }

        log::info!(
            "{} running on {} {} @ {} bit/s",
            conf.name,
            conf.interface,
            conf.channel,
            conf.bitrate
        );
        self.running.push(RunningBus {
            conf: conf.clone(),
            connection,
            reader,
        });
        Ok(())
    }

    /// Stop all readers, wait up to `join_timeout` for each, then shut the
    /// connections down.
    ///
    /// Returns false if any reader thread had not exited in time.
    pub fn stop(&mut self, join_timeout: Duration) -> bool {
        for bus in &self.running {
            bus.reader.stop();
        }

        let mut all_exited = true;
        for mut bus in self.running.drain(..) {
            if !bus.reader.join(join_timeout) {
                log::warn!("Reader for {} did not exit within {:?}", bus.conf.name, join_timeout);
                all_exited = false;
            }
            bus.connection.shutdown();
            self.stats.remove_bus(&bus.conf.name);
            log::info!("{} stopped", bus.conf.name);
        }
        all_exited
    }
}

impl Drop for BusManager {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop(DROP_JOIN_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{DefaultConnector, InterfaceKind, ReceivedFrame};
    use crate::hub::Interest;
    use crate::virtual_bus::VirtualNetwork;
    use std::time::Instant;

    fn manager(network: &VirtualNetwork) -> BusManager {
        BusManager::new(
            Arc::new(FrameHub::new()),
            Arc::new(BusStatsAggregator::new()),
            Box::new(DefaultConnector::with_network(network.clone())),
        )
    }

    fn virtual_bus(name: &str, channel: &str) -> BusConf {
        BusConf::new(name, InterfaceKind::Virtual, channel).with_enabled(true)
    }

    #[test]
    fn test_start_and_stop() {
        let network = VirtualNetwork::new();
        let mut manager = manager(&network);

        let report = manager.start(&[
            virtual_bus("BUS1", "vcan0"),
            virtual_bus("BUS2", "vcan1").with_enabled(false),
        ]);
        assert_eq!(report.started, vec!["BUS1"]);
        assert!(report.all_started());
        assert_eq!(network.connection_count("vcan0"), 1);

        assert!(manager.stop(Duration::from_secs(2)));
        assert!(!manager.is_running());
        assert_eq!(network.connection_count("vcan0"), 0);
    }

    #[test]
    fn test_failures_are_per_bus() {
        let network = VirtualNetwork::new();
        let mut manager = manager(&network);

        let report = manager.start(&[
            BusConf::new("BUS1", InterfaceKind::Pcan, "PCAN_USBBUS1").with_enabled(true),
            virtual_bus("BUS2", "vcan0"),
        ]);
        assert_eq!(report.started, vec!["BUS2"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, DashError::ConnectError(_)));
    }

    #[test]
    fn test_bus_limit_and_duplicates() {
        let network = VirtualNetwork::new();
        let mut manager = manager(&network);

        let report = manager.start(&[
            virtual_bus("BUS1", "vcan0"),
            virtual_bus("BUS1", "vcan1"),
            virtual_bus("BUS2", "vcan2"),
            virtual_bus("BUS3", "vcan3"),
            virtual_bus("BUS4", "vcan4"),
        ]);
        assert_eq!(report.started, vec!["BUS1", "BUS2", "BUS3"]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(manager.running_buses().len(), MAX_BUSES);
    }

    #[test]
    fn test_restart_replaces_running_buses() {
        let network = VirtualNetwork::new();
        let mut manager = manager(&network);

        manager.start(&[virtual_bus("BUS1", "vcan0")]);
        manager.start(&[virtual_bus("BUS2", "vcan1")]);

        let names: Vec<&str> = manager.running_buses().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["BUS2"]);
        assert_eq!(network.connection_count("vcan0"), 0);
    }

    #[test]
    fn test_frames_flow_to_hub_and_stats() {
        let network = VirtualNetwork::new();
        let mut manager = manager(&network);
        let receiver = manager.hub().subscribe_queue(Interest::RawFrames, None);
        manager.start(&[virtual_bus("BUS1", "vcan0")]);

        let sender = network.connect("vcan0");
        sender.send(ReceivedFrame::new(0x321, vec![1, 2, 3, 4])).unwrap();

        let event = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.bus_name(), "BUS1");
        assert_eq!(event.identifier(), 0x321);

        let deadline = Instant::now() + Duration::from_secs(2);
        while manager.stats().peek("BUS1").frames == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(manager.stats().peek("BUS1").bytes, 4);

        manager.stop(Duration::from_secs(2));
    }

    /// Connector whose virtual channels only open when listed as present
    struct PickyConnector {
        inner: DefaultConnector,
        present: Vec<String>,
    }

    impl BusConnector for PickyConnector {
        fn open(&self, conf: &BusConf) -> Result<Arc<dyn BusConnection>> {
            if !self.present.contains(&conf.channel) {
                return Err(DashError::ConnectError(format!("{} not present", conf.channel)));
            }
            self.inner.open(&BusConf {
                interface: InterfaceKind::Virtual,
                ..conf.clone()
            })
        }
    }

    fn picky_manager(present: &[&str]) -> BusManager {
        BusManager::new(
            Arc::new(FrameHub::new()),
            Arc::new(BusStatsAggregator::new()),
            Box::new(PickyConnector {
                inner: DefaultConnector::new(),
                present: present.iter().map(|s| s.to_string()).collect(),
            }),
        )
    }

    #[test]
    fn test_autostart_selects_available_channel() {
        let mut manager = picky_manager(&["PCAN_USBBUS3"]);
        let report = manager.autostart(&[BusConf::new("BUS1", InterfaceKind::Pcan, "PCAN_USBBUS1").with_enabled(true)]);

        assert_eq!(report.started, vec!["BUS1"]);
        assert_eq!(manager.running_buses()[0].channel, "PCAN_USBBUS3");
    }

    #[test]
    fn test_autostart_keeps_working_channel() {
        let mut manager = picky_manager(&["PCAN_USBBUS1", "PCAN_USBBUS2"]);
        let report = manager.autostart(&[
            BusConf::new("BUS1", InterfaceKind::Pcan, "PCAN_USBBUS2").with_enabled(true),
            BusConf::new("BUS2", InterfaceKind::Pcan, "PCAN_USBBUS7").with_enabled(true),
        ]);

        assert!(report.all_started());
        let channels: Vec<&str> = manager.running_buses().iter().map(|c| c.channel.as_str()).collect();
        assert_eq!(channels, vec!["PCAN_USBBUS2", "PCAN_USBBUS1"]);
    }

    #[test]
    fn test_autostart_without_adapter() {
        let network = VirtualNetwork::new();
        let mut manager = manager(&network);

        let report = manager.autostart(&[BusConf::new("BUS1", InterfaceKind::Pcan, "PCAN_USBBUS1").with_enabled(true)]);
        assert!(report.started.is_empty());
        assert!(matches!(report.failed[0].1, DashError::ConnectError(_)));
    }
}
