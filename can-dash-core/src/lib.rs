//! CAN Dashboard Core Library
//!
//! The live pipeline behind a multi-bus CAN dashboard: bus readers feed raw
//! frames into a hub, the hub decodes them against a DBC signal database and
//! broadcasts raw and decoded events, and panels on the consumer side turn
//! matching events into render updates.
//!
//! # Architecture
//!
//! ```text
//! BusConnection -> BusReader (thread per bus) -> FrameHub -> EventReceiver
//!                       |                                        |
//!                BusStatsAggregator                 Dashboard -> Panel -> RenderSink
//! ```
//!
//! - Decoding and broadcast run inline on the reader threads
//! - Consumers receive events through a non-blocking queue and process them
//!   on their own thread
//! - The signal database can be replaced at any time; each frame is decoded
//!   against exactly one database snapshot
//!
//! The library does NOT draw anything or talk to physical adapters. Drawing
//! goes through [`RenderSink`]; adapters plug in through [`BusConnector`].
//!
//! # Example Usage
//!
//! ```no_run
//! use can_dash_core::{
//!     BusConf, BusManager, BusStatsAggregator, Dashboard, DefaultConnector, FrameHub,
//!     InterfaceKind, PanelConf, PanelType, PanelUpdate,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let hub = Arc::new(FrameHub::new());
//! hub.load_database(Path::new("vehicle.dbc")).unwrap();
//!
//! let mut dashboard = Dashboard::new(Arc::clone(&hub), Some(65536));
//! dashboard
//!     .add_panel(PanelConf::new("rpm", PanelType::Value, "RPM").with_signal("RPM"))
//!     .unwrap();
//!
//! let stats = Arc::new(BusStatsAggregator::new());
//! let mut manager = BusManager::new(hub, stats, Box::new(DefaultConnector::new()));
//! manager.start(&[BusConf::new("BUS1", InterfaceKind::Virtual, "vcan0").with_enabled(true)]);
//!
//! let mut updates: Vec<(String, PanelUpdate)> = Vec::new();
//! dashboard.pump(&mut updates, 1000);
//! ```

// Public modules
pub mod bus;
pub mod dashboard;
pub mod hub;
pub mod layout;
pub mod led;
pub mod manager;
pub mod message_decoder;
pub mod panel;
pub mod panels;
pub mod reader;
pub mod replay;
pub mod signals;
pub mod stats;
pub mod types;
pub mod virtual_bus;

// Re-export main types for convenience
pub use bus::{BusConf, BusConnection, BusConnector, DefaultConnector, InterfaceKind, ReceivedFrame, MAX_BUSES};
pub use dashboard::Dashboard;
pub use hub::{EventHandler, EventReceiver, FrameHub, HubStats, Interest, SubscriptionId};
pub use layout::Layout;
pub use led::{LedCondition, LedRule, LedRuleSet};
pub use manager::{BusManager, StartReport};
pub use panel::{PanelConf, PanelType, SignalFilter, SignalSelection};
pub use panels::{Panel, PanelUpdate, RenderSink, SeriesData};
pub use reader::{BusReader, ReaderConfig, ReaderState};
pub use signals::{DatabaseStats, MessageDefinition, SignalDatabase, SignalDefinition};
pub use stats::{BusLoad, BusStatsAggregator, BusStatsReport, StatsSnapshot};
pub use types::{monotonic_now, DashError, DecodedSignal, Frame, HubEvent, Result, Timestamp};
pub use virtual_bus::{VirtualConnection, VirtualNetwork};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a fresh hub has no database and no subscribers
        let hub = FrameHub::new();
        assert!(hub.database().is_none());
        assert_eq!(hub.subscriber_count(), 0);
        assert!(!VERSION.is_empty());
    }
}
