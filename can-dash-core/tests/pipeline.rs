//! End-to-end tests: virtual bus -> reader -> hub -> dashboard

mod common;

use can_dash_core::{
    monotonic_now, BusConf, BusManager, BusStatsAggregator, Dashboard, DefaultConnector, FrameHub,
    HubEvent, InterfaceKind, Interest, Layout, PanelConf, PanelType, PanelUpdate, ReceivedFrame,
    SignalSelection, VirtualNetwork,
};
use common::{init_logging, wait_for, write_dbc, ALPHA_MESSAGES, BETA_MESSAGES, ENGINE_MESSAGES};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn manager_on(network: &VirtualNetwork, hub: &Arc<FrameHub>) -> BusManager {
    BusManager::new(
        Arc::clone(hub),
        Arc::new(BusStatsAggregator::new()),
        Box::new(DefaultConnector::with_network(network.clone())),
    )
}

#[test]
fn test_frame_decodes_to_panel_value() {
    init_logging();
    let dbc = write_dbc(ENGINE_MESSAGES);
    let hub = Arc::new(FrameHub::new());
    hub.load_database(dbc.path()).unwrap();

    let mut dashboard = Dashboard::new(Arc::clone(&hub), None);
    dashboard
        .add_panel(PanelConf::new("engine", PanelType::Value, "Engine").with_message("Engine"))
        .unwrap();
    let signals = hub.subscribe_queue(Interest::Signals, None);

    let network = VirtualNetwork::new();
    let mut manager = manager_on(&network, &hub);
    let report = manager.start(&[BusConf::new("BUS2", InterfaceKind::Virtual, "vcan0").with_enabled(true)]);
    assert!(report.all_started());

    let adapter = network.connect("vcan0");
    let sent_at = monotonic_now();
    adapter.send(ReceivedFrame::new(0x100, vec![0x00, 0x10])).unwrap();

    let event = signals.recv_timeout(Duration::from_secs(2)).unwrap();
    match event {
        HubEvent::Signal(signal) => {
            assert_eq!(signal.bus_name, "BUS2");
            assert_eq!(signal.message_name, "Engine");
            assert_eq!(signal.signal_name, "RPM");
            assert_eq!(signal.value, 16.0);
            assert!(signal.timestamp >= sent_at);
        }
        other => panic!("expected a decoded signal, got {:?}", other),
    }

    let mut updates: Vec<(String, PanelUpdate)> = Vec::new();
    assert!(wait_for(|| {
        dashboard.pump(&mut updates, 100);
        !updates.is_empty()
    }));
    assert_eq!(updates[0].0, "engine");
    assert!(matches!(updates[0].1, PanelUpdate::Value { value, .. } if value == 16.0));

    assert!(manager.stop(Duration::from_secs(2)));
}

#[test]
fn test_per_bus_order_with_concurrent_readers() {
    init_logging();
    const FRAMES_PER_BUS: u32 = 500;
    let buses = [("BUS1", "vcan0"), ("BUS2", "vcan1"), ("BUS3", "vcan2")];

    let hub = Arc::new(FrameHub::new());
    let raw = hub.subscribe_queue(Interest::RawFrames, None);
    let network = VirtualNetwork::new();
    let mut manager = manager_on(&network, &hub);

    let confs: Vec<BusConf> = buses
        .iter()
        .map(|(name, channel)| BusConf::new(*name, InterfaceKind::Virtual, *channel).with_enabled(true))
        .collect();
    assert_eq!(manager.start(&confs).started.len(), 3);

    let senders: Vec<_> = buses
        .iter()
        .map(|(_, channel)| {
            let adapter = network.connect(channel);
            thread::spawn(move || {
                for id in 0..FRAMES_PER_BUS {
                    adapter.send(ReceivedFrame::new(id, vec![0; 8])).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let total = (FRAMES_PER_BUS as usize) * buses.len();
    let mut per_bus: HashMap<String, Vec<u32>> = HashMap::new();
    let mut received = 0;
    while received < total {
        let Some(event) = raw.recv_timeout(Duration::from_secs(5)) else {
            break;
        };
        per_bus.entry(event.bus_name().to_string()).or_default().push(event.identifier());
        received += 1;
    }
    assert_eq!(received, total);

    let expected: Vec<u32> = (0..FRAMES_PER_BUS).collect();
    for (name, _) in buses {
        assert_eq!(per_bus[name], expected, "frames on {} out of order", name);
    }

    // Stats are recorded just after each frame is published
    assert!(wait_for(|| buses
        .iter()
        .all(|(name, _)| manager.stats().peek(name).frames == FRAMES_PER_BUS as u64)));
    let report = manager.stats().take_report(Duration::from_secs(1));
    for (name, _) in buses {
        assert_eq!(report.get(name).unwrap().fps, FRAMES_PER_BUS as f64);
    }
    manager.stop(Duration::from_secs(2));
}

#[test]
fn test_database_swap_is_atomic_per_frame() {
    init_logging();
    const THREADS: usize = 4;
    const FRAMES_PER_THREAD: usize = 2000;

    let alpha = write_dbc(ALPHA_MESSAGES);
    let beta = write_dbc(BETA_MESSAGES);
    let hub = Arc::new(FrameHub::new());
    hub.load_database(alpha.path()).unwrap();

    // (bus, frame timestamp) identifies one ingest call
    let groups: Arc<Mutex<HashMap<(String, u64), Vec<(String, String)>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&groups);
    hub.subscribe(
        Interest::Signals,
        Arc::new(move |event: &HubEvent| {
            if let HubEvent::Signal(signal) = event {
                sink.lock()
                    .unwrap()
                    .entry((signal.bus_name.clone(), signal.timestamp as u64))
                    .or_default()
                    .push((signal.message_name.clone(), signal.signal_name.clone()));
            }
        }),
    );

    let ingesters: Vec<_> = (0..THREADS)
        .map(|t| {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                let bus = format!("T{}", t);
                for seq in 0..FRAMES_PER_THREAD {
                    hub.ingest_raw_frame(can_dash_core::Frame::new(
                        bus.clone(),
                        0x100,
                        vec![1, 2, 3],
                        seq as f64,
                    ));
                }
            })
        })
        .collect();

    for round in 0..200 {
        let path = if round % 2 == 0 { beta.path() } else { alpha.path() };
        hub.load_database(path).unwrap();
    }
    for ingester in ingesters {
        ingester.join().unwrap();
    }

    let groups = groups.lock().unwrap();
    assert_eq!(groups.len(), THREADS * FRAMES_PER_THREAD);
    for (key, signals) in groups.iter() {
        let names: Vec<&str> = signals.iter().map(|(_, sig)| sig.as_str()).collect();
        match signals[0].0.as_str() {
            "Alpha" => assert_eq!(names, vec!["A1", "A2"], "mixed decode for {:?}", key),
            "Beta" => assert_eq!(names, vec!["B1", "B2", "B3"], "mixed decode for {:?}", key),
            other => panic!("unexpected message {}", other),
        }
        assert!(signals.iter().all(|(msg, _)| *msg == signals[0].0));
    }
}

#[test]
fn test_panel_filters_across_buses() {
    let dbc = write_dbc(ENGINE_MESSAGES);
    let hub = Arc::new(FrameHub::new());
    hub.load_database(dbc.path()).unwrap();

    let mut dashboard = Dashboard::new(Arc::clone(&hub), None);
    dashboard
        .add_panel(PanelConf::new("any", PanelType::Value, "Any bus").with_message("Engine"))
        .unwrap();
    dashboard
        .add_panel(
            PanelConf::new("bus1", PanelType::Gauge, "BUS1 only")
                .with_bus("BUS1")
                .with_signal("RPM")
                .with_range(0.0, 32.0),
        )
        .unwrap();
    dashboard
        .add_panel(
            PanelConf::new("multi", PanelType::MultiPlot, "RPM")
                .add_series(SignalSelection::new(Some("BUS2"), "Engine", "RPM")),
        )
        .unwrap();

    hub.ingest_raw_frame(can_dash_core::Frame::new("BUS2", 0x100, vec![0x00, 0x10], 1.0));
    hub.ingest_raw_frame(can_dash_core::Frame::new("BUS1", 0x100, vec![0x00, 0x08], 1.1));

    let mut updates: Vec<(String, PanelUpdate)> = Vec::new();
    dashboard.pump(&mut updates, 100);

    let for_panel = |id: &str| updates.iter().filter(|(p, _)| p == id).count();
    assert_eq!(for_panel("any"), 2);
    assert_eq!(for_panel("bus1"), 1);
    assert!(updates.iter().any(|(p, u)| p == "bus1"
        && matches!(u, PanelUpdate::Gauge { fraction, .. } if *fraction == 0.25)));

    let mut refreshed: Vec<(String, PanelUpdate)> = Vec::new();
    dashboard.refresh(&mut refreshed);
    let series = refreshed
        .iter()
        .find_map(|(p, u)| match u {
            PanelUpdate::Series { series, .. } if p == "multi" => Some(series.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].key, "BUS2::Engine::RPM");
}

#[test]
fn test_dashboard_layout_round_trip() {
    let hub = Arc::new(FrameHub::new());
    let mut dashboard = Dashboard::new(Arc::clone(&hub), Some(1024));
    dashboard
        .add_panel(
            PanelConf::new("led_1", PanelType::Led, "Hot")
                .with_signal("Temp")
                .add_led_rule(">=80:#FF0000")
                .add_led_rule("10-20:#FFFF00"),
        )
        .unwrap();
    dashboard
        .add_panel(PanelConf::new("table_2", PanelType::Table, "Frames").with_bus("BUS1"))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layout.json");
    let layout = Layout::new(
        vec![BusConf::new("BUS1", InterfaceKind::Virtual, "vcan0").with_enabled(true)],
        dashboard.panel_confs(),
    );
    layout.save(&path).unwrap();

    let loaded = Layout::load(&path).unwrap();
    assert_eq!(loaded, layout);

    let mut restored = Dashboard::new(hub, None);
    for conf in loaded.panels {
        restored.add_panel(conf).unwrap();
    }
    assert_eq!(restored.panel_confs(), dashboard.panel_confs());
}

#[test]
fn test_replay_bus_feeds_stats() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("drive.log");
    std::fs::write(
        &log_path,
        "(1600000000.000000) can0 100#0010\n\
         (1600000000.001000) can0 100#0020\n\
         (1600000000.002000) can0 7FF#R\n",
    )
    .unwrap();

    let dbc = write_dbc(ENGINE_MESSAGES);
    let hub = Arc::new(FrameHub::new());
    hub.load_database(dbc.path()).unwrap();
    let signals = hub.subscribe_queue(Interest::Signals, None);

    let network = VirtualNetwork::new();
    let mut manager = manager_on(&network, &hub);
    let conf = BusConf::new("REPLAY", InterfaceKind::Replay, log_path.to_string_lossy()).with_enabled(true);
    assert!(manager.start(&[conf]).all_started());

    assert!(wait_for(|| manager.stats().peek("REPLAY").frames == 3));
    let values: Vec<f64> = signals
        .drain(10)
        .into_iter()
        .filter_map(|e| match e {
            HubEvent::Signal(s) => Some(s.value),
            HubEvent::RawFrame(_) => None,
        })
        .collect();
    assert_eq!(values, vec![16.0, 32.0]);
    manager.stop(Duration::from_secs(2));
}

#[test]
fn test_missing_replay_file_is_connect_error() {
    let hub = Arc::new(FrameHub::new());
    let network = VirtualNetwork::new();
    let mut manager = manager_on(&network, &hub);

    let conf = BusConf::new("REPLAY", InterfaceKind::Replay, "/nonexistent/drive.log").with_enabled(true);
    let report = manager.start(&[conf]);
    assert!(report.started.is_empty());
    assert!(matches!(report.failed[0].1, can_dash_core::DashError::ConnectError(_)));
}
