//! CAN Dashboard CLI Application
//!
//! Headless runner for the can-dash-core pipeline. It adds:
//! - TOML configuration and layout files
//! - Bus startup with adapter channel auto-selection
//! - A periodic bus status line
//! - Panel rendering to the log

use anyhow::{Context, Result};
use can_dash_core::{
    BusManager, BusStatsAggregator, DashError, Dashboard, DefaultConnector, FrameHub, Layout,
    PanelConf, SignalDatabase,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod config;
mod sink;

use sink::LogSink;

/// Plot refresh period
const REFRESH_INTERVAL: Duration = Duration::from_millis(30);

/// Upper bound on events handled per pump
const MAX_EVENTS_PER_PUMP: usize = 10_000;

/// CAN Dashboard - Live multi-bus CAN signal dashboard
#[derive(Parser, Debug)]
#[command(name = "can-dash-cli")]
#[command(about = "Decode live CAN traffic into dashboard panels", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (default: $CAN_DASH_CONFIG or ./config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// DBC file to decode with (overrides db.path)
    #[arg(long, value_name = "FILE")]
    dbc: Option<PathBuf>,

    /// Layout file with panels (overrides ui.layout)
    #[arg(long, value_name = "FILE")]
    layout: Option<PathBuf>,

    /// Stop after this many seconds (default: run until killed)
    #[arg(long, value_name = "SECONDS")]
    duration: Option<f64>,

    /// Write the current layout here on exit
    #[arg(long, value_name = "FILE")]
    save_layout: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Dashboard CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using core library v{}", can_dash_core::VERSION);

    let config = config::load_or_default(args.config.as_deref())?;

    let hub = Arc::new(FrameHub::new());
    if let Some(dbc_path) = args.dbc.as_ref().or(config.db.path.as_ref()) {
        load_database(&hub, dbc_path);
    } else {
        log::info!("No DBC configured, only raw frames will be shown");
    }

    let layout_path = args.layout.clone().or_else(|| config.ui.layout.clone());
    let layout = match &layout_path {
        Some(path) => load_layout(path),
        None => Layout::default(),
    };

    let mut dashboard = Dashboard::new(Arc::clone(&hub), config.ui.queue_capacity());
    for conf in layout.panels.iter().cloned() {
        if let Err(e) = dashboard.add_panel(conf) {
            log::warn!("Skipping panel: {}", e);
        }
    }
    log::info!("{} panels ready", dashboard.panels().len());
    if let Some(db) = hub.database() {
        for (panel_id, msg_name) in unknown_messages(&db, &layout.panels) {
            log::warn!("Panel {} subscribes to {} which the DBC does not define", panel_id, msg_name);
        }
    }

    // Buses saved in the layout take precedence over the config file
    let buses = if layout.buses.is_empty() {
        config.buses.clone()
    } else {
        layout.buses.clone()
    };

    let stats = Arc::new(BusStatsAggregator::new());
    let mut manager = BusManager::new(Arc::clone(&hub), Arc::clone(&stats), Box::new(DefaultConnector::new()));

    if config.ui.autostart {
        let report = manager.autostart(&buses);
        for (name, err) in &report.failed {
            log::error!("{} not started: {}", name, err);
        }
    } else {
        log::info!("Autostart disabled; no buses started");
    }

    let mut sink = LogSink::new();
    run_loop(&mut dashboard, &stats, &mut sink, &config.ui, args.duration);

    if !manager.stop(Duration::from_secs(1)) {
        log::warn!("Some bus readers did not exit cleanly");
    }

    log::info!("{} panel updates rendered", sink.updates());
    for (panel, text) in sink.latest() {
        log::info!("  {}: {}", panel, text);
    }

    if let Some(path) = &args.save_layout {
        let saved = Layout {
            buses,
            panels: dashboard.panel_confs(),
            dock_state_b64: layout.dock_state_b64.clone(),
        };
        saved
            .save(path)
            .with_context(|| format!("Failed to save layout to {:?}", path))?;
    }

    Ok(())
}

/// Load the DBC; failure is logged and the dashboard runs without decoding
fn load_database(hub: &FrameHub, path: &Path) {
    match hub.load_database(path) {
        Ok(db) => {
            let stats = db.stats();
            log::info!(
                "Signal database {}: {} messages, {} signals",
                db.source().unwrap_or("(unnamed)"),
                stats.num_messages,
                stats.num_signals
            );
        }
        Err(e) => log::error!("DBC load failed: {}", e),
    }
}

/// Panel subscriptions naming a message `db` does not define, as `(panel_id, msg_name)`
fn unknown_messages<'a>(db: &SignalDatabase, panels: &'a [PanelConf]) -> Vec<(&'a str, &'a str)> {
    panels
        .iter()
        .flat_map(|conf| {
            let series = conf.multi_signals.iter().map(|sel| sel.msg_name.as_str());
            conf.msg_name
                .as_deref()
                .into_iter()
                .chain(series)
                .map(move |msg| (conf.panel_id.as_str(), msg))
        })
        .filter(|(_, msg)| !msg.is_empty() && db.lookup_by_name(msg).is_none())
        .collect()
}

/// Load a layout, falling back to an empty one
fn load_layout(path: &Path) -> Layout {
    match Layout::load(path) {
        Ok(layout) => layout,
        Err(DashError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No layout at {:?}, starting empty", path);
            Layout::default()
        }
        Err(e) => {
            log::error!("Layout load failed: {}", e);
            Layout::default()
        }
    }
}

/// Pump events, refresh plots and report bus status until `duration` elapses
fn run_loop(
    dashboard: &mut Dashboard,
    stats: &BusStatsAggregator,
    sink: &mut LogSink,
    ui: &config::UiConfig,
    duration: Option<f64>,
) {
    let deadline = duration.and_then(|secs| deadline_after(Instant::now(), secs));
    let status_interval = Duration::from_millis(ui.status_interval_ms);

    let mut last_refresh = Instant::now();
    let mut last_status = Instant::now();
    let mut reported_drops = 0;

    loop {
        if deadline.map_or(false, |d| Instant::now() >= d) {
            break;
        }

        dashboard.wait_and_pump(sink, REFRESH_INTERVAL, MAX_EVENTS_PER_PUMP);

        if last_refresh.elapsed() >= REFRESH_INTERVAL {
            dashboard.refresh(sink);
            last_refresh = Instant::now();
        }

        let since_status = last_status.elapsed();
        if since_status >= status_interval {
            let snapshot = stats.take_report(since_status);
            log::info!("{}", snapshot.status_line());
            last_status = Instant::now();

            let dropped = dashboard.dropped_events();
            if dropped > reported_drops {
                log::warn!("Dashboard queue full: {} events dropped in total", dropped);
                reported_drops = dropped;
            }
        }
    }
}

/// Instant `secs` after `started`, or `None` if that is beyond what the clock can represent
fn deadline_after(started: Instant, secs: f64) -> Option<Instant> {
    let deadline = Duration::try_from_secs_f64(secs.max(0.0))
        .ok()
        .and_then(|run_for| started.checked_add(run_for));
    if deadline.is_none() {
        log::warn!("Duration of {} s is out of range, running until killed", secs);
    }
    deadline
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
