//! Display panels
//!
//! Every panel kind is a variant of [`Panel`], built from a [`PanelConf`] by
//! [`Panel::from_conf`]. Panels are driven on the consumer thread: hub events
//! go in through [`Panel::handle`], periodic plot refreshes through
//! [`Panel::refresh`], and whatever should be drawn comes out as a
//! [`PanelUpdate`] passed to a [`RenderSink`].

pub mod plot;
pub mod readout;
pub mod table;

pub use plot::{MultiPlotPanel, PlotPanel, TimeSeries};
pub use readout::{GaugePanel, LedPanel, ValuePanel};
pub use table::{TablePanel, TableRow};

use crate::panel::{PanelConf, PanelType};
use crate::signals::SignalDatabase;
use crate::types::{monotonic_now, HubEvent};

/// One drawable series of a plot panel
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    pub key: String,
    pub label: String,
    pub color: Option<String>,
    /// (seconds since panel start, value)
    pub points: Vec<(f64, f64)>,
}

/// What a panel wants drawn
#[derive(Debug, Clone, PartialEq)]
pub enum PanelUpdate {
    Value {
        value: f64,
        units: String,
    },
    Gauge {
        value: f64,
        /// Position within [min_val, max_val], clamped to 0..=1
        fraction: f64,
        units: String,
    },
    Series {
        series: Vec<SeriesData>,
        x_range: (f64, f64),
    },
    TableRow(TableRow),
    /// None means the neutral colour
    Led {
        value: f64,
        color: Option<String>,
    },
}

/// Receiver of panel updates, implemented by whatever draws the dashboard
pub trait RenderSink {
    fn render(&mut self, panel_id: &str, update: &PanelUpdate);
}

/// Sink that keeps every update, useful for headless runs and tests
impl RenderSink for Vec<(String, PanelUpdate)> {
    fn render(&mut self, panel_id: &str, update: &PanelUpdate) {
        self.push((panel_id.to_string(), update.clone()));
    }
}

/// A configured display panel
#[derive(Debug)]
pub enum Panel {
    Value(ValuePanel),
    Gauge(GaugePanel),
    Plot(PlotPanel),
    MultiPlot(MultiPlotPanel),
    Table(TablePanel),
    Led(LedPanel),
}

impl Panel {
    /// Build the panel variant for `conf`, with its time origin at now
    pub fn from_conf(conf: PanelConf) -> Self {
        Self::from_conf_at(conf, monotonic_now())
    }

    /// Build the panel variant for `conf` with an explicit time origin
    pub fn from_conf_at(conf: PanelConf, t0: f64) -> Self {
        match conf.panel_type {
            PanelType::Value => Panel::Value(ValuePanel::new(conf)),
            PanelType::Gauge => Panel::Gauge(GaugePanel::new(conf)),
            PanelType::Plot => Panel::Plot(PlotPanel::new(conf, t0)),
            PanelType::MultiPlot => Panel::MultiPlot(MultiPlotPanel::new(conf, t0)),
            PanelType::Table => Panel::Table(TablePanel::new(conf)),
            PanelType::Led => Panel::Led(LedPanel::new(conf)),
        }
    }

    pub fn conf(&self) -> &PanelConf {
        match self {
            Panel::Value(p) => p.conf(),
            Panel::Gauge(p) => p.conf(),
            Panel::Plot(p) => p.conf(),
            Panel::MultiPlot(p) => p.conf(),
            Panel::Table(p) => p.conf(),
            Panel::Led(p) => p.conf(),
        }
    }

    pub fn id(&self) -> &str {
        &self.conf().panel_id
    }

    pub fn panel_type(&self) -> PanelType {
        self.conf().panel_type
    }

    /// Feed one hub event; matching events produce an update on `sink`
    pub fn handle(&mut self, event: &HubEvent, sink: &mut dyn RenderSink) {
        self.handle_with_database(event, None, sink);
    }

    /// Like [`handle`](Self::handle), with the active signal database for
    /// panels that label raw frames
    pub fn handle_with_database(
        &mut self,
        event: &HubEvent,
        database: Option<&SignalDatabase>,
        sink: &mut dyn RenderSink,
    ) {
        let update = match self {
            Panel::Value(p) => p.handle(event),
            Panel::Gauge(p) => p.handle(event),
            Panel::Plot(p) => {
                p.handle(event);
                None
            }
            Panel::MultiPlot(p) => {
                p.handle(event);
                None
            }
            Panel::Table(p) => p.handle_with_database(event, database),
            Panel::Led(p) => p.handle(event),
        };

        if let Some(update) = update {
            sink.render(&self.conf().panel_id, &update);
        }
    }

    /// Periodic refresh at monotonic time `now`; only plots emit anything
    pub fn refresh(&mut self, now: f64, sink: &mut dyn RenderSink) {
        let update = match self {
            Panel::Plot(p) => Some(p.refresh(now)),
            Panel::MultiPlot(p) => Some(p.refresh(now)),
            _ => None,
        };

        if let Some(update) = update {
            sink.render(&self.conf().panel_id, &update);
        }
    }
}
