//! Consumer-side owner of the panels
//!
//! The dashboard holds one hub queue subscription and is driven from a single
//! consumer thread. Panels never see hub events on reader threads; all panel
//! state is touched only from [`Dashboard::pump`] and [`Dashboard::refresh`].

use crate::hub::{EventReceiver, FrameHub, Interest};
use crate::panel::PanelConf;
use crate::panels::{Panel, RenderSink};
use crate::types::{monotonic_now, DashError, Result};
use std::sync::Arc;
use std::time::Duration;

pub struct Dashboard {
    hub: Arc<FrameHub>,
    receiver: EventReceiver,
    panels: Vec<Panel>,
}

impl Dashboard {
    /// Subscribe to `hub`; `queue_capacity: None` gives an unbounded queue
    pub fn new(hub: Arc<FrameHub>, queue_capacity: Option<usize>) -> Self {
        let receiver = hub.subscribe_queue(Interest::All, queue_capacity);
        Self {
            hub,
            receiver,
            panels: Vec::new(),
        }
    }

    /// Add a panel; panel ids must be unique
    pub fn add_panel(&mut self, conf: PanelConf) -> Result<()> {
        if self.panel(&conf.panel_id).is_some() {
            return Err(DashError::ConfigError(format!(
                "duplicate panel id '{}'",
                conf.panel_id
            )));
        }
        log::debug!("Adding {} panel {}", conf.panel_type, conf.panel_id);
        self.panels.push(Panel::from_conf(conf));
        Ok(())
    }

    /// Remove a panel by id; returns false if it did not exist
    pub fn remove_panel(&mut self, panel_id: &str) -> bool {
        let before = self.panels.len();
        self.panels.retain(|p| p.id() != panel_id);
        before != self.panels.len()
    }

    /// Rebuild a panel from an edited configuration, keeping its position.
    ///
    /// The new configuration may change the panel's id or type, but not to an
    /// id another panel already uses.
    pub fn replace_panel(&mut self, panel_id: &str, conf: PanelConf) -> Result<()> {
        let index = self
            .panels
            .iter()
            .position(|p| p.id() == panel_id)
            .ok_or_else(|| DashError::ConfigError(format!("no panel with id '{}'", panel_id)))?;

        if conf.panel_id != panel_id && self.panel(&conf.panel_id).is_some() {
            return Err(DashError::ConfigError(format!(
                "duplicate panel id '{}'",
                conf.panel_id
            )));
        }

        self.panels[index] = Panel::from_conf(conf);
        Ok(())
    }

    pub fn panel(&self, panel_id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id() == panel_id)
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    /// Configurations of all panels in display order, for saving a layout
    pub fn panel_confs(&self) -> Vec<PanelConf> {
        self.panels.iter().map(|p| p.conf().clone()).collect()
    }

    /// Dispatch up to `max_events` queued events without blocking.
    ///
    /// Returns the number of events processed.
    pub fn pump(&mut self, sink: &mut dyn RenderSink, max_events: usize) -> usize {
        let events = self.receiver.drain(max_events);
        if events.is_empty() {
            return 0;
        }
        let database = self.hub.database();
        for event in &events {
            for panel in self.panels.iter_mut() {
                panel.handle_with_database(event, database.as_deref(), sink);
            }
        }
        events.len()
    }

    /// Wait up to `timeout` for the first event, then pump as usual
    pub fn wait_and_pump(&mut self, sink: &mut dyn RenderSink, timeout: Duration, max_events: usize) -> usize {
        if max_events == 0 {
            return 0;
        }
        let Some(first) = self.receiver.recv_timeout(timeout) else {
            return 0;
        };
        let database = self.hub.database();
        for panel in self.panels.iter_mut() {
            panel.handle_with_database(&first, database.as_deref(), sink);
        }
        1 + self.pump(sink, max_events - 1)
    }

    /// Periodic refresh of time-based panels
    pub fn refresh(&mut self, sink: &mut dyn RenderSink) {
        let now = monotonic_now();
        for panel in self.panels.iter_mut() {
            panel.refresh(now, sink);
        }
    }

    /// Events lost because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.receiver.dropped()
    }

    /// Events waiting to be pumped
    pub fn pending_events(&self) -> usize {
        self.receiver.len()
    }

    pub fn hub(&self) -> &Arc<FrameHub> {
        &self.hub
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.receiver.id());
    }
}
