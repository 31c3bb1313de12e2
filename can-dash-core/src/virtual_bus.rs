//! In-process virtual CAN network
//!
//! Connections opened on the same channel name see each other's frames;
//! a sender never receives its own frames back.

use crate::bus::{BusConnection, ReceivedFrame};
use crate::types::{DashError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Endpoints = HashMap<String, Vec<(u64, Sender<ReceivedFrame>)>>;

/// A set of named virtual channels
#[derive(Clone, Default)]
pub struct VirtualNetwork {
    channels: Arc<Mutex<Endpoints>>,
    next_id: Arc<AtomicU64>,
}

impl VirtualNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new connection to `channel`
    pub fn connect(&self, channel: &str) -> VirtualConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::unbounded();
        self.lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        log::debug!("Virtual connection {} attached to '{}'", id, channel);

        VirtualConnection {
            id,
            channel: channel.to_string(),
            network: self.clone(),
            rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live connections on a channel
    pub fn connection_count(&self, channel: &str) -> usize {
        self.lock().get(channel).map_or(0, |v| v.len())
    }

    fn broadcast(&self, channel: &str, sender_id: u64, frame: &ReceivedFrame) -> usize {
        let endpoints = self.lock();
        let Some(peers) = endpoints.get(channel) else {
            return 0;
        };
        peers
            .iter()
            .filter(|(id, _)| *id != sender_id)
            .filter(|(_, tx)| tx.send(frame.clone()).is_ok())
            .count()
    }

    fn detach(&self, channel: &str, id: u64) {
        let mut endpoints = self.lock();
        if let Some(peers) = endpoints.get_mut(channel) {
            peers.retain(|(peer_id, _)| *peer_id != id);
            if peers.is_empty() {
                endpoints.remove(channel);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Endpoints> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One endpoint on a virtual channel
pub struct VirtualConnection {
    id: u64,
    channel: String,
    network: VirtualNetwork,
    rx: Receiver<ReceivedFrame>,
    closed: AtomicBool,
}

impl VirtualConnection {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Transmit a frame to every other connection on this channel.
    ///
    /// Returns the number of peers the frame was delivered to.
    pub fn send(&self, frame: ReceivedFrame) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DashError::TransientIoError(format!(
                "virtual channel '{}' is shut down",
                self.channel
            )));
        }
        Ok(self.network.broadcast(&self.channel, self.id, &frame))
    }
}

impl BusConnection for VirtualConnection {
    fn receive(&self, timeout: Duration) -> Result<Option<ReceivedFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DashError::TransientIoError(format!(
                "virtual channel '{}' is shut down",
                self.channel
            ))),
        }
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network.detach(&self.channel, self.id);
            log::debug!("Virtual connection {} detached from '{}'", self.id, self.channel);
        }
    }
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}
