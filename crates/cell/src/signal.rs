// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Edge-triggered sensor events.
//!
//! Stations run linear "set actuator → wait for edge → set actuator"
//! scripts. Each script step waits on an [`EdgeDetector`] whose latch is
//! set by the station's [`SensorSubscription`] task when the bound sensor
//! makes the configured transition. Multiple edges before the consumer
//! waits collapse into one wake; the physical plant holds state between
//! transitions, so that is the correct semantic.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use cellbus::{Sensor, Value};

/// A single-consumer event latch: `set` is idempotent, the consuming task
/// clears it, and a set that lands before the consumer waits is never
/// lost.
#[derive(Debug)]
pub struct Latch {
    cell: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (cell, _) = watch::channel(false);
        Self { cell }
    }

    pub fn set(&self) {
        self.cell.send_replace(true);
    }

    pub fn clear(&self) {
        self.cell.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.cell.borrow()
    }

    /// Wait until the latch is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.cell.subscribe();
        // wait_for checks the current value before sleeping, so a set()
        // that raced ahead of this call still wakes us. The sender lives
        // in self, so the channel cannot close underneath the wait.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Which sensor transition fires the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Rising,
    Falling,
    Both,
}

#[derive(Debug)]
struct DetectorConfig {
    last_high: bool,
    trigger: EdgeType,
    enabled: bool,
}

/// Tracks one sensor's last value and fires a latch on the configured
/// edge. Reconfigurable at runtime; reconfiguration does not clear the
/// latch. The last value updates on every delivered change even while
/// disabled; only the latch is gated.
pub struct EdgeDetector {
    sensor: Sensor,
    config: Mutex<DetectorConfig>,
    event: Latch,
}

impl EdgeDetector {
    pub fn new(sensor: &Sensor, trigger: EdgeType) -> Arc<Self> {
        Self::with_enabled(sensor, trigger, true)
    }

    /// A detector that starts disabled; turn-table routines arm the ones
    /// they need per box.
    pub fn disabled(sensor: &Sensor, trigger: EdgeType) -> Arc<Self> {
        Self::with_enabled(sensor, trigger, false)
    }

    fn with_enabled(sensor: &Sensor, trigger: EdgeType, enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            sensor: sensor.clone(),
            config: Mutex::new(DetectorConfig { last_high: false, trigger, enabled }),
            event: Latch::new(),
        })
    }

    /// Feed a delivered sensor value through the detector.
    pub fn update(&self, value: Value) {
        let high = value.as_bool();
        let mut config = self.config.lock();
        let edge = match (config.last_high, high) {
            (false, true) => Some(EdgeType::Rising),
            (true, false) => Some(EdgeType::Falling),
            _ => None,
        };
        config.last_high = high;

        let Some(edge) = edge else { return };
        if config.enabled && (config.trigger == EdgeType::Both || config.trigger == edge) {
            drop(config);
            debug!(sensor = self.sensor.name(), ?edge, "edge trigger");
            self.event.set();
        }
    }

    pub fn set_trigger(&self, trigger: EdgeType) {
        self.config.lock().trigger = trigger;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.config.lock().enabled = enabled;
    }

    /// Configure trigger + enable and clear the latch in one step: the
    /// entry point of a station routine that installs this detector.
    pub fn arm(&self, trigger: EdgeType) {
        {
            let mut config = self.config.lock();
            config.trigger = trigger;
            config.enabled = true;
        }
        self.event.clear();
    }

    /// Disable and clear; the routine is done with this detector.
    pub fn disarm(&self) {
        self.config.lock().enabled = false;
        self.event.clear();
    }

    pub async fn wait(&self) {
        self.event.wait().await;
    }

    pub fn clear(&self) {
        self.event.clear();
    }

    pub fn event(&self) -> &Latch {
        &self.event
    }

    fn subscribe(&self) -> watch::Receiver<Value> {
        self.sensor.subscribe()
    }
}

/// One subscription per station: merges the change streams of every bound
/// sensor and routes each delivered value to the detectors bound to it.
#[derive(Default)]
pub struct SensorSubscription {
    detectors: Vec<Arc<EdgeDetector>>,
}

impl SensorSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detectors(detectors: Vec<Arc<EdgeDetector>>) -> Self {
        Self { detectors }
    }

    pub fn add(&mut self, detector: Arc<EdgeDetector>) {
        self.detectors.push(detector);
    }

    /// Spawn the routing task. The returned guard aborts it on drop, so a
    /// station's subscription dies with the station's run future.
    pub fn spawn(self) -> SubscriptionGuard {
        SubscriptionGuard { handle: tokio::spawn(self.run()) }
    }

    async fn run(self) {
        let mut streams: Vec<Pin<Box<dyn Stream<Item = (usize, Value)> + Send>>> = Vec::new();
        for (index, detector) in self.detectors.iter().enumerate() {
            let rx = detector.subscribe();
            streams.push(WatchStream::new(rx).map(move |value| (index, value)).boxed());
        }
        let mut merged = stream::select_all(streams);
        while let Some((index, value)) = merged.next().await {
            if let Some(detector) = self.detectors.get(index) {
                detector.update(value);
            }
        }
    }
}

/// Abort-on-drop handle for a subscription task.
pub struct SubscriptionGuard {
    handle: JoinHandle<()>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
