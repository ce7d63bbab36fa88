// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage handler: a two-axis crane serving nine rack positions from two
//! access-conveyor inputs. A processor lock serializes the inputs; an
//! idle watchdog parks the crane when no work arrives for a minute.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

use cellbus::{Actuator, Bus, Sensor, Value};

use crate::handover::{HandoverRx, PermitPool};
use crate::order::OrderState;
use crate::rack::Rack;
use crate::signal::{EdgeDetector, EdgeType, Latch, SensorSubscription};
use crate::stations::Station;

/// Parking position written when the crane idles out.
pub const IDLE_POSITION: i16 = 21474;

/// Crane home slot in front of each input.
const HOME_A: i16 = 8;
const HOME_B: i16 = 1;

const MOTION_START_TIMEOUT: Duration = Duration::from_secs(3);
const MOTION_SETTLE: Duration = Duration::from_secs(2);
const GRAB_SETTLE: Duration = Duration::from_secs(2);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MONITOR_PERIOD: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("a"),
            Self::B => f.write_str("b"),
        }
    }
}

pub struct StorageHandler {
    name: String,
    rack: Arc<Rack>,
    input_a: Mutex<HandoverRx>,
    input_b: Mutex<HandoverRx>,
    permits_a: PermitPool,
    permits_b: PermitPool,
    lock_processor: Mutex<()>,
    grab_raise: Actuator,
    grab_left: Actuator,
    grab_right: Actuator,
    position: Actuator,
    sensor_x: Sensor,
    sensor_z: Sensor,
    det_z: Arc<EdgeDetector>,
    det_left: Arc<EdgeDetector>,
    det_right: Arc<EdgeDetector>,
    det_center: Arc<EdgeDetector>,
    started_moving: Latch,
    stopped_moving: Latch,
    start_event: Notify,
}

impl StorageHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        bus: &Bus,
        base: &str,
        name: &str,
        input_a: HandoverRx,
        input_b: HandoverRx,
        permits_a: PermitPool,
        permits_b: PermitPool,
        rack: Arc<Rack>,
    ) -> anyhow::Result<Arc<Self>> {
        // Rack shelf sensors exist on the surface for the plant peer; the
        // crane itself navigates by the position register.
        for i in 1..=crate::rack::RACK_SLOTS {
            bus.sensor(&format!("{base}/IO: Sensor X{i} {name}"), Value::Bool(false))?;
        }

        let sensor_x = bus.sensor(&format!("{base}/IO:Sensor X {name}"), Value::Bool(false))?;
        let sensor_z = bus.sensor(&format!("{base}/IO:Sensor Z {name}"), Value::Bool(false))?;
        let sensor_center = bus.sensor(&format!("{base}/IO:Sensor Meio {name}"), Value::Bool(false))?;
        let sensor_left = bus.sensor(&format!("{base}/IO:Sensor Left {name}"), Value::Bool(false))?;
        let sensor_right = bus.sensor(&format!("{base}/IO:Sensor Right {name}"), Value::Bool(false))?;

        let grab_raise = bus.actuator(&format!("{base}/IO:Move Raise {name}"), Value::Bool(false))?;
        let grab_left = bus.actuator(&format!("{base}/IO:Move Left {name}"), Value::Bool(false))?;
        let grab_right = bus.actuator(&format!("{base}/IO:Move Right {name}"), Value::Bool(false))?;
        let position =
            bus.actuator(&format!("{base}/IO:Position {name}"), Value::Int(IDLE_POSITION))?;

        let det_z = EdgeDetector::new(&sensor_z, EdgeType::Falling);
        let det_left = EdgeDetector::new(&sensor_left, EdgeType::Rising);
        let det_right = EdgeDetector::new(&sensor_right, EdgeType::Rising);
        let det_center = EdgeDetector::new(&sensor_center, EdgeType::Rising);

        let handler = Arc::new(Self {
            name: name.to_owned(),
            rack,
            input_a: Mutex::new(input_a),
            input_b: Mutex::new(input_b),
            permits_a,
            permits_b,
            lock_processor: Mutex::new(()),
            grab_raise,
            grab_left,
            grab_right,
            position,
            sensor_x,
            sensor_z,
            det_z,
            det_left,
            det_right,
            det_center,
            started_moving: Latch::new(),
            stopped_moving: Latch::new(),
            start_event: Notify::new(),
        });
        handler.stopped_moving.set();
        Ok(handler)
    }

    async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let subscription = SensorSubscription::with_detectors(vec![
            Arc::clone(&self.det_z),
            Arc::clone(&self.det_left),
            Arc::clone(&self.det_right),
            Arc::clone(&self.det_center),
        ]);
        let _sub = subscription.spawn();

        info!(handler = %self.name, "start process task");
        self.start_event.notified().await;

        // All three loops live inside this future, so aborting the station
        // task tears the whole tree down.
        tokio::try_join!(
            Arc::clone(&self).process_input(Side::A),
            Arc::clone(&self).process_input(Side::B),
            self.monitor_moving(),
        )?;
        Ok(())
    }

    /// Serve one input queue: wait for a box, take the processor lock, and
    /// run a full store cycle.
    async fn process_input(self: Arc<Self>, side: Side) -> anyhow::Result<()> {
        let home = match side {
            Side::A => HOME_A,
            Side::B => HOME_B,
        };
        info!(handler = %self.name, %side, "awaiting orders to storage");

        loop {
            let permits = match side {
                Side::A => &self.permits_a,
                Side::B => &self.permits_b,
            };
            permits.acquire().await;

            // Armed while we sit without work; parks the crane after 60 s.
            let watchdog = AbortOnDrop(tokio::spawn(Arc::clone(&self).park_when_idle()));

            let item = {
                let input = match side {
                    Side::A => &self.input_a,
                    Side::B => &self.input_b,
                };
                input.lock().await.get().await
            };
            let Some(item) = item else {
                watchdog.abort();
                return Ok(());
            };
            info!(handler = %self.name, %side, order = %item.order, "new order to storage");

            {
                let _processor = self.lock_processor.lock().await;
                watchdog.abort();

                self.move_position(home).await;
                self.raise_product().await;

                let mut order = item.order;
                match self.rack.allocate() {
                    Some(slot) => {
                        self.move_position(i16::from(slot)).await;
                        order.state = OrderState::Storage;
                        order.storage_slot = Some(slot);
                        info!(handler = %self.name, slot, %order, "box stored");
                    }
                    None => {
                        error!(handler = %self.name, %order, "rack full; placement skipped");
                    }
                }

                self.release_product().await;
                self.move_position(home).await;
            }

            sleep(Duration::from_millis(500)).await;
            permits.release();
        }
    }

    /// One-shot: after a minute without work, park the crane.
    async fn park_when_idle(self: Arc<Self>) {
        sleep(IDLE_TIMEOUT).await;
        let _processor = self.lock_processor.lock().await;
        info!(handler = %self.name, "idle for 60s; parking crane");
        self.move_position(IDLE_POSITION).await;
    }

    /// Derive started/stopped transitions from the two motion sensors.
    async fn monitor_moving(&self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(MONITOR_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut moving = false;
        loop {
            interval.tick().await;
            let now = self.sensor_x.get_bool() || self.sensor_z.get_bool();
            if now && !moving {
                moving = true;
                debug!(handler = %self.name, "crane started moving");
                self.stopped_moving.clear();
                self.started_moving.set();
            } else if !now && moving {
                moving = false;
                debug!(handler = %self.name, "crane stopped moving");
                self.started_moving.clear();
                self.stopped_moving.set();
            }
        }
    }

    /// Command a position and wait out the motion. A crane already at the
    /// target never starts moving; after 3 s we assume exactly that and
    /// carry on.
    async fn move_position(&self, target: i16) {
        self.started_moving.clear();
        self.stopped_moving.clear();
        self.position.set_int(target);

        match timeout(MOTION_START_TIMEOUT, self.started_moving.wait()).await {
            Ok(()) => {
                debug!(handler = %self.name, target, "motion detected; waiting for stop");
                self.stopped_moving.wait().await;
                debug!(handler = %self.name, target, "crane reached position");
            }
            Err(_) => {
                debug!(handler = %self.name, target, "no motion detected; assuming already in position");
                self.stopped_moving.set();
            }
        }
        sleep(MOTION_SETTLE).await;
    }

    /// Pick: slide the grab left, raise, return to center.
    async fn raise_product(&self) {
        self.slide_left().await;
        self.raise_grab().await;
        self.slide_center().await;
    }

    /// Place: slide right, lower, return to center.
    async fn release_product(&self) {
        self.slide_right().await;
        self.lower_grab().await;
        self.slide_center().await;
    }

    async fn slide_left(&self) {
        self.grab_left.set(true);
        self.det_left.wait().await;
        self.det_left.clear();
        sleep(GRAB_SETTLE).await;
    }

    async fn slide_right(&self) {
        self.grab_right.set(true);
        self.det_right.wait().await;
        self.det_right.clear();
        sleep(GRAB_SETTLE).await;
    }

    async fn slide_center(&self) {
        self.grab_left.set(false);
        self.grab_right.set(false);
        self.det_center.wait().await;
        self.det_center.clear();
        sleep(GRAB_SETTLE).await;
    }

    async fn raise_grab(&self) {
        self.grab_raise.set(true);
        self.det_z.wait().await;
        self.det_z.clear();
        sleep(GRAB_SETTLE).await;
    }

    async fn lower_grab(&self) {
        self.grab_raise.set(false);
        self.det_z.wait().await;
        self.det_z.clear();
        sleep(GRAB_SETTLE).await;
    }
}

/// The watchdog must not survive its input loop: dropping the guard
/// (normal cancel or station teardown) kills the timer.
struct AbortOnDrop(JoinHandle<()>);

impl AbortOnDrop {
    fn abort(&self) {
        self.0.abort();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Station for StorageHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn bindings(&self) -> Vec<Actuator> {
        vec![
            self.grab_raise.clone(),
            self.grab_left.clone(),
            self.grab_right.clone(),
            self.position.clone(),
        ]
    }

    fn start_event(&self) -> &Notify {
        &self.start_event
    }

    fn spawn(self: Arc<Self>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
