// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Linear transports. The plain conveyor moves boxes between stations
//! under a capacity limit; the access variant is the single-slot buffer
//! feeding the storage crane.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{error, info, warn};

use cellbus::{Actuator, Bus, Sensor, Value};

use crate::handover::{AdvancePrevious, HandoverItem, HandoverRx, HandoverTx, PermitPool};
use crate::order::OrderState;
use crate::signal::{EdgeDetector, EdgeType, SensorSubscription};
use crate::stations::Station;

/// Belt direction. When both are supported, even-indexed engines run
/// forward and odd-indexed engines run backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Linear transport with `max_items` capacity. Overlapping boxes that
/// would collide on the same belt are serialized by the engine lock.
pub struct Conveyor {
    name: String,
    engines: Vec<Actuator>,
    directions: Vec<Direction>,
    num_engines: usize,
    max_items: usize,
    sensor_start: Sensor,
    sensor_end: Sensor,
    input: Mutex<HandoverRx>,
    input_permits: Option<PermitPool>,
    output: HandoverTx,
    in_flight: AtomicUsize,
    engine_lock: Arc<Mutex<()>>,
    start_event: Notify,
}

impl Conveyor {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        bus: &Bus,
        base: &str,
        name: &str,
        num_engines: usize,
        max_items: usize,
        directions: &[Direction],
        input: HandoverRx,
        input_permits: Option<PermitPool>,
        output: HandoverTx,
    ) -> anyhow::Result<Arc<Self>> {
        anyhow::ensure!(num_engines >= 1, "conveyor needs at least one engine");
        anyhow::ensure!(max_items >= 1, "conveyor capacity must be at least one");
        anyhow::ensure!(!directions.is_empty(), "conveyor needs a direction");

        let mut engines = Vec::new();
        for i in 0..num_engines * directions.len() {
            engines.push(bus.actuator(&format!("{base}/IO: Engine:{i} {name}"), Value::Bool(false))?);
        }
        let sensor_start = bus.sensor(&format!("{base}/IO:Sensor Start {name}"), Value::Bool(false))?;
        let sensor_end = bus.sensor(&format!("{base}/IO:Sensor End {name}"), Value::Bool(false))?;

        Ok(Arc::new(Self {
            name: name.to_owned(),
            engines,
            directions: directions.to_vec(),
            num_engines,
            max_items,
            sensor_start,
            sensor_end,
            input: Mutex::new(input),
            input_permits,
            output,
            in_flight: AtomicUsize::new(0),
            engine_lock: Arc::new(Mutex::new(())),
            start_event: Notify::new(),
        }))
    }

    async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let start_det = EdgeDetector::new(&self.sensor_start, EdgeType::Falling);
        let end_det = EdgeDetector::new(&self.sensor_end, EdgeType::Rising);
        let subscription =
            SensorSubscription::with_detectors(vec![Arc::clone(&start_det), Arc::clone(&end_det)]);
        let _sub = subscription.spawn();

        self.start_event.notified().await;

        // Transports die with this task: the set aborts its children on
        // drop, so the stop protocol reclaims boxes mid-belt too.
        let mut transports: JoinSet<()> = JoinSet::new();
        loop {
            while transports.try_join_next().is_some() {}

            if let Some(permits) = &self.input_permits {
                permits.acquire().await;
            }
            let item = { self.input.lock().await.get().await };
            let Some(item) = item else { return Ok(()) };
            self.in_flight.fetch_add(1, Ordering::Relaxed);

            if item.order.state == OrderState::Withdrawal {
                // TODO: reverse-flow transport (drive the backward engine
                // subset back toward the rack access point).
                error!(conveyor = %self.name, order = %item.order, "withdrawal flow not implemented; dropping item");
                self.in_flight.fetch_sub(1, Ordering::Relaxed);
                if let Some(permits) = &self.input_permits {
                    permits.release();
                }
                continue;
            }

            let conveyor = Arc::clone(&self);
            let start = Arc::clone(&start_det);
            let end = Arc::clone(&end_det);
            transports.spawn(async move {
                if let Err(e) = conveyor.transport(item, start, end).await {
                    warn!(error = %e, "conveyor transport failed");
                }
            });
        }
    }

    /// Move one box across the belt and hand it over.
    async fn transport(
        self: Arc<Self>,
        item: HandoverItem,
        start_det: Arc<EdgeDetector>,
        end_det: Arc<EdgeDetector>,
    ) -> anyhow::Result<()> {
        {
            let _engines = self.engine_lock.lock().await;
            self.drive(Direction::Forward, true);
            start_det.wait().await;
            start_det.clear();
            self.drive(Direction::Forward, false);
        }

        if self.in_flight.load(Ordering::Relaxed) < self.max_items {
            let _engines = self.engine_lock.lock().await;
            self.drive(Direction::Forward, true);
            end_det.wait().await;
            end_det.clear();
            self.drive(Direction::Forward, false);
        }

        let bridge: Arc<dyn AdvancePrevious> = Arc::new(ConveyorBridge {
            motor: self.engines[self.num_engines - 1].clone(),
            engine_lock: Arc::clone(&self.engine_lock),
        });
        self.output.put(HandoverItem::new(item.order, bridge)).await?;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        // Box leaves the belt into the next stage; only then is our slot
        // free again.
        end_det.set_trigger(EdgeType::Falling);
        end_det.wait().await;
        end_det.clear();
        if let Some(permits) = &self.input_permits {
            permits.release();
        }
        end_det.set_trigger(EdgeType::Rising);
        Ok(())
    }

    /// Drive the engine subset matching `direction`.
    fn drive(&self, direction: Direction, on: bool) {
        if self.directions.len() > 1 {
            for (i, engine) in self.engines.iter().enumerate() {
                let forward = i % 2 == 0;
                if (direction == Direction::Forward) == forward {
                    engine.set(on);
                }
            }
        } else {
            for engine in &self.engines {
                engine.set(on);
            }
        }
    }
}

impl Station for Conveyor {
    fn name(&self) -> &str {
        &self.name
    }

    fn bindings(&self) -> Vec<Actuator> {
        self.engines.clone()
    }

    fn start_event(&self) -> &Notify {
        &self.start_event
    }

    fn spawn(self: Arc<Self>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

/// Bridging motor for the next stage: the conveyor's last forward engine,
/// toggled under the engine lock.
struct ConveyorBridge {
    motor: Actuator,
    engine_lock: Arc<Mutex<()>>,
}

#[async_trait]
impl AdvancePrevious for ConveyorBridge {
    async fn toggle(&self, on: bool) {
        let _engines = self.engine_lock.lock().await;
        self.motor.set(on);
    }
}

/// Single-slot buffer in front of the storage crane. Pulls one box off
/// the roller conveyor, presents it at the handover point, and waits for
/// the crane to take it.
pub struct ConveyorAccess {
    name: String,
    engines: Vec<Actuator>,
    sensor_end: Sensor,
    input: Mutex<HandoverRx>,
    output: HandoverTx,
    output_permits: PermitPool,
    wait_next_stage: bool,
    start_event: Notify,
}

impl ConveyorAccess {
    pub fn build(
        bus: &Bus,
        base: &str,
        name: &str,
        input: HandoverRx,
        output: HandoverTx,
        output_permits: PermitPool,
        wait_next_stage: bool,
    ) -> anyhow::Result<Arc<Self>> {
        // One physical engine, bidirectional rollers: two engine variables.
        let mut engines = Vec::new();
        for i in 0..2 {
            engines.push(bus.actuator(&format!("{base}/IO: Engine:{i} {name}"), Value::Bool(false))?);
        }
        // The start sensor exists on the surface but the buffer logic only
        // watches the handover end of the belt.
        bus.sensor(&format!("{base}/IO:Sensor Start {name}"), Value::Bool(false))?;
        let sensor_end = bus.sensor(&format!("{base}/IO:Sensor End {name}"), Value::Bool(false))?;

        Ok(Arc::new(Self {
            name: name.to_owned(),
            engines,
            sensor_end,
            input: Mutex::new(input),
            output,
            output_permits,
            wait_next_stage,
            start_event: Notify::new(),
        }))
    }

    async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let end_det = EdgeDetector::new(&self.sensor_end, EdgeType::Falling);
        let subscription = SensorSubscription::with_detectors(vec![Arc::clone(&end_det)]);
        let _sub = subscription.spawn();

        self.start_event.notified().await;
        info!(conveyor = %self.name, "access conveyor ready");

        loop {
            let item = { self.input.lock().await.get().await };
            let Some(item) = item else { return Ok(()) };
            info!(conveyor = %self.name, order = %item.order, "pulling box from roller");
            sleep(Duration::from_secs(1)).await;

            self.engines[0].set(true);
            item.move_prev.toggle(true).await;

            end_det.wait().await;
            end_det.clear();

            self.engines[0].set(false);
            item.move_prev.toggle(false).await;

            // Box is at the handover point; tell the crane.
            {
                let _permit = self.output_permits.guard().await;
                let bridge: Arc<dyn AdvancePrevious> =
                    Arc::new(AccessBridge { motor: self.engines[0].clone() });
                self.output.put(HandoverItem::new(item.order, bridge)).await?;
            }

            if self.wait_next_stage {
                end_det.set_trigger(EdgeType::Rising);
                end_det.wait().await;
                end_det.clear();
                end_det.set_trigger(EdgeType::Falling);
            }

            sleep(Duration::from_secs(1)).await;
        }
    }
}

impl Station for ConveyorAccess {
    fn name(&self) -> &str {
        &self.name
    }

    fn bindings(&self) -> Vec<Actuator> {
        self.engines.clone()
    }

    fn start_event(&self) -> &Notify {
        &self.start_event
    }

    fn spawn(self: Arc<Self>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

struct AccessBridge {
    motor: Actuator,
}

#[async_trait]
impl AdvancePrevious for AccessBridge {
    async fn toggle(&self, on: bool) {
        self.motor.set(on);
    }
}

#[cfg(test)]
#[path = "conveyor_tests.rs"]
mod tests;
