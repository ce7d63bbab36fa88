// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Box feeder: emits boxes of a fixed type, one production order at a
//! time, and hands each box to the select turn table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use cellbus::{Actuator, Bus, Sensor, Value};

use crate::handover::{AdvancePrevious, HandoverItem, HandoverTx};
use crate::order::{BoxType, Order, OrderState};
use crate::signal::{EdgeDetector, EdgeType, SensorSubscription};
use crate::stations::Station;

const EMIT_SETTLE: Duration = Duration::from_secs(1);
const FILL_TIME: Duration = Duration::from_secs(5);

/// Emits boxes of one product type. Stations with a product emitter fill
/// the box contents before dispatch and refill concurrently afterwards.
pub struct BoxFeeder {
    name: &'static str,
    box_type: BoxType,
    orders: Mutex<mpsc::UnboundedReceiver<Order>>,
    output: HandoverTx,
    container: Actuator,
    product: Option<Actuator>,
    conveyors: Vec<Actuator>,
    sensor_start: Sensor,
    sensor_end: Sensor,
    start_event: Notify,
}

impl BoxFeeder {
    /// Provision the station's variables on the bus. `num_conveyors` is 2
    /// or 4 depending on the physical line; a second emitter is the
    /// product filler.
    pub fn build(
        bus: &Bus,
        base: &str,
        box_type: BoxType,
        num_emitters: usize,
        num_conveyors: usize,
        orders: mpsc::UnboundedReceiver<Order>,
        output: HandoverTx,
    ) -> anyhow::Result<Arc<Self>> {
        anyhow::ensure!(num_conveyors >= 2, "feeder needs at least two conveyors");
        let name = box_type.as_str();

        let container = bus.actuator(&format!("{base}/IO:Container {name}"), Value::Bool(false))?;
        let product = if num_emitters > 1 {
            Some(bus.actuator(&format!("{base}/IO:Product {name}"), Value::Bool(false))?)
        } else {
            None
        };

        let mut conveyors = Vec::with_capacity(num_conveyors);
        for i in 1..=num_conveyors {
            conveyors.push(
                bus.actuator(&format!("{base}/IO:Conveyor {name}:{i}"), Value::Bool(false))?,
            );
        }

        let sensor_start = bus.sensor(&format!("{base}/IO:Sensor Start {name}"), Value::Bool(false))?;
        let sensor_end = bus.sensor(&format!("{base}/IO:Sensor End {name}"), Value::Bool(false))?;

        Ok(Arc::new(Self {
            name,
            box_type,
            orders: Mutex::new(orders),
            output,
            container,
            product,
            conveyors,
            sensor_start,
            sensor_end,
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
        info!(feeder = self.name, "starting box feeder");

        let mut is_full = false;
        loop {
            let order = { self.orders.lock().await.recv().await };
            let Some(mut order) = order else {
                warn!(feeder = self.name, "order intake gone; feeder stopping");
                return Ok(());
            };
            order.state = OrderState::Production;
            info!(feeder = self.name, %order, "received production order");

            for _ in 0..order.quantity {
                self.emit_box(&order, &start_det, &end_det, &mut is_full).await?;
            }
        }
    }

    /// One full emit cycle: raise a box at position 0, move it down the
    /// line, hand it over, and wait for the next stage to pull it.
    async fn emit_box(
        &self,
        order: &Order,
        start_det: &EdgeDetector,
        end_det: &EdgeDetector,
        is_full: &mut bool,
    ) -> anyhow::Result<()> {
        // Emitting rattles the start sensor; ignore it until the box is
        // actually dispatched.
        start_det.set_enabled(false);
        self.container.set(true);
        sleep(EMIT_SETTLE).await;

        if let Some(product) = &self.product {
            if !*is_full {
                product.set(true);
                sleep(FILL_TIME).await;
            }
        }

        start_det.set_enabled(true);
        if let Some(product) = &self.product {
            product.set(false);
        }
        sleep(EMIT_SETTLE).await;

        for conveyor in &self.conveyors[0..2] {
            conveyor.set(true);
        }

        // Box has cleared position 0.
        start_det.wait().await;
        start_det.clear();
        self.conveyors[0].set(false);

        if let Some(product) = &self.product {
            *is_full = true;
            let refill = product.clone();
            tokio::spawn(async move {
                refill.set(true);
                sleep(FILL_TIME).await;
                refill.set(false);
            });
        }

        if self.conveyors.len() > 2 {
            for conveyor in &self.conveyors[2..] {
                conveyor.set(true);
            }
        }

        // Box reached the end of the line.
        end_det.wait().await;
        end_det.clear();

        if self.conveyors.len() > 2 {
            for conveyor in &self.conveyors {
                conveyor.set(false);
            }
        } else {
            self.conveyors[1].set(false);
        }

        let bridge: Arc<dyn AdvancePrevious> = Arc::new(FeederBridge {
            motor: self.conveyors[self.conveyors.len() - 1].clone(),
        });
        self.output.put(HandoverItem::new(order.clone(), bridge)).await?;

        // Downstream pulls the box off the last conveyor.
        end_det.set_trigger(EdgeType::Falling);
        end_det.wait().await;
        end_det.clear();
        end_det.set_trigger(EdgeType::Rising);
        Ok(())
    }

    pub fn box_type(&self) -> BoxType {
        self.box_type
    }
}

impl Station for BoxFeeder {
    fn name(&self) -> &str {
        self.name
    }

    fn bindings(&self) -> Vec<Actuator> {
        let mut bindings = vec![self.container.clone()];
        bindings.extend(self.product.clone());
        bindings.extend(self.conveyors.iter().cloned());
        bindings
    }

    fn start_event(&self) -> &Notify {
        &self.start_event
    }

    fn spawn(self: Arc<Self>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

/// Bridging motor for the next stage: the feeder's last conveyor.
struct FeederBridge {
    motor: Actuator,
}

#[async_trait]
impl AdvancePrevious for FeederBridge {
    async fn toggle(&self, on: bool) {
        self.motor.set(on);
    }
}

#[cfg(test)]
#[path = "feeder_tests.rs"]
mod tests;
