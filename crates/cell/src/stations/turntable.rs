// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn table: a router with a rotating deck (0°/90°) and bidirectional
//! rollers. Each box gets a handling routine chosen from the table's
//! declared capability set; the routine arms the edge detectors it needs
//! and disarms them on exit.
//!
//! The metal pass routine deliberately uses the opposite limit-sensor
//! polarities from green/blue on the same sensors. That is plant wiring,
//! not a bug. Preserve it exactly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use cellbus::{Actuator, Bus, Sensor, Value};

use crate::handover::{AdvancePrevious, HandoverItem, HandoverRx};
use crate::order::{BoxType, CoverType, Order, OrderState};
use crate::router::Downstream;
use crate::signal::{EdgeDetector, EdgeType, SensorSubscription};
use crate::stations::Station;

const ITEM_SETTLE: Duration = Duration::from_secs(1);
const TRANSFER_SETTLE: Duration = Duration::from_millis(500);
const TRAILING_PUSH: Duration = Duration::from_millis(300);

/// Declared behaviors of a turn table. `Pass` routes by box color alone;
/// the others route by the order's (delivery, cover) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Pass,
    DeliveryCover,
    DeliveryNoCover,
    StorageCover,
    StorageNoCover,
}

/// The closed set of handling routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routine {
    PassBlue,
    PassGreen,
    PassMetal,
    NoCoverStorage,
    NoCoverDelivery,
}

/// Roller drive direction. The two roller actuators are mutually
/// exclusive; `set_rollers` drops the opposite one before raising the
/// requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RollerDir {
    Stop,
    Plus,
    Minus,
}

/// Edge detectors shared by the routines. Created at station start, armed
/// per routine.
struct TableDetectors {
    front: Arc<EdgeDetector>,
    back: Arc<EdgeDetector>,
    turn_zero: Arc<EdgeDetector>,
    turn_ninety: Arc<EdgeDetector>,
}

impl TableDetectors {
    fn disarm_all(&self) {
        self.front.disarm();
        self.back.disarm();
        self.turn_zero.disarm();
        self.turn_ninety.disarm();
    }
}

pub struct TurnTable {
    name: String,
    capabilities: HashSet<Capability>,
    turn: Actuator,
    roll_plus: Actuator,
    roll_minus: Actuator,
    sensor_turn_zero: Sensor,
    sensor_turn_ninety: Sensor,
    sensor_limit_front: Sensor,
    sensor_limit_back: Sensor,
    input: Mutex<HandoverRx>,
    output: Downstream,
    start_event: Notify,
}

impl TurnTable {
    pub fn build(
        bus: &Bus,
        base: &str,
        name: &str,
        capabilities: HashSet<Capability>,
        input: HandoverRx,
        output: Downstream,
    ) -> anyhow::Result<Arc<Self>> {
        let turn = bus.actuator(&format!("{base}/IO: Rotate {name}"), Value::Bool(false))?;
        let roll_plus = bus.actuator(&format!("{base}/IO: Roll+ {name}"), Value::Bool(false))?;
        let roll_minus = bus.actuator(&format!("{base}/IO: Roll- {name}"), Value::Bool(false))?;

        let sensor_turn_zero = bus.sensor(&format!("{base}/IO: Turn0 {name}"), Value::Bool(false))?;
        let sensor_turn_ninety = bus.sensor(&format!("{base}/IO: Turn90 {name}"), Value::Bool(false))?;
        let sensor_limit_front =
            bus.sensor(&format!("{base}/IO: LimitFront {name}"), Value::Bool(false))?;
        let sensor_limit_back =
            bus.sensor(&format!("{base}/IO: LimitBack {name}"), Value::Bool(false))?;

        Ok(Arc::new(Self {
            name: name.to_owned(),
            capabilities,
            turn,
            roll_plus,
            roll_minus,
            sensor_turn_zero,
            sensor_turn_ninety,
            sensor_limit_front,
            sensor_limit_back,
            input: Mutex::new(input),
            output,
            start_event: Notify::new(),
        }))
    }

    async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let detectors = TableDetectors {
            front: EdgeDetector::disabled(&self.sensor_limit_front, EdgeType::Falling),
            back: EdgeDetector::disabled(&self.sensor_limit_back, EdgeType::Falling),
            turn_zero: EdgeDetector::disabled(&self.sensor_turn_zero, EdgeType::Rising),
            turn_ninety: EdgeDetector::disabled(&self.sensor_turn_ninety, EdgeType::Rising),
        };
        let subscription = SensorSubscription::with_detectors(vec![
            Arc::clone(&detectors.front),
            Arc::clone(&detectors.back),
            Arc::clone(&detectors.turn_zero),
            Arc::clone(&detectors.turn_ninety),
        ]);
        let _sub = subscription.spawn();

        self.start_event.notified().await;

        loop {
            let item = { self.input.lock().await.get().await };
            let Some(item) = item else { return Ok(()) };
            sleep(ITEM_SETTLE).await;

            match self.select_routine(&item.order) {
                Some(routine) => {
                    info!(table = %self.name, order = %item.order, ?routine, "processing box");
                    self.run_routine(routine, item, &detectors).await?;
                    detectors.disarm_all();
                    info!(table = %self.name, "box completed");
                }
                None => {
                    warn!(table = %self.name, order = %item.order, "no handling routine for order; dropping");
                }
            }

            sleep(ITEM_SETTLE).await;
        }
    }

    /// Pick the routine for an order, or `None` when this table does not
    /// serve it. A declared cover capability still yields `None`: no cover
    /// routine exists in this plant.
    fn select_routine(&self, order: &Order) -> Option<Routine> {
        if self.capabilities.contains(&Capability::Pass) {
            return Some(match order.box_type {
                BoxType::Blue => Routine::PassBlue,
                BoxType::Green => Routine::PassGreen,
                BoxType::Metal => Routine::PassMetal,
            });
        }

        let required = match (order.delivery, order.cover) {
            (true, CoverType::With) => Capability::DeliveryCover,
            (true, CoverType::No) => Capability::DeliveryNoCover,
            (false, CoverType::With) => Capability::StorageCover,
            (false, CoverType::No) => Capability::StorageNoCover,
        };
        if !self.capabilities.contains(&required) {
            return None;
        }
        match required {
            Capability::DeliveryNoCover => Some(Routine::NoCoverDelivery),
            Capability::StorageNoCover => Some(Routine::NoCoverStorage),
            _ => None,
        }
    }

    async fn run_routine(
        &self,
        routine: Routine,
        item: HandoverItem,
        detectors: &TableDetectors,
    ) -> anyhow::Result<()> {
        match routine {
            Routine::PassBlue => self.pass_blue(item, detectors).await,
            Routine::PassGreen => self.pass_green(item, detectors).await,
            Routine::PassMetal => self.pass_metal(item, detectors).await,
            Routine::NoCoverStorage => self.no_cover_storage(item, detectors).await,
            Routine::NoCoverDelivery => self.no_cover_delivery(item, detectors).await,
        }
    }

    /// Straight-through, deck stays at 0°.
    async fn pass_blue(&self, item: HandoverItem, dets: &TableDetectors) -> anyhow::Result<()> {
        dets.front.arm(EdgeType::Falling);
        dets.back.arm(EdgeType::Rising);

        self.set_rollers(RollerDir::Minus);
        item.move_prev.toggle(true).await;

        // Box cleared the entry edge; stop pulling from upstream.
        dets.front.wait().await;
        dets.front.clear();
        item.move_prev.toggle(false).await;
        sleep(TRANSFER_SETTLE).await;

        dets.back.wait().await;
        dets.back.clear();
        self.set_rollers(RollerDir::Stop);

        self.output.send(self.item_for_next(item.order)).await?;
        self.set_rollers(RollerDir::Minus);

        dets.back.set_trigger(EdgeType::Falling);
        dets.back.wait().await;
        dets.back.clear();
        sleep(TRAILING_PUSH).await;
        self.set_rollers(RollerDir::Stop);
        Ok(())
    }

    /// 90° left-hand through: rotate, pull with roller-, rotate back, push
    /// out.
    async fn pass_green(&self, item: HandoverItem, dets: &TableDetectors) -> anyhow::Result<()> {
        dets.back.arm(EdgeType::Rising);
        dets.turn_ninety.arm(EdgeType::Rising);
        dets.turn_zero.arm(EdgeType::Rising);

        self.turn.set(true);
        dets.turn_ninety.wait().await;
        dets.turn_ninety.clear();
        sleep(TRANSFER_SETTLE).await;

        self.set_rollers(RollerDir::Minus);
        item.move_prev.toggle(true).await;
        dets.back.wait().await;
        dets.back.clear();

        self.set_rollers(RollerDir::Stop);
        item.move_prev.toggle(false).await;
        sleep(TRANSFER_SETTLE).await;

        self.turn.set(false);
        dets.turn_zero.wait().await;
        dets.turn_zero.clear();
        sleep(TRANSFER_SETTLE).await;

        self.output.send(self.item_for_next(item.order)).await?;

        self.set_rollers(RollerDir::Minus);
        dets.back.set_trigger(EdgeType::Falling);
        dets.back.wait().await;
        dets.back.clear();
        sleep(TRAILING_PUSH).await;
        self.set_rollers(RollerDir::Stop);
        Ok(())
    }

    /// 90° right-hand through: same shape as green but pulls with roller+
    /// toward the front limit, with the back sensor masked during the pull
    /// so it does not trigger early.
    async fn pass_metal(&self, item: HandoverItem, dets: &TableDetectors) -> anyhow::Result<()> {
        dets.front.arm(EdgeType::Rising);
        dets.back.arm(EdgeType::Falling);
        dets.turn_ninety.arm(EdgeType::Rising);
        dets.turn_zero.arm(EdgeType::Rising);

        self.turn.set(true);
        dets.turn_ninety.wait().await;
        dets.turn_ninety.clear();
        dets.back.set_enabled(false);
        sleep(TRANSFER_SETTLE).await;

        self.set_rollers(RollerDir::Plus);
        item.move_prev.toggle(true).await;
        dets.front.wait().await;
        dets.front.clear();

        self.set_rollers(RollerDir::Stop);
        item.move_prev.toggle(false).await;
        sleep(TRANSFER_SETTLE).await;

        self.turn.set(false);
        dets.turn_zero.wait().await;
        dets.turn_zero.clear();
        sleep(TRANSFER_SETTLE).await;

        dets.back.set_enabled(true);
        self.output.send(self.item_for_next(item.order)).await?;

        self.set_rollers(RollerDir::Minus);
        dets.back.wait().await;
        dets.back.clear();
        sleep(TRAILING_PUSH).await;
        self.set_rollers(RollerDir::Stop);
        Ok(())
    }

    /// Take the box in, rotate to 90°, and push it onto the roller storage
    /// conveyor; rotate back empty.
    async fn no_cover_storage(
        &self,
        item: HandoverItem,
        dets: &TableDetectors,
    ) -> anyhow::Result<()> {
        dets.back.arm(EdgeType::Rising);
        dets.turn_ninety.arm(EdgeType::Rising);
        dets.turn_zero.arm(EdgeType::Rising);

        self.set_rollers(RollerDir::Minus);
        item.move_prev.toggle(true).await;
        dets.back.wait().await;
        dets.back.clear();

        self.set_rollers(RollerDir::Stop);
        item.move_prev.toggle(false).await;

        self.turn.set(true);
        dets.turn_ninety.wait().await;
        dets.turn_ninety.clear();

        self.output.send(self.item_for_next(item.order)).await?;

        dets.back.set_trigger(EdgeType::Falling);
        self.set_rollers(RollerDir::Minus);
        dets.back.wait().await;
        dets.back.clear();
        dets.back.set_trigger(EdgeType::Rising);
        self.set_rollers(RollerDir::Stop);

        self.turn.set(false);
        dets.turn_zero.wait().await;
        dets.turn_zero.clear();
        Ok(())
    }

    /// Straight through to the delivery conveyor; the deck never rotates.
    async fn no_cover_delivery(
        &self,
        item: HandoverItem,
        dets: &TableDetectors,
    ) -> anyhow::Result<()> {
        dets.back.arm(EdgeType::Falling);

        self.set_rollers(RollerDir::Minus);
        item.move_prev.toggle(true).await;
        dets.back.wait().await;
        dets.back.clear();

        self.set_rollers(RollerDir::Stop);
        item.move_prev.toggle(false).await;

        let mut order = item.order;
        order.state = OrderState::Delivery;
        self.output.send(self.item_for_next(order)).await?;

        dets.back.set_trigger(EdgeType::Rising);
        self.set_rollers(RollerDir::Minus);
        dets.back.wait().await;
        dets.back.clear();
        self.set_rollers(RollerDir::Stop);
        Ok(())
    }

    /// Drive the rollers, guaranteeing the opposite actuator is off before
    /// the requested one comes on. Idempotent for `Stop`.
    fn set_rollers(&self, dir: RollerDir) {
        match dir {
            RollerDir::Stop => {
                self.roll_plus.set(false);
                self.roll_minus.set(false);
            }
            RollerDir::Plus => {
                self.roll_minus.set(false);
                self.roll_plus.set(true);
            }
            RollerDir::Minus => {
                self.roll_plus.set(false);
                self.roll_minus.set(true);
            }
        }
    }

    /// The item handed downstream; the next stage's pull restarts roller-.
    fn item_for_next(&self, order: Order) -> HandoverItem {
        HandoverItem::new(order, Arc::new(TableBridge { roll_minus: self.roll_minus.clone() }))
    }
}

impl Station for TurnTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn bindings(&self) -> Vec<Actuator> {
        vec![self.turn.clone(), self.roll_plus.clone(), self.roll_minus.clone()]
    }

    fn start_event(&self) -> &Notify {
        &self.start_event
    }

    fn spawn(self: Arc<Self>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

/// Bridging motor role of the table: roller- restarts when the next
/// stage's transport pulls the box off the deck.
struct TableBridge {
    roll_minus: Actuator,
}

#[async_trait]
impl AdvancePrevious for TableBridge {
    async fn toggle(&self, on: bool) {
        self.roll_minus.set(on);
    }
}

#[cfg(test)]
#[path = "turntable_tests.rs"]
mod tests;
