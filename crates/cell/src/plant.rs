// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plant composition: every station, channel, and permit pool of the cell,
//! wired in the factory's physical topology.
//!
//! Flow for a storage order: feeder(type) → Select table → InputConveyor →
//! NoCover table → router → RollerA → AccA → handler → rack. Delivery
//! orders divert at the router onto Dispa → Exit → dock. The B roller
//! branch is wired end-to-end but receives no traffic; the router serves
//! storage through A.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cellbus::Bus;

use crate::controller::RunController;
use crate::handover::{self, HandoverRx, HandoverTx, PermitPool};
use crate::intake::OrderIntake;
use crate::order::BoxType;
use crate::rack::Rack;
use crate::router::{Downstream, QueueRouter};
use crate::stations::{
    BoxFeeder, Capability, Conveyor, ConveyorAccess, Direction, Station, StorageHandler, TurnTable,
};

/// The assembled cell: intake surface, rack state, and the supervisor.
pub struct Plant {
    pub intake: Arc<OrderIntake>,
    pub rack: Arc<Rack>,
    /// Boxes that completed the delivery flow and left through the dock.
    pub delivered: Arc<AtomicU64>,
    controller: RunController,
    dock: JoinHandle<()>,
    // Producers/consumers of the idle channels (WithCover table, B branch
    // feed). Held so those stations block on empty queues instead of
    // observing a closed channel.
    idle_feeds: Vec<HandoverTx>,
    idle_sinks: Vec<HandoverRx>,
}

impl Plant {
    /// Run the supervisor until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let _idle_feeds = self.idle_feeds;
        let _idle_sinks = self.idle_sinks;
        let result = self.controller.run(shutdown).await;
        self.dock.abort();
        result
    }
}

/// Build the full plant on the given bus. Must run inside a runtime: the
/// exit-dock consumer is spawned here.
pub fn build(bus: &Bus, tick_period: Duration) -> anyhow::Result<Plant> {
    let rack = Arc::new(Rack::new());

    // Intake → feeder order queues (unbounded; the intake never blocks).
    let (green_tx, green_rx) = mpsc::unbounded_channel();
    let (blue_tx, blue_rx) = mpsc::unbounded_channel();
    let (metal_tx, metal_rx) = mpsc::unbounded_channel();

    // Handover channels, depths and permit counts per the plant layout.
    // Feeders stall until the table pulls each box, so depth 3 never
    // blocks the three producers against each other.
    let (feed_tx, feed_rx) = handover::channel(3);
    let (select_out_tx, input_conv_rx) = handover::channel(1);
    let select_out_permits = PermitPool::new(2);
    let (input_conv_tx, nocover_rx) = handover::channel(1);
    let (storage_tx, roller_a_rx) = handover::channel(1);
    let storage_permits = PermitPool::new(2);
    let (delivery_tx, dispa_rx) = handover::channel(1);
    let delivery_permits = PermitPool::new(2);
    let (roller_a_tx, acc_a_rx) = handover::channel(1);
    let (handler_a_tx, handler_a_rx) = handover::channel(1);
    let acc_a_permits = PermitPool::new(2);
    let (roller_b_feed_tx, roller_b_rx) = handover::channel(1);
    let (roller_b_tx, acc_b_rx) = handover::channel(1);
    let (handler_b_tx, handler_b_rx) = handover::channel(1);
    let acc_b_permits = PermitPool::new(1);
    let (exit_feed_tx, exit_rx) = handover::channel(1);
    let (dock_tx, dock_rx) = handover::channel(1);
    let (withcover_feed_tx, withcover_rx) = handover::channel(1);
    let (withcover_out_tx, withcover_out_rx) = handover::channel(1);

    // Feeders. Green and metal lines have four conveyors, blue has two.
    let green = BoxFeeder::build(
        bus,
        "Objects/Green Producer",
        BoxType::Green,
        2,
        4,
        green_rx,
        feed_tx.clone(),
    )?;
    let blue =
        BoxFeeder::build(bus, "Objects/Blue Producer", BoxType::Blue, 2, 2, blue_rx, feed_tx.clone())?;
    let metal = BoxFeeder::build(
        bus,
        "Objects/Metal Producer",
        BoxType::Metal,
        2,
        4,
        metal_rx,
        feed_tx,
    )?;

    // Turn tables.
    let select = TurnTable::build(
        bus,
        "Objects/TurnsTable/TurnTable Select",
        "Select",
        HashSet::from([Capability::Pass]),
        feed_rx,
        Downstream::guarded(select_out_tx, select_out_permits.clone()),
    )?;
    let nocover = TurnTable::build(
        bus,
        "Objects/TurnsTable/TurnTable NoCover",
        "NoCover",
        HashSet::from([Capability::StorageNoCover, Capability::DeliveryNoCover]),
        nocover_rx,
        Downstream::router(QueueRouter::new(
            storage_tx,
            storage_permits.clone(),
            delivery_tx,
            delivery_permits.clone(),
        )),
    )?;
    let withcover = TurnTable::build(
        bus,
        "Objects/TurnsTable/TurnTable WithCover",
        "WithCover",
        HashSet::new(),
        withcover_rx,
        Downstream::channel(withcover_out_tx),
    )?;

    // Conveyors.
    let conveyor_base = "Objects/Conveyors";
    let input_conveyor = Conveyor::build(
        bus,
        &format!("{conveyor_base}/Conveyor InputConveyor"),
        "InputConveyor",
        2,
        2,
        &[Direction::Forward],
        input_conv_rx,
        Some(select_out_permits),
        input_conv_tx,
    )?;
    let roller_a = Conveyor::build(
        bus,
        &format!("{conveyor_base}/Conveyor RollerAConveyor"),
        "RollerAConveyor",
        1,
        4,
        &[Direction::Forward, Direction::Backward],
        roller_a_rx,
        Some(storage_permits),
        roller_a_tx,
    )?;
    let acc_a = ConveyorAccess::build(
        bus,
        &format!("{conveyor_base}/Conveyor AccAConveyor"),
        "AccAConveyor",
        acc_a_rx,
        handler_a_tx,
        acc_a_permits.clone(),
        true,
    )?;
    let dispa = Conveyor::build(
        bus,
        &format!("{conveyor_base}/Conveyor DispaConveyor"),
        "DispaConveyor",
        1,
        4,
        &[Direction::Forward],
        dispa_rx,
        Some(delivery_permits),
        exit_feed_tx,
    )?;
    let roller_b = Conveyor::build(
        bus,
        &format!("{conveyor_base}/Conveyor RollerBConveyor"),
        "RollerBConveyor",
        1,
        4,
        &[Direction::Forward, Direction::Backward],
        roller_b_rx,
        Some(PermitPool::new(1)),
        roller_b_tx,
    )?;
    let acc_b = ConveyorAccess::build(
        bus,
        &format!("{conveyor_base}/Conveyor AccBConveyor"),
        "AccBConveyor",
        acc_b_rx,
        handler_b_tx,
        acc_b_permits.clone(),
        true,
    )?;
    let exit = Conveyor::build(
        bus,
        &format!("{conveyor_base}/Conveyor ExitConveyor"),
        "ExitConveyor",
        1,
        1,
        &[Direction::Forward],
        exit_rx,
        Some(PermitPool::new(1)),
        dock_tx,
    )?;

    let handler = StorageHandler::build(
        bus,
        "Objects/Handler",
        "Handler",
        handler_a_rx,
        handler_b_rx,
        acc_a_permits,
        acc_b_permits,
        Arc::clone(&rack),
    )?;

    // Intake surface.
    let mut intake = OrderIntake::new(Arc::clone(&rack));
    intake.register_feeder(BoxType::Green, green_tx);
    intake.register_feeder(BoxType::Blue, blue_tx);
    intake.register_feeder(BoxType::Metal, metal_tx);
    let intake = Arc::new(intake);

    // The dock: pulls delivered boxes off the exit conveyor. Not a
    // station; it models the truck on the far side of the cell.
    let delivered = Arc::new(AtomicU64::new(0));
    let dock = tokio::spawn(dock_consumer(dock_rx, Arc::clone(&delivered)));

    let mut stations: Vec<Arc<dyn Station>> = Vec::new();
    stations.push(green);
    stations.push(blue);
    stations.push(metal);
    stations.push(select);
    stations.push(nocover);
    stations.push(withcover);
    stations.push(input_conveyor);
    stations.push(roller_a);
    stations.push(acc_a);
    stations.push(dispa);
    stations.push(roller_b);
    stations.push(acc_b);
    stations.push(exit);
    stations.push(handler);
    let controller = RunController::build(bus, stations, tick_period)?;

    Ok(Plant {
        intake,
        rack,
        delivered,
        controller,
        dock,
        idle_feeds: vec![roller_b_feed_tx, withcover_feed_tx],
        idle_sinks: vec![withcover_out_rx],
    })
}

/// Pull each delivered box off the exit conveyor and let it go.
async fn dock_consumer(mut dock: HandoverRx, delivered: Arc<AtomicU64>) {
    while let Some(item) = dock.get().await {
        item.move_prev.toggle(true).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        item.move_prev.toggle(false).await;
        delivered.fetch_add(1, Ordering::Relaxed);
        info!(order = %item.order, "box left the plant");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

#[cfg(test)]
#[path = "plant_tests.rs"]
mod tests;
