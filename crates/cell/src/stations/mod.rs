// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The station types: feeders, conveyors, turn tables, and the storage
//! handler. Each station is one task on the runtime; the run controller
//! spawns them, fires their start events, and aborts/respawns them on
//! stop.

pub mod conveyor;
pub mod feeder;
pub mod handler;
pub mod turntable;

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use cellbus::Actuator;

pub use conveyor::{Conveyor, ConveyorAccess, Direction};
pub use feeder::BoxFeeder;
pub use handler::StorageHandler;
pub use turntable::{Capability, TurnTable};

/// A plant station as the run controller sees it: a name, the actuator
/// bindings to reset during the stop protocol, a start event, and a way
/// to (re)spawn the station task.
pub trait Station: Send + Sync {
    fn name(&self) -> &str;

    /// Actuator bindings owned by this station. No station mutates another
    /// station's actuators; the controller touches them only while every
    /// station task is down.
    fn bindings(&self) -> Vec<Actuator>;

    /// Start trigger. Stations block on it at boot; the controller fires
    /// it edge-wise (`notify_waiters`), a trigger rather than a gate.
    fn start_event(&self) -> &Notify;

    fn spawn(self: Arc<Self>) -> JoinHandle<anyhow::Result<()>>;
}
