// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run controller: the start/stop supervisor gating every station.
//!
//! Polls the two button variables. A start edge while stopped fires every
//! station's start event and nothing else; the event is a trigger, not a
//! gate. A stop edge while running aborts every station task, drives all
//! actuator bindings back to their reset values, and respawns the tasks,
//! returning the plant to a safe idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cellbus::{Bus, Sensor, Value};

use crate::stations::Station;

pub const START_BUTTON: &str = "Objects/IO:Botao Start Process";
pub const STOP_BUTTON: &str = "Objects/IO:Botao Stop Process";

pub struct RunController {
    start_button: Sensor,
    stop_button: Sensor,
    stations: Vec<Arc<dyn Station>>,
    period: Duration,
}

impl RunController {
    /// Register the button variables and take supervision of the stations.
    pub fn build(
        bus: &Bus,
        stations: Vec<Arc<dyn Station>>,
        period: Duration,
    ) -> anyhow::Result<Self> {
        let start_button = bus.sensor(START_BUTTON, Value::Bool(false))?;
        let stop_button = bus.sensor(STOP_BUTTON, Value::Bool(false))?;
        Ok(Self { start_button, stop_button, stations, period })
    }

    /// Supervise until `shutdown` fires. Station tasks are spawned
    /// immediately and block on their start events; on shutdown the stop
    /// protocol runs once more so the plant is left safe.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut handles = self.spawn_all();
        let mut running = false;
        let mut last_start = false;
        let mut last_stop = false;

        let mut tick = tokio::time::interval(self.period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("shutdown requested; stopping process");
                    self.halt(&mut handles);
                    return Ok(());
                }
            }

            let start = self.start_button.get_bool();
            let stop = self.stop_button.get_bool();

            if start && !last_start && !running {
                running = true;
                info!("starting process");
                for station in &self.stations {
                    station.start_event().notify_waiters();
                }
            }

            if stop && !last_stop && running {
                running = false;
                info!("stopping process");
                self.halt(&mut handles);
                handles = self.spawn_all();
            }

            last_start = start;
            last_stop = stop;
        }
    }

    fn spawn_all(&self) -> Vec<JoinHandle<anyhow::Result<()>>> {
        self.stations.iter().map(|station| Arc::clone(station).spawn()).collect()
    }

    /// Abort every station task, then reset every actuator binding. On the
    /// current-thread runtime no station code runs between the two steps.
    fn halt(&self, handles: &mut Vec<JoinHandle<anyhow::Result<()>>>) {
        for handle in handles.drain(..) {
            handle.abort();
        }
        for station in &self.stations {
            for actuator in station.bindings() {
                actuator.reset();
            }
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
