// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for station tests: sensor driving, actuator waiting,
//! and a recording move-previous bridge. All tests run under paused tokio
//! time, so the generous timeouts here are virtual.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::timeout;

use cellbus::{Bus, Value};

use crate::handover::AdvancePrevious;
use crate::stations::Station;

/// Budget for any single wait in a test. Virtual time: hitting it means
/// the choreography is wrong, not that the machine is slow.
pub const WAIT_BUDGET: Duration = Duration::from_secs(300);

pub async fn within<F>(fut: F) -> anyhow::Result<F::Output>
where
    F: std::future::Future,
{
    timeout(WAIT_BUDGET, fut).await.map_err(|_| anyhow::anyhow!("test wait budget exceeded"))
}

/// Wait until the variable reads high.
pub async fn wait_high(bus: &Bus, path: &str) -> anyhow::Result<()> {
    let mut rx = bus.watch(path)?;
    within(rx.wait_for(|v| v.as_bool())).await??;
    Ok(())
}

/// Wait until the variable reads low.
pub async fn wait_low(bus: &Bus, path: &str) -> anyhow::Result<()> {
    let mut rx = bus.watch(path)?;
    within(rx.wait_for(|v| !v.as_bool())).await??;
    Ok(())
}

pub fn drive(bus: &Bus, path: &str, on: bool) -> anyhow::Result<()> {
    bus.drive(path, Value::Bool(on))?;
    Ok(())
}

/// Drive a sensor high then low: one full pulse, both edges.
pub async fn pulse(bus: &Bus, path: &str, hold: Duration) -> anyhow::Result<()> {
    drive(bus, path, true)?;
    tokio::time::sleep(hold).await;
    drive(bus, path, false)?;
    Ok(())
}

/// Let a freshly spawned station task reach its start-event wait, then
/// fire the event.
pub async fn fire_start<S: Station + ?Sized>(station: &S) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    station.start_event().notify_waiters();
}

/// Move-previous capability that records every toggle it receives.
#[derive(Default)]
pub struct RecordingBridge {
    toggles: Mutex<Vec<bool>>,
}

impl RecordingBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn toggles(&self) -> Vec<bool> {
        self.toggles.lock().clone()
    }
}

#[async_trait]
impl AdvancePrevious for RecordingBridge {
    async fn toggle(&self, on: bool) {
        self.toggles.lock().push(on);
    }
}
