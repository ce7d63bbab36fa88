// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Variable registry with single-owner actuator enforcement.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::var::{Actuator, Sensor, Value};

/// Registration role of a variable. Actuators are written by their owning
/// station; sensors are written by the plant peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRole {
    Actuator,
    Sensor,
}

/// Registry errors, machine-readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A variable was registered twice under the same path.
    Duplicate(String),
    /// A lookup named a path nothing registered.
    Unknown(String),
    /// A peer write targeted an actuator, or vice versa.
    RoleMismatch(String),
}

impl BusError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate(_) => "DUPLICATE_VARIABLE",
            Self::Unknown(_) => "UNKNOWN_VARIABLE",
            Self::RoleMismatch(_) => "ROLE_MISMATCH",
        }
    }

    fn path(&self) -> &str {
        match self {
            Self::Duplicate(p) | Self::Unknown(p) | Self::RoleMismatch(p) => p,
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.path())
    }
}

impl std::error::Error for BusError {}

struct Entry {
    role: VarRole,
    cell: Arc<watch::Sender<Value>>,
}

/// The variable store shared by the whole plant.
#[derive(Clone, Default)]
pub struct Bus {
    vars: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actuator variable. The returned handle is the single
    /// write path for this variable; registering the same path twice fails.
    pub fn actuator(&self, path: &str, initial: Value) -> Result<Actuator, BusError> {
        let cell = self.register(path, VarRole::Actuator, initial)?;
        Ok(Actuator::new(Arc::from(path), initial, cell))
    }

    /// Register a sensor variable, driven by the plant peer.
    pub fn sensor(&self, path: &str, initial: Value) -> Result<Sensor, BusError> {
        let cell = self.register(path, VarRole::Sensor, initial)?;
        Ok(Sensor::new(Arc::from(path), cell))
    }

    fn register(
        &self,
        path: &str,
        role: VarRole,
        initial: Value,
    ) -> Result<Arc<watch::Sender<Value>>, BusError> {
        let mut vars = self.vars.lock();
        if vars.contains_key(path) {
            return Err(BusError::Duplicate(path.to_owned()));
        }
        let (tx, _rx) = watch::channel(initial);
        let cell = Arc::new(tx);
        vars.insert(path.to_owned(), Entry { role, cell: Arc::clone(&cell) });
        Ok(cell)
    }

    /// Peer-side write to a sensor variable (the simulator or the network
    /// transport driving plant feedback).
    pub fn drive(&self, path: &str, value: Value) -> Result<(), BusError> {
        let vars = self.vars.lock();
        let entry = vars.get(path).ok_or_else(|| BusError::Unknown(path.to_owned()))?;
        if entry.role != VarRole::Sensor {
            return Err(BusError::RoleMismatch(path.to_owned()));
        }
        entry.cell.send_replace(value);
        Ok(())
    }

    /// Peer-side observation of any variable (e.g. the simulator watching
    /// motor commands).
    pub fn watch(&self, path: &str) -> Result<watch::Receiver<Value>, BusError> {
        let vars = self.vars.lock();
        let entry = vars.get(path).ok_or_else(|| BusError::Unknown(path.to_owned()))?;
        Ok(entry.cell.subscribe())
    }

    /// Current value of any variable.
    pub fn read(&self, path: &str) -> Result<Value, BusError> {
        let vars = self.vars.lock();
        let entry = vars.get(path).ok_or_else(|| BusError::Unknown(path.to_owned()))?;
        let value = *entry.cell.borrow();
        Ok(value)
    }

    /// Registered paths, sorted. Diagnostic surface for the transport layer.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.vars.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
