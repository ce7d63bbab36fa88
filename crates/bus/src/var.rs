// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed variable handles over `watch` cells.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// A field-bus variable value. The plant surface only needs booleans and
/// the handler's int16 position register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i16),
}

impl Value {
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
        }
    }

    pub fn as_int(&self) -> i16 {
        match self {
            Self::Bool(b) => i16::from(*b),
            Self::Int(v) => *v,
        }
    }
}

/// Write handle for a variable owned by exactly one station.
///
/// Cloning is limited to the station's own bindings list; the registry
/// hands out the handle once per path.
#[derive(Clone)]
pub struct Actuator {
    name: Arc<str>,
    initial: Value,
    cell: Arc<watch::Sender<Value>>,
}

impl Actuator {
    pub(crate) fn new(name: Arc<str>, initial: Value, cell: Arc<watch::Sender<Value>>) -> Self {
        Self { name, initial, cell }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&self, on: bool) {
        self.cell.send_replace(Value::Bool(on));
    }

    pub fn set_int(&self, value: i16) {
        self.cell.send_replace(Value::Int(value));
    }

    pub fn get(&self) -> Value {
        *self.cell.borrow()
    }

    pub fn is_on(&self) -> bool {
        self.get().as_bool()
    }

    /// Drive the variable back to its registered initial value. Used by the
    /// stop protocol: booleans go low, the position register returns to its
    /// parking constant.
    pub fn reset(&self) {
        self.cell.send_replace(self.initial);
    }
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator").field("name", &self.name).field("value", &self.get()).finish()
    }
}

/// Read handle for a variable the plant peer drives. The control core
/// never writes through this handle.
#[derive(Clone)]
pub struct Sensor {
    name: Arc<str>,
    cell: Arc<watch::Sender<Value>>,
}

impl Sensor {
    pub(crate) fn new(name: Arc<str>, cell: Arc<watch::Sender<Value>>) -> Self {
        Self { name, cell }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Value {
        *self.cell.borrow()
    }

    pub fn get_bool(&self) -> bool {
        self.get().as_bool()
    }

    /// Subscribe to value changes. The receiver sees the current value
    /// first, matching the initial data-change delivery of the field-bus
    /// subscription service.
    pub fn subscribe(&self) -> watch::Receiver<Value> {
        self.cell.subscribe()
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor").field("name", &self.name).field("value", &self.get()).finish()
    }
}

#[cfg(test)]
#[path = "var_tests.rs"]
mod tests;
