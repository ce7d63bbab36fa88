// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The order model: what the intake mints and the stations carry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Product type of a box. Wire codes match the intake method's int16
/// encoding (1 = green, 2 = blue, 3 = metal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxType {
    Green,
    Blue,
    Metal,
}

impl BoxType {
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Green),
            2 => Some(Self::Blue),
            3 => Some(Self::Metal),
            _ => None,
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Self::Green => 1,
            Self::Blue => 2,
            Self::Metal => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Blue => "BLUE",
            Self::Metal => "METAL",
        }
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the box gets a cover on its way through the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverType {
    With,
    No,
}

impl CoverType {
    pub fn from_flag(cover: bool) -> Self {
        if cover {
            Self::With
        } else {
            Self::No
        }
    }
}

/// Lifecycle state of an order. `Withdrawal` exists in the model but no
/// stage implements the reverse flow yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Wait,
    Production,
    Storage,
    Withdrawal,
    Delivery,
}

/// A production order. Owned by exactly one stage at a time, the stage
/// whose input channel currently holds it. For multi-box orders each
/// emitted box carries its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub box_type: BoxType,
    pub quantity: u16,
    pub cover: CoverType,
    pub delivery: bool,
    pub state: OrderState,
    pub storage_slot: Option<u8>,
}

impl Order {
    pub fn new(id: u64, box_type: BoxType, quantity: u16, cover: CoverType, delivery: bool) -> Self {
        Self { id, box_type, quantity, cover, delivery, state: OrderState::Wait, storage_slot: None }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order(id={}, product_type={}, quantity={}, state={:?}, delivery={})",
            self.id, self.box_type, self.quantity, self.state, self.delivery
        )
    }
}

#[cfg(test)]
#[path = "order_tests.rs"]
mod tests;
