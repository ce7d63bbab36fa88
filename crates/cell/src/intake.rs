// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Order intake: mints orders and enqueues them to the feeder of the
//! matching type. The RPC adapter on the field-bus surface maps its
//! `CreateOrder(ProductType, Quantity, Cover, Delivery)` method 1:1 onto
//! [`OrderIntake::create_order`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::order::{BoxType, CoverType, Order};
use crate::rack::Rack;

/// Outcome of a `CreateOrder` call: the `(Status, Message)` pair returned
/// over the method surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderReceipt {
    pub accepted: bool,
    pub message: String,
}

impl OrderReceipt {
    fn rejected(message: String) -> Self {
        Self { accepted: false, message }
    }
}

/// Produces typed orders. Never blocks on downstream capacity: the
/// feeder channels are unbounded.
pub struct OrderIntake {
    feeders: HashMap<BoxType, mpsc::UnboundedSender<Order>>,
    rack: Arc<Rack>,
    next_id: AtomicU64,
}

impl OrderIntake {
    pub fn new(rack: Arc<Rack>) -> Self {
        Self { feeders: HashMap::new(), rack, next_id: AtomicU64::new(1) }
    }

    /// Attach the feeder consuming orders of the given type.
    pub fn register_feeder(&mut self, box_type: BoxType, orders: mpsc::UnboundedSender<Order>) {
        self.feeders.insert(box_type, orders);
    }

    /// Validate, mint, and enqueue one order.
    pub fn create_order(
        &self,
        product_type: i16,
        quantity: i16,
        cover: bool,
        delivery: bool,
    ) -> OrderReceipt {
        let Some(box_type) = BoxType::from_code(product_type) else {
            warn!(product_type, "order rejected: unknown product type");
            return OrderReceipt::rejected(format!("Unknown product type code {product_type}."));
        };
        let Ok(quantity) = u16::try_from(quantity) else {
            warn!(quantity, "order rejected: negative quantity");
            return OrderReceipt::rejected(format!("Invalid quantity {quantity}."));
        };

        let Some(feeder) = self.feeders.get(&box_type) else {
            warn!(%box_type, "order rejected: no feeder registered");
            return OrderReceipt::rejected(format!("No feeder available for type {box_type}."));
        };

        // Storage orders claim their rack slots now, so the ninth slot is
        // the last one ever promised.
        if !delivery && !self.rack.reserve(quantity) {
            warn!(quantity, remaining = self.rack.remaining(), "order rejected: rack full");
            return OrderReceipt::rejected(format!(
                "Storage rack cannot hold {quantity} more box(es)."
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let order = Order::new(id, box_type, quantity, CoverType::from_flag(cover), delivery);

        if feeder.send(order.clone()).is_err() {
            if !delivery {
                self.rack.unreserve(quantity);
            }
            warn!(%order, "order rejected: feeder offline");
            return OrderReceipt::rejected(format!("Feeder for type {box_type} is offline."));
        }

        info!(%order, "order received and enqueued");
        OrderReceipt {
            accepted: true,
            message: format!("Order received for {quantity}x type {box_type} received."),
        }
    }
}

#[cfg(test)]
#[path = "intake_tests.rs"]
mod tests;
