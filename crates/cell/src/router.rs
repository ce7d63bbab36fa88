// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue router: a virtual sink that splits one producer's output across
//! two bounded channels by order attribute.

use crate::handover::{HandoverItem, HandoverTx, PermitPool};

/// Where a turn table's processed boxes go: straight into one channel, or
/// through a router that picks the destination per order.
pub enum Downstream {
    Channel { tx: HandoverTx, permits: Option<PermitPool> },
    Router(QueueRouter),
}

impl Downstream {
    /// A plain channel; backpressure comes from queue depth alone.
    pub fn channel(tx: HandoverTx) -> Self {
        Self::Channel { tx, permits: None }
    }

    /// A channel whose enqueue is guarded by the downstream permit pool.
    pub fn guarded(tx: HandoverTx, permits: PermitPool) -> Self {
        Self::Channel { tx, permits: Some(permits) }
    }

    pub fn router(router: QueueRouter) -> Self {
        Self::Router(router)
    }

    /// Acquire the destination's permit (where one exists) and enqueue.
    pub async fn send(&self, item: HandoverItem) -> anyhow::Result<()> {
        match self {
            Self::Channel { tx, permits } => {
                let _permit = match permits {
                    Some(pool) => pool.guard().await,
                    None => None,
                };
                tx.put(item).await
            }
            Self::Router(router) => router.put(item).await,
        }
    }
}

/// Splits storage and delivery flows. The matching destination's permit is
/// held only across the enqueue; the router never holds both permits.
#[derive(Clone)]
pub struct QueueRouter {
    storage: HandoverTx,
    storage_permits: PermitPool,
    delivery: HandoverTx,
    delivery_permits: PermitPool,
}

impl QueueRouter {
    pub fn new(
        storage: HandoverTx,
        storage_permits: PermitPool,
        delivery: HandoverTx,
        delivery_permits: PermitPool,
    ) -> Self {
        Self { storage, storage_permits, delivery, delivery_permits }
    }

    pub async fn put(&self, item: HandoverItem) -> anyhow::Result<()> {
        if item.order.delivery {
            let _permit = self.delivery_permits.guard().await;
            self.delivery.put(item).await
        } else {
            let _permit = self.storage_permits.guard().await;
            self.storage.put(item).await
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
