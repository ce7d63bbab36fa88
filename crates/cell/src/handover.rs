// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handover primitives: the (queue, semaphore) pair through which adjacent
//! stations exchange custody of a box.
//!
//! The queue carries the in-flight items; the permit pool counts free
//! downstream slots. Who acquires and who releases is part of each
//! station's algorithm, not of the primitive: producers that only guard
//! the enqueue take a transient RAII permit, while receivers that throttle
//! their belt hold a permit from intake until the next stage has pulled
//! the box.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::order::Order;

/// Capability handed downstream with each item: toggle the upstream
/// stage's bridging motor so the receiver can pull the physical box
/// without knowing the upstream type.
#[async_trait]
pub trait AdvancePrevious: Send + Sync {
    async fn toggle(&self, on: bool);
}

/// First stage of a flow: nothing upstream to drive.
pub struct NoPrevious;

#[async_trait]
impl AdvancePrevious for NoPrevious {
    async fn toggle(&self, _on: bool) {}
}

/// An order plus the move-previous capability. The capability is valid
/// while the item sits in the channel or is being processed by its
/// receiver; after the receiver signals custody complete upstream it must
/// not be invoked again.
pub struct HandoverItem {
    pub order: Order,
    pub move_prev: Arc<dyn AdvancePrevious>,
}

impl HandoverItem {
    pub fn new(order: Order, move_prev: Arc<dyn AdvancePrevious>) -> Self {
        Self { order, move_prev }
    }
}

impl fmt::Debug for HandoverItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoverItem").field("order", &self.order).finish()
    }
}

/// Create a handover queue holding at most `depth` in-flight items.
pub fn channel(depth: usize) -> (HandoverTx, HandoverRx) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (HandoverTx { tx }, HandoverRx { rx })
}

/// Producer side of a handover queue.
#[derive(Clone)]
pub struct HandoverTx {
    tx: mpsc::Sender<HandoverItem>,
}

impl HandoverTx {
    /// Enqueue an item; waits while the queue is at depth.
    pub async fn put(&self, item: HandoverItem) -> anyhow::Result<()> {
        self.tx.send(item).await.map_err(|_| anyhow::anyhow!("handover queue closed"))
    }
}

/// Consumer side of a handover queue.
pub struct HandoverRx {
    rx: mpsc::Receiver<HandoverItem>,
}

impl HandoverRx {
    /// Wait for the next item. `None` once every producer is gone.
    pub async fn get(&mut self) -> Option<HandoverItem> {
        self.rx.recv().await
    }
}

/// Permit semaphore backing a handover channel's capacity contract.
#[derive(Clone)]
pub struct PermitPool {
    sem: Arc<Semaphore>,
}

impl PermitPool {
    pub fn new(permits: usize) -> Self {
        Self { sem: Arc::new(Semaphore::new(permits)) }
    }

    /// Take a permit and keep holding it past this call. Pair with exactly
    /// one [`release`](Self::release).
    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }

    /// Return a permit taken with [`acquire`](Self::acquire).
    pub fn release(&self) {
        self.sem.add_permits(1);
    }

    /// Transient hold, released on drop: the producer-side guard around a
    /// single enqueue.
    pub async fn guard(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.sem).acquire_owned().await.ok()
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

#[cfg(test)]
#[path = "handover_tests.rs"]
mod tests;
