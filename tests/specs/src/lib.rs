// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario harness: builds the full plant and emulates the physical
//! plant peer.
//!
//! Each station's peer is a small task that watches the station's motor
//! commands and answers with the sensor levels a real cell would produce.
//! Peers wait on *levels* (robust against value coalescing) and hold each
//! sensor level long enough for the station subscriptions to observe both
//! edges of a pulse. Everything runs under paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use cellbus::{Bus, Value};
use cellctl::controller::START_BUTTON;
use cellctl::plant::{self, Plant};

/// Virtual-time budget for any scenario wait.
pub const WAIT_BUDGET: Duration = Duration::from_secs(600);

const SETTLE: Duration = Duration::from_millis(200);
const PULSE: Duration = Duration::from_millis(150);

pub async fn within<F>(fut: F) -> anyhow::Result<F::Output>
where
    F: std::future::Future,
{
    timeout(WAIT_BUDGET, fut).await.map_err(|_| anyhow::anyhow!("scenario wait budget exceeded"))
}

pub async fn wait_until<F: Fn() -> bool>(cond: F) -> anyhow::Result<()> {
    within(async {
        while !cond() {
            sleep(Duration::from_millis(500)).await;
        }
    })
    .await
}

async fn wait_high(bus: &Bus, path: &str) -> anyhow::Result<()> {
    let mut rx = bus.watch(path)?;
    within(rx.wait_for(|v| v.as_bool())).await??;
    Ok(())
}

async fn wait_low(bus: &Bus, path: &str) -> anyhow::Result<()> {
    let mut rx = bus.watch(path)?;
    within(rx.wait_for(|v| !v.as_bool())).await??;
    Ok(())
}

fn drive(bus: &Bus, path: &str, on: bool) -> anyhow::Result<()> {
    bus.drive(path, Value::Bool(on))?;
    Ok(())
}

async fn drive_pulse(bus: &Bus, path: &str) -> anyhow::Result<()> {
    drive(bus, path, true)?;
    sleep(PULSE).await;
    drive(bus, path, false)?;
    Ok(())
}

/// A running plant plus its peer tasks.
pub struct Cell {
    pub bus: Bus,
    pub intake: Arc<cellctl::intake::OrderIntake>,
    pub rack: Arc<cellctl::rack::Rack>,
    pub delivered: Arc<std::sync::atomic::AtomicU64>,
    pub positions: Arc<Mutex<Vec<i16>>>,
    peers: JoinSet<anyhow::Result<()>>,
    shutdown: CancellationToken,
}

impl Cell {
    /// Build the plant, spawn the supervisor, and press start.
    pub async fn start() -> anyhow::Result<Self> {
        let bus = Bus::new();
        let plant = plant::build(&bus, Duration::from_millis(10))?;
        let Plant { intake, rack, delivered, .. } = &plant;
        let (intake, rack, delivered) =
            (Arc::clone(intake), Arc::clone(rack), Arc::clone(delivered));

        let shutdown = CancellationToken::new();
        tokio::spawn(plant.run(shutdown.clone()));

        // Stations reach their start-event waits, then the button edge
        // releases them.
        sleep(Duration::from_millis(100)).await;
        drive(&bus, START_BUTTON, true)?;
        sleep(Duration::from_millis(100)).await;
        drive(&bus, START_BUTTON, false)?;

        let mut cell = Self {
            bus,
            intake,
            rack,
            delivered,
            positions: Arc::new(Mutex::new(Vec::new())),
            peers: JoinSet::new(),
            shutdown,
        };
        cell.spawn_handler_peers()?;
        Ok(cell)
    }

    pub fn spawn<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.peers.spawn(fut);
    }

    pub fn stop(&mut self) {
        self.peers.abort_all();
        self.shutdown.cancel();
    }

    // -- Feeder peers ---------------------------------------------------

    /// Answer one producer line for every box it emits.
    pub fn spawn_feeder_peer(&mut self, object: &str, name: &str, num_conveyors: usize) {
        let bus = self.bus.clone();
        let base = format!("Objects/{object}");
        let name = name.to_owned();
        self.spawn(async move {
            let conveyor = |i: usize| format!("{base}/IO:Conveyor {name}:{i}");
            let start = format!("{base}/IO:Sensor Start {name}");
            let end = format!("{base}/IO:Sensor End {name}");
            let last = conveyor(num_conveyors);
            loop {
                // Box raised, line starts. Keyed on conveyor 1: on a
                // two-conveyor line the last conveyor doubles as the
                // bridge motor, so only conveyor 1 marks a fresh emit.
                wait_high(&bus, &conveyor(1)).await?;
                sleep(SETTLE).await;
                drive_pulse(&bus, &start).await?;
                wait_low(&bus, &conveyor(1)).await?;
                if num_conveyors > 2 {
                    wait_high(&bus, &last).await?;
                }
                sleep(SETTLE).await;
                drive(&bus, &end, true)?;
                wait_low(&bus, &conveyor(2)).await?;

                // The select table pulls the box off the line.
                wait_high(&bus, &last).await?;
                sleep(Duration::from_millis(100)).await;
                drive(&bus, &end, false)?;
                wait_low(&bus, &last).await?;
            }
        });
    }

    // -- Turn table peers -----------------------------------------------

    /// Deck rotation feedback for one table, any routine.
    pub fn spawn_rotate_peer(&mut self, table: &str) {
        let bus = self.bus.clone();
        let base = format!("Objects/TurnsTable/TurnTable {table}");
        let name = table.to_owned();
        self.spawn(async move {
            let rotate = format!("{base}/IO: Rotate {name}");
            let t0 = format!("{base}/IO: Turn0 {name}");
            let t90 = format!("{base}/IO: Turn90 {name}");
            loop {
                wait_high(&bus, &rotate).await?;
                sleep(SETTLE).await;
                drive(&bus, &t0, false)?;
                sleep(SETTLE).await;
                drive(&bus, &t90, true)?;

                wait_low(&bus, &rotate).await?;
                sleep(SETTLE).await;
                drive(&bus, &t90, false)?;
                sleep(SETTLE).await;
                drive(&bus, &t0, true)?;
            }
        });
    }

    fn table_paths(table: &str) -> (String, String, String, String) {
        let base = format!("Objects/TurnsTable/TurnTable {table}");
        (
            format!("{base}/IO: Roll+ {table}"),
            format!("{base}/IO: Roll- {table}"),
            format!("{base}/IO: LimitFront {table}"),
            format!("{base}/IO: LimitBack {table}"),
        )
    }

    /// One green box through the select table (90° left-hand pass).
    pub async fn select_green_box(bus: &Bus) -> anyhow::Result<()> {
        let (_plus, minus, _front, back) = Self::table_paths("Select");
        // Pull onto the deck until the back limit rises.
        wait_high(bus, &minus).await?;
        sleep(Duration::from_millis(300)).await;
        drive(bus, &back, true)?;
        wait_low(bus, &minus).await?;
        // Push out after rotating home; box clears the back limit.
        wait_high(bus, &minus).await?;
        sleep(Duration::from_millis(300)).await;
        drive(bus, &back, false)?;
        wait_low(bus, &minus).await?;
        Ok(())
    }

    /// One blue box straight through the select table. After the back
    /// limit rises the table stops the rollers, hands over, and restarts
    /// them, with no visible gap unless the handover blocks, so the
    /// restart is detected by version, not by level.
    pub async fn select_blue_box(bus: &Bus) -> anyhow::Result<()> {
        let (_plus, minus, front, back) = Self::table_paths("Select");
        wait_high(bus, &minus).await?;
        sleep(Duration::from_millis(300)).await;
        drive_pulse(bus, &front).await?;
        sleep(Duration::from_millis(700)).await;

        let mut minus_rx = bus.watch(&minus)?;
        minus_rx.borrow_and_update();
        drive(bus, &back, true)?;

        // First write after the rising edge is the stop; if the observed
        // value is already high again the restart happened in the same
        // breath.
        within(minus_rx.changed()).await??;
        if !minus_rx.borrow_and_update().as_bool() {
            within(minus_rx.wait_for(|v| v.as_bool())).await??;
        }
        sleep(Duration::from_millis(300)).await;
        drive(bus, &back, false)?;
        wait_low(bus, &minus).await?;
        Ok(())
    }

    /// One metal box through the select table (roller+ toward the front
    /// limit, back limit masked).
    pub async fn select_metal_box(bus: &Bus) -> anyhow::Result<()> {
        let (plus, minus, front, back) = Self::table_paths("Select");
        wait_high(bus, &plus).await?;
        sleep(Duration::from_millis(300)).await;
        drive(bus, &front, true)?;
        wait_low(bus, &plus).await?;
        drive(bus, &front, false)?;
        // Push out with roller-; back limit pulses as the box leaves.
        wait_high(bus, &minus).await?;
        sleep(Duration::from_millis(300)).await;
        drive(bus, &back, true)?;
        sleep(SETTLE).await;
        drive(bus, &back, false)?;
        wait_low(bus, &minus).await?;
        Ok(())
    }

    /// NoCover table storing boxes, forever.
    pub fn spawn_nocover_storage_peer(&mut self) {
        let bus = self.bus.clone();
        self.spawn(async move {
            let (_plus, minus, _front, back) = Self::table_paths("NoCover");
            loop {
                // Arrival: back limit rises once the box is on the deck.
                wait_high(&bus, &minus).await?;
                sleep(Duration::from_millis(300)).await;
                drive(&bus, &back, true)?;
                wait_low(&bus, &minus).await?;
                // Push onto the roller conveyor at 90°.
                wait_high(&bus, &minus).await?;
                sleep(Duration::from_millis(300)).await;
                drive(&bus, &back, false)?;
                wait_low(&bus, &minus).await?;
            }
        });
    }

    /// NoCover table diverting boxes to delivery, forever. The roller
    /// stop/restart around the handover has no visible gap, so the
    /// restart is detected by version before the push edge is driven.
    pub fn spawn_nocover_delivery_peer(&mut self) {
        let bus = self.bus.clone();
        self.spawn(async move {
            let (_plus, minus, _front, back) = Self::table_paths("NoCover");
            loop {
                // Arrival is a falling edge on the back limit.
                wait_high(&bus, &minus).await?;
                sleep(Duration::from_millis(300)).await;
                drive(&bus, &back, true)?;
                sleep(SETTLE).await;

                let mut minus_rx = bus.watch(&minus)?;
                minus_rx.borrow_and_update();
                drive(&bus, &back, false)?;

                // First write after the falling edge is the stop; wait for
                // the rollers to come back before pushing.
                within(minus_rx.changed()).await??;
                if !minus_rx.borrow_and_update().as_bool() {
                    within(minus_rx.wait_for(|v| v.as_bool())).await??;
                }

                // Push toward the delivery conveyor (rising).
                sleep(Duration::from_millis(300)).await;
                drive(&bus, &back, true)?;
                wait_low(&bus, &minus).await?;
                drive(&bus, &back, false)?;
            }
        });
    }

    // -- Conveyor peers -------------------------------------------------

    /// Belt feedback for conveyors whose bridging motor is a separate
    /// variable from engine 0 (input and dispatch belts): start/end
    /// sensors answer the forward engine, and the box leaves when `pull`
    /// rises. The loop does not wait for the pull to drop: with two
    /// boxes in flight the next transport starts while the previous pull
    /// is still up.
    pub fn spawn_conveyor_peer(&mut self, name: &str, pull: &str) {
        let bus = self.bus.clone();
        let base = format!("Objects/Conveyors/Conveyor {name}");
        let name = name.to_owned();
        let pull = pull.to_owned();
        self.spawn(async move {
            let engine = format!("{base}/IO: Engine:0 {name}");
            let start = format!("{base}/IO:Sensor Start {name}");
            let end = format!("{base}/IO:Sensor End {name}");
            loop {
                wait_high(&bus, &engine).await?;
                sleep(SETTLE).await;
                drive_pulse(&bus, &start).await?;
                // The belt restarts for the second segment without a
                // visible gap; feed the end sensor directly.
                sleep(Duration::from_millis(300)).await;
                drive(&bus, &end, true)?;
                wait_low(&bus, &engine).await?;

                wait_high(&bus, &pull).await?;
                sleep(Duration::from_millis(100)).await;
                drive(&bus, &end, false)?;
            }
        });
    }

    /// Roller belt feedback (one engine, bidirectional): the forward
    /// engine doubles as the bridging motor the access buffer toggles, so
    /// each cycle waits for the pull to finish before watching for the
    /// next transport. One box at a time on this segment.
    pub fn spawn_roller_peer(&mut self, name: &str) {
        let bus = self.bus.clone();
        let base = format!("Objects/Conveyors/Conveyor {name}");
        let name = name.to_owned();
        self.spawn(async move {
            let engine = format!("{base}/IO: Engine:0 {name}");
            let start = format!("{base}/IO:Sensor Start {name}");
            let end = format!("{base}/IO:Sensor End {name}");
            loop {
                wait_high(&bus, &engine).await?;
                sleep(SETTLE).await;
                drive_pulse(&bus, &start).await?;
                sleep(Duration::from_millis(300)).await;
                drive(&bus, &end, true)?;
                wait_low(&bus, &engine).await?;

                // Access buffer pulls with the same motor.
                wait_high(&bus, &engine).await?;
                sleep(Duration::from_millis(100)).await;
                drive(&bus, &end, false)?;
                wait_low(&bus, &engine).await?;
            }
        });
    }

    /// Exit belt: capacity one, so the box is handed over straight after
    /// the start sensor and crosses the end sensor under the dock's pull.
    /// The dock motor doubles as the belt engine, so the start pulse for
    /// a following box may land while the previous pull is still up; the
    /// event latch buffers it until that transport arrives.
    pub fn spawn_exit_peer(&mut self) {
        let bus = self.bus.clone();
        self.spawn(async move {
            let engine = "Objects/Conveyors/Conveyor ExitConveyor/IO: Engine:0 ExitConveyor";
            let start = "Objects/Conveyors/Conveyor ExitConveyor/IO:Sensor Start ExitConveyor";
            let end = "Objects/Conveyors/Conveyor ExitConveyor/IO:Sensor End ExitConveyor";
            loop {
                wait_high(&bus, engine).await?;
                sleep(SETTLE).await;
                drive_pulse(&bus, start).await?;
                wait_low(&bus, engine).await?;

                // Dock pull: the box crosses the end sensor on its way out.
                wait_high(&bus, engine).await?;
                sleep(SETTLE).await;
                drive(&bus, end, true)?;
                sleep(SETTLE).await;
                drive(&bus, end, false)?;
            }
        });
    }

    /// Access buffer: pulls the box to the handover point, then sees it
    /// lifted away when the crane raises.
    pub fn spawn_access_peer(&mut self, name: &str) {
        let bus = self.bus.clone();
        let base = format!("Objects/Conveyors/Conveyor {name}");
        let name = name.to_owned();
        self.spawn(async move {
            let engine = format!("{base}/IO: Engine:0 {name}");
            let end = format!("{base}/IO:Sensor End {name}");
            let raise = "Objects/Handler/IO:Move Raise Handler";
            let mut present = false;
            loop {
                wait_high(&bus, &engine).await?;
                sleep(Duration::from_millis(300)).await;
                if !present {
                    drive(&bus, &end, true)?;
                    sleep(SETTLE).await;
                }
                // Arrival at the handover point is a falling edge.
                drive(&bus, &end, false)?;
                wait_low(&bus, &engine).await?;

                // Crane lifts the box: the beam clears (rising).
                wait_high(&bus, raise).await?;
                sleep(Duration::from_millis(100)).await;
                drive(&bus, &end, true)?;
                present = true;
            }
        });
    }

    // -- Crane peers ----------------------------------------------------

    fn spawn_handler_peers(&mut self) -> anyhow::Result<()> {
        const POS: &str = "Objects/Handler/IO:Position Handler";
        const RAISE: &str = "Objects/Handler/IO:Move Raise Handler";
        const MOVE_LEFT: &str = "Objects/Handler/IO:Move Left Handler";
        const MOVE_RIGHT: &str = "Objects/Handler/IO:Move Right Handler";
        const S_X: &str = "Objects/Handler/IO:Sensor X Handler";
        const S_Z: &str = "Objects/Handler/IO:Sensor Z Handler";
        const S_LEFT: &str = "Objects/Handler/IO:Sensor Left Handler";
        const S_RIGHT: &str = "Objects/Handler/IO:Sensor Right Handler";
        const S_CENTER: &str = "Objects/Handler/IO:Sensor Meio Handler";

        // Position moves produce X-axis motion bursts, and every write is
        // recorded for the scenario assertions.
        let bus = self.bus.clone();
        let log = Arc::clone(&self.positions);
        let mut pos_rx = self.bus.watch(POS)?;
        self.spawn(async move {
            loop {
                pos_rx.changed().await?;
                log.lock().push(pos_rx.borrow_and_update().as_int());
                sleep(Duration::from_millis(100)).await;
                drive(&bus, S_X, true)?;
                sleep(Duration::from_millis(300)).await;
                drive(&bus, S_X, false)?;
            }
        });

        // Raising or lowering the grab is a Z-axis motion burst ending low.
        let bus = self.bus.clone();
        let mut raise_rx = self.bus.watch(RAISE)?;
        self.spawn(async move {
            loop {
                raise_rx.changed().await?;
                sleep(Duration::from_millis(100)).await;
                drive(&bus, S_Z, true)?;
                sleep(Duration::from_millis(300)).await;
                drive(&bus, S_Z, false)?;
            }
        });

        // Grab slide feedback.
        let bus = self.bus.clone();
        let mut left_rx = self.bus.watch(MOVE_LEFT)?;
        let mut right_rx = self.bus.watch(MOVE_RIGHT)?;
        self.spawn(async move {
            loop {
                tokio::select! {
                    changed = left_rx.changed() => changed?,
                    changed = right_rx.changed() => changed?,
                }
                let left = bus.read(MOVE_LEFT)?.as_bool();
                let right = bus.read(MOVE_RIGHT)?.as_bool();
                if left {
                    drive(&bus, S_CENTER, false)?;
                    drive(&bus, S_RIGHT, false)?;
                    sleep(Duration::from_millis(100)).await;
                    drive(&bus, S_LEFT, true)?;
                } else if right {
                    drive(&bus, S_CENTER, false)?;
                    drive(&bus, S_LEFT, false)?;
                    sleep(Duration::from_millis(100)).await;
                    drive(&bus, S_RIGHT, true)?;
                } else {
                    drive(&bus, S_LEFT, false)?;
                    drive(&bus, S_RIGHT, false)?;
                    sleep(Duration::from_millis(100)).await;
                    drive(&bus, S_CENTER, true)?;
                }
            }
        });
        Ok(())
    }

    /// Wire up the whole storage path: feeder line peers are added per
    /// scenario; this covers everything from the input conveyor to the
    /// crane for storage flows.
    pub fn spawn_storage_chain(&mut self) {
        self.spawn_rotate_peer("Select");
        self.spawn_rotate_peer("NoCover");
        self.spawn_nocover_storage_peer();
        self.spawn_conveyor_peer(
            "InputConveyor",
            "Objects/Conveyors/Conveyor InputConveyor/IO: Engine:1 InputConveyor",
        );
        self.spawn_roller_peer("RollerAConveyor");
        self.spawn_access_peer("AccAConveyor");
    }

    /// Everything from the input conveyor to the dock for delivery flows.
    pub fn spawn_delivery_chain(&mut self) {
        self.spawn_rotate_peer("Select");
        self.spawn_nocover_delivery_peer();
        self.spawn_conveyor_peer(
            "InputConveyor",
            "Objects/Conveyors/Conveyor InputConveyor/IO: Engine:1 InputConveyor",
        );
        self.spawn_conveyor_peer(
            "DispaConveyor",
            "Objects/Conveyors/Conveyor ExitConveyor/IO: Engine:0 ExitConveyor",
        );
        self.spawn_exit_peer();
    }
}
