// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cellbus::Bus;
use cellctl::config::{init_tracing, Config};
use cellctl::plant;

// Single-threaded by design: stations interleave only at explicit
// suspension points, and the stop protocol relies on it.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let bus = Bus::new();
    let plant = plant::build(&bus, config.tick_period())?;
    info!(variables = bus.paths().len(), "warehouse cell control core up");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            signal_token.cancel();
        }
    });

    plant.run(shutdown).await
}
