// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Control core for the simulated warehouse cell.
#[derive(Debug, Parser)]
#[command(name = "cellctl", version, about)]
pub struct Config {
    /// Log format (json or text).
    #[arg(long, env = "CELL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CELL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Run-controller poll period in milliseconds.
    #[arg(long, env = "CELL_TICK_MS", default_value = "10")]
    pub tick_ms: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_ms == 0 {
            anyhow::bail!("--tick-ms must be at least 1");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Resolve the log filter. A level the operator asked for (flag or
    /// `CELL_LOG_LEVEL`) beats a `RUST_LOG` directive; `RUST_LOG` only
    /// applies while the level sits at its "info" default.
    fn log_filter(&self) -> EnvFilter {
        let explicit =
            std::env::var("CELL_LOG_LEVEL").is_ok() || self.log_level != "info";
        if !explicit {
            if let Ok(env_filter) = EnvFilter::try_from_default_env() {
                return env_filter;
            }
        }
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global tracing subscriber for the cell.
///
/// Station logs are line-per-event; the json format exists for fleet log
/// collectors. A subscriber that is already installed (tests boot many
/// plants in one process) is left in place.
pub fn init_tracing(config: &Config) {
    let subscriber = tracing_subscriber::fmt().with_env_filter(config.log_filter());
    let already_installed = if config.log_format == "json" {
        subscriber.json().try_init().is_err()
    } else {
        subscriber.try_init().is_err()
    };
    if already_installed {
        tracing::debug!("tracing subscriber already installed; keeping it");
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
