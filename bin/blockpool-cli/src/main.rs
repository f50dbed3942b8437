// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # blockpool
//!
//! Command-line driver for the block-pool manager.
//!
//! ## Usage
//! ```bash
//! # Simulate a concurrent workload against the default pool
//! blockpool simulate --workers 8 --ops 20000
//!
//! # Same, from a config file, with 1% of blocks leaked and JSON output
//! blockpool -c pool.toml simulate --leak-rate 0.01 --json
//!
//! # Print the resolved configuration
//! blockpool -c pool.toml config
//! ```

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blockpool",
    about = "Size-classed, budget-enforced, self-tuning block pool manager",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (CLI flags override its fields).
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic acquire/write/release workload and report pool health.
    Simulate {
        /// Comma-separated size classes in bytes (e.g., "512,4096,65536").
        #[arg(short, long)]
        size_classes: Option<String>,

        /// Blocks pre-populated per size class.
        #[arg(short, long)]
        initial: Option<usize>,

        /// Memory budget (e.g., "64M", "1G").
        #[arg(short = 'b', long)]
        memory_budget: Option<String>,

        /// Enable self-tuning with default bounds if the config has none.
        #[arg(long)]
        tune: bool,

        /// Number of concurrent workers.
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Operations per worker.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,

        /// Most blocks a worker holds at once.
        #[arg(long, default_value_t = 8)]
        hold: usize,

        /// Fraction of blocks dropped without release (0.0 to 1.0).
        #[arg(long, default_value_t = 0.0)]
        leak_rate: f64,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Simulate {
            size_classes,
            initial,
            memory_budget,
            tune,
            workers,
            ops,
            hold,
            leak_rate,
            json,
        } => {
            let mut config = commands::resolve_config(cli.config.as_deref())?;
            if let Some(classes) = size_classes {
                config.size_classes = commands::parse_sizes(&classes)?;
            }
            if let Some(initial) = initial {
                config.initial_count_per_class = initial;
            }
            if memory_budget.is_some() {
                config.memory_budget = memory_budget;
            }
            if tune && config.tuning.is_none() {
                config.tuning = Some(block_pool::TuningConfig {
                    period_ms: 100,
                    ..Default::default()
                });
            }

            let workload = commands::simulate::Workload {
                workers,
                ops,
                hold,
                leak_rate,
            };
            commands::simulate::execute(config, workload, json).await
        }
        Commands::Config => commands::config::execute(cli.config).await,
    }
}
