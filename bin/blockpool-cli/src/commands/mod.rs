// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the helpers they share.

pub mod config;
pub mod simulate;

use anyhow::Context;
use block_pool::PoolConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs a stderr subscriber. `RUST_LOG` wins over the `-v` count.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

/// Loads the config file if one was given, else the defaults.
pub fn resolve_config(path: Option<&Path>) -> anyhow::Result<PoolConfig> {
    match path {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(PoolConfig::default()),
    }
}

/// Parses `"512,4096,64K"` into byte sizes.
pub fn parse_sizes(list: &str) -> anyhow::Result<Vec<usize>> {
    list.split(',')
        .map(|s| {
            block_pool::MemoryBudget::parse(s)
                .map(|b| b.as_bytes())
                .with_context(|| format!("invalid size class '{}'", s.trim()))
        })
        .collect()
}
