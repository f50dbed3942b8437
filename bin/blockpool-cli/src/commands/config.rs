// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `blockpool config` command: print the resolved configuration.
//!
//! With no `--config`, prints the defaults, which makes a starting point
//! for a config file:
//! ```text
//! blockpool config > pool.toml
//! ```

use std::path::PathBuf;

pub async fn execute(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::resolve_config(path.as_deref())?;
    config.validate()?;
    print!("{}", config.to_toml()?);

    if let Some(budget) = config.parse_budget()? {
        let largest = config.size_classes.iter().copied().max().unwrap_or(0);
        eprintln!(
            "# budget {budget} holds {} blocks of the largest class ({largest} bytes)",
            budget.blocks_of(largest),
        );
    }
    Ok(())
}
