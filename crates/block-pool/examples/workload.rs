// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runs a small bursty workload against a self-tuning pool and prints how
//! the controller reshapes it.
//!
//! ```text
//! RUST_LOG=block_pool=info cargo run -p block-pool --example workload
//! ```

use block_pool::{BlockPool, PoolConfig, PoolError};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), PoolError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("block_pool=info")),
        )
        .init();

    let pool = PoolConfig::from_toml(
        r#"
size_classes = [1024, 8192]
initial_count_per_class = 2
memory_budget = "1M"

[tuning]
min_capacity = 4
max_capacity = 64
period_ms = 200
"#,
    )?
    .build()?;

    let controller = pool.spawn_controller();

    for burst in 0..10 {
        let width = if burst % 2 == 0 { 24 } else { 2 };
        let mut held = Vec::with_capacity(width);
        for i in 0..width {
            let size = if i % 3 == 0 { 6000 } else { 700 };
            match pool.acquire(size, "burst") {
                Ok(mut h) => {
                    h.as_mut_slice()[0] = burst as u8;
                    held.push(h);
                }
                Err(e @ PoolError::BudgetExceeded { .. }) => {
                    println!("burst {burst}: backpressure ({e})");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        for h in held {
            pool.release(h)?;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        println!("burst {burst:>2}: {}", pool.stats().summary());
    }

    if let Some(task) = controller {
        task.abort();
    }

    println!("{}", pool.metrics().summary());
    println!("{}", pool.health().summary());
    Ok(())
}
