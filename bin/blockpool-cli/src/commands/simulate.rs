// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `blockpool simulate` command: drive a pool with concurrent workers.
//!
//! Each worker runs a deterministic stream of requests spread across the
//! configured size classes, writes into every block it gets, and keeps a
//! small window of blocks in flight:
//! ```text
//! acquire ─► write ─► hold (up to --hold) ─► release oldest
//!    │
//!    └─ BudgetExceeded ─► release oldest held block, retry later
//! ```
//! With `--leak-rate`, a fraction of blocks is dropped instead of released,
//! which the health report then flags.

use block_pool::{BlockHandle, BlockPool, ManagedPool, PoolConfig, PoolError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shape of the synthetic workload.
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub workers: usize,
    pub ops: usize,
    pub hold: usize,
    pub leak_rate: f64,
}

/// Per-worker outcome.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
struct WorkerReport {
    completed: u64,
    backpressure: u64,
    leaked: u64,
}

pub async fn execute(config: PoolConfig, workload: Workload, json: bool) -> anyhow::Result<()> {
    anyhow::ensure!(workload.workers > 0, "--workers must be at least 1");
    anyhow::ensure!(
        (0.0..=1.0).contains(&workload.leak_rate),
        "--leak-rate must be within [0, 1]"
    );

    let pool = Arc::new(config.build()?);
    let controller = pool.spawn_controller();
    tracing::info!("simulating {workload:?}");

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(workload.workers);
    for worker in 0..workload.workers {
        let pool = Arc::clone(&pool);
        let sizes = config.size_classes.clone();
        tasks.push(tokio::spawn(async move {
            run_worker(&pool, worker, &sizes, workload).await
        }));
    }

    let mut totals = WorkerReport::default();
    for task in tasks {
        let report = task.await??;
        totals.completed += report.completed;
        totals.backpressure += report.backpressure;
        totals.leaked += report.leaked;
    }
    let elapsed = started.elapsed();

    if let Some(task) = controller {
        task.abort();
    }

    if json {
        print_json(&pool, &totals, elapsed)?;
    } else {
        print_text(&pool, &workload, &totals, elapsed);
    }
    Ok(())
}

async fn run_worker(
    pool: &ManagedPool,
    worker: usize,
    sizes: &[usize],
    workload: Workload,
) -> Result<WorkerReport, PoolError> {
    let label = format!("worker-{worker}");
    let largest = sizes.iter().copied().max().unwrap_or(1);
    let mut rng = StdRng::seed_from_u64(worker as u64 + 1);
    let mut held: VecDeque<BlockHandle> = VecDeque::with_capacity(workload.hold + 1);
    let mut report = WorkerReport::default();

    for op in 0..workload.ops {
        // Skewed towards small requests.
        let requested = (rng.gen_range(1..=largest) / rng.gen_range(1..=8usize)).max(1);

        match pool.acquire(requested, &label) {
            Ok(mut block) => {
                let stamp = (op % 251) as u8 + 1;
                let len = block.len().min(64);
                block.as_mut_slice()[..len].fill(stamp);
                held.push_back(block);
                report.completed += 1;
            }
            Err(PoolError::BudgetExceeded { .. }) => {
                report.backpressure += 1;
                if let Some(oldest) = held.pop_front() {
                    pool.release(oldest)?;
                }
            }
            Err(e) => return Err(e),
        }

        while held.len() > workload.hold {
            if let Some(oldest) = held.pop_front() {
                if rng.gen_bool(workload.leak_rate) {
                    report.leaked += 1;
                    drop(oldest);
                } else {
                    pool.release(oldest)?;
                }
            }
        }

        if op % 128 == 0 {
            tokio::task::yield_now().await;
        }
    }

    for block in held {
        pool.release(block)?;
    }
    Ok(report)
}

fn print_text(pool: &ManagedPool, workload: &Workload, totals: &WorkerReport, elapsed: Duration) {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            blockpool · Workload Simulation           ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Workload ───────────────────────────────────────────────
    println!("  Workload");
    println!(
        "   Workers:      {} × {} ops (hold up to {})",
        workload.workers, workload.ops, workload.hold,
    );
    println!("   Elapsed:      {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    println!("   Completed:    {}", totals.completed);
    println!("   Backpressure: {}", totals.backpressure);
    println!("   Leaked:       {}", totals.leaked);
    println!();

    // ── Pool ───────────────────────────────────────────────────
    println!("  Pool");
    println!("   {}", pool.stats().summary());
    for (size, stats) in pool.class_stats() {
        println!(
            "   {:>8} B: {} free / {} checked out (capacity {}), {:.0}% hits",
            size,
            stats.free,
            stats.checked_out,
            stats.capacity,
            stats.hit_ratio() * 100.0,
        );
    }
    if let Some(ceiling) = pool.ceiling() {
        println!(
            "   Budget:       ceiling {ceiling} blocks, {} rejections",
            pool.rejections()
        );
    }
    println!();

    // ── Monitor ────────────────────────────────────────────────
    println!("  Monitor");
    println!("   {}", pool.metrics().summary());
    if let Some(controller) = pool.controller() {
        let state = controller.state();
        println!(
            "   Tuning:       capacity {} in [{}, {}] after {} ticks",
            state.current_capacity, state.min_capacity, state.max_capacity, state.ticks,
        );
    }
    println!();

    // ── Health ─────────────────────────────────────────────────
    for line in pool.health().summary().lines() {
        println!("  {line}");
    }
}

fn print_json(pool: &ManagedPool, totals: &WorkerReport, elapsed: Duration) -> anyhow::Result<()> {
    let classes: BTreeMap<usize, _> = pool.class_stats().into_iter().collect();
    let report = serde_json::json!({
        "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
        "workload": totals,
        "stats": pool.stats(),
        "classes": classes,
        "budget": {
            "ceiling": pool.ceiling(),
            "rejections": pool.rejections(),
        },
        "metrics": pool.metrics(),
        "tuning": pool.controller().map(|c| c.state()),
        "health": pool.health(),
        "sources": pool.source_usage(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
