//! progtree CLI - drive a simulated workload through a progress tree.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use progtree_core::describe_fraction;
use progtree_progress::{progress_with, Fraction, ProgressSource, SourceConfig};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "progtree")]
#[command(about = "Hierarchical progress tracking demo", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run weighted parts on worker threads under one root
    Simulate {
        /// Root total units
        #[arg(long, default_value = "100")]
        total: i64,
        /// Part as WEIGHT:UNITS; repeat for more parts
        #[arg(long = "part", value_parser = parse_part, default_values = ["80:12", "20:3"])]
        parts: Vec<Part>,
        /// Time spent on each unit
        #[arg(long, default_value = "20")]
        unit_ms: u64,
        /// Cancel the root after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the descriptions of a single node
    Describe {
        /// Total units
        #[arg(long)]
        total: i64,
        /// Completed units
        #[arg(long)]
        completed: i64,
    },
}

/// One captured child: weight in the root, and its own unit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Part {
    weight: i64,
    units: i64,
}

fn parse_part(s: &str) -> Result<Part, String> {
    let (weight, units) = s
        .split_once(':')
        .ok_or_else(|| format!("expected WEIGHT:UNITS, got {s:?}"))?;
    let weight = weight
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid weight {weight:?}: {e}"))?;
    let units = units
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid units {units:?}: {e}"))?;
    if weight < 0 {
        return Err(format!("weight must not be negative, got {weight}"));
    }
    if units <= 0 {
        return Err(format!("units must be positive, got {units}"));
    }
    Ok(Part { weight, units })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Simulate {
            total,
            parts,
            unit_ms,
            cancel_after_ms,
            json,
        } => {
            simulate(
                total,
                &parts,
                Duration::from_millis(unit_ms),
                cancel_after_ms.map(Duration::from_millis),
                json,
            )
            .await?;
        }
        Commands::Describe { total, completed } => {
            let source = ProgressSource::new(total);
            source.set_completed_units(completed);
            println!("{}", source.progress().localized_description());
            println!("{}", source.progress().localized_additional_description());
        }
    }

    Ok(())
}

async fn simulate(
    total: i64,
    parts: &[Part],
    unit: Duration,
    cancel_after: Option<Duration>,
    json: bool,
) -> Result<()> {
    if total <= 0 {
        bail!("root total must be positive, got {total}");
    }
    // An indeterminate part never completes, so the root would never settle
    if let Some(part) = parts.iter().find(|part| part.weight < 0 || part.units <= 0) {
        bail!(
            "part {}:{} needs a non-negative weight and positive units",
            part.weight,
            part.units
        );
    }
    let allocated: i64 = parts.iter().map(|part| part.weight).sum();
    if allocated > total {
        warn!(allocated, total, "parts over-allocate the root");
    }
    let unallocated = (total - allocated).max(0);

    // Children must be constructed on this thread, between become and
    // resign, with no await in between.
    let (root, workers) = progress_with(total, |source| {
        source.set_kind(Some("simulation".to_string()));
        source.progress().on_progress(|fraction: Fraction| {
            info!(%fraction, "{}", describe_fraction(fraction));
        });
        let workers = parts
            .iter()
            .enumerate()
            .map(|(index, part)| {
                source.capture_progress(part.weight, || spawn_part(index, part.units, unit))
            })
            .collect::<Vec<_>>();
        if unallocated > 0 {
            debug!(unallocated, "completing unallocated root units");
            source.capture_progress(unallocated, || ());
        }
        workers
    });

    let canceller = cancel_after.map(|delay| {
        let root = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match root.try_cancel() {
                Ok(()) => info!("Cancelled after {:?}", delay),
                Err(err) => debug!(error = %err, "cancel skipped"),
            }
        })
    });

    let outcome = root.finished().await;
    if let Some(canceller) = canceller {
        canceller.abort();
    }

    let mut done = Vec::with_capacity(workers.len());
    for worker in workers {
        done.push(worker.await.context("worker panicked")?);
    }

    println!("Simulation {outcome}");
    println!("  {}", root.localized_description());
    println!("  {}", root.localized_additional_description());
    for (part, units) in parts.iter().zip(&done) {
        println!("  part {}:{} -> {} units done", part.weight, part.units, units);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&root.snapshot())?);
    }
    Ok(())
}

/// Construct a part's progress here (so it attaches to the current root) and
/// complete its units on a blocking worker.
fn spawn_part(index: usize, units: i64, unit: Duration) -> JoinHandle<i64> {
    let part = ProgressSource::with_config(
        SourceConfig::new()
            .with_total_units(units)
            .with_kind(format!("part-{index}")),
    );
    part.on_cancel(move || debug!(part = index, "part cancelled"));

    tokio::task::spawn_blocking(move || {
        let mut done = 0;
        for _ in 0..units {
            if part.is_cancelled() {
                break;
            }
            std::thread::sleep(unit);
            part.complete_unit();
            done += 1;
        }
        done
    })
}
