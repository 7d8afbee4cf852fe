//! # Butterfly-reach CLI
//!
//! Command-line interface for the butterfly-reach library.
//! Computes the road distance from every house to its nearest transit stop.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use butterfly_reach::{
    OverwriteBehavior, ProgressCallback, ReachConfig, ReachOptions, RetryPolicy, RouterConfig,
};
use clap::Parser;
use log::error;

mod cli;

/// Command-line interface for butterfly-reach
#[derive(Parser, Debug)]
#[command(name = "butterfly-reach")]
#[command(about = "Road distance from houses to the nearest transit stop via an OSRM table service")]
#[command(long_about = "Computes, for every house, the shortest road distance to a transit stop
within --max-dist meters, using an OSRM-compatible /table endpoint:
  butterfly-reach houses.geojson stops.geojson http://localhost:5000 out.geojson

Houses with no stop in range get \"min_distance\": null.

File Overwrite Behavior:
  By default, you'll be prompted if the output file exists
  --force                          # Overwrite without asking
  --no-clobber                     # Never overwrite, fail if file exists

Debugging:
  --debug (or DEBUG=1) writes partitions.geojson and debug_lines.geojson
  into --debug-dir. Other DEBUG values leave it off.")]
#[command(version = env!("BUTTERFLY_VERSION"))]
struct Cli {
    /// Houses: GeoJSON points or building footprints
    houses: PathBuf,

    /// Transit stops: GeoJSON points
    stops: PathBuf,

    /// Base URL of the routing service
    router_url: String,

    /// Output GeoJSON file
    output: PathBuf,

    /// Routing range around each stop, in meters
    #[arg(long, default_value_t = 500.0)]
    max_dist: f64,

    /// Partition smoothing radius is max_dist / divisor
    #[arg(long, default_value_t = 3.0)]
    partition_divisor: f64,

    /// Maximum sources x destinations per table request
    #[arg(long, default_value_t = 100_000)]
    max_table_size: usize,

    /// Attempts per table request
    #[arg(long, default_value_t = 10)]
    retries: u32,

    /// Backoff step: attempt i waits i x this many milliseconds
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Routing profile
    #[arg(long, default_value = "driving")]
    profile: String,

    /// Write partitions and evaluated pairs for inspection
    #[arg(long)]
    debug: bool,

    /// Directory for the debug output
    #[arg(long, default_value = "/tmp")]
    debug_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Force overwrite the output file without prompting
    #[arg(short, long)]
    force: bool,

    /// Never overwrite the output file (fail if it exists)
    #[arg(long)]
    no_clobber: bool,
}

/// Only `DEBUG=1` turns the trace on
fn debug_from_env(value: Option<&str>) -> bool {
    value.map(str::trim) == Some("1")
}

fn overwrite_behavior(force: bool, no_clobber: bool) -> anyhow::Result<OverwriteBehavior> {
    match (force, no_clobber) {
        (true, true) => bail!("--force and --no-clobber cannot be used together"),
        (true, false) => Ok(OverwriteBehavior::Force),
        (false, true) => Ok(OverwriteBehavior::NeverOverwrite),
        (false, false) => Ok(OverwriteBehavior::Prompt),
    }
}

impl Cli {
    fn into_config(self, debug_env: bool, progress: Option<ProgressCallback>) -> anyhow::Result<ReachConfig> {
        if self.retries == 0 {
            bail!("--retries must allow at least one attempt");
        }

        let router = RouterConfig {
            base_url: self.router_url,
            profile: self.profile,
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.retries,
                backoff_step: Duration::from_millis(self.backoff_ms),
            },
        };

        let options = ReachOptions {
            max_dist: self.max_dist,
            partition_divisor: self.partition_divisor,
            max_table_size: self.max_table_size,
            trace: false,
            progress,
        };
        options.validate().context("invalid options")?;

        let mut config = ReachConfig::new(self.houses, self.stops, self.output, router);
        config.options = options;
        config.overwrite = overwrite_behavior(self.force, self.no_clobber)?;
        config.debug_dir = (self.debug || debug_env).then_some(self.debug_dir);
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🦋 Butterfly-reach v{} starting...", env!("BUTTERFLY_VERSION"));
    }

    let progress_manager = cli::ProgressManager::new(
        0,
        &format!("🚏 Routing {} to stops in {}", cli.houses.display(), cli.stops.display()),
    );
    let debug_env = debug_from_env(std::env::var("DEBUG").ok().as_deref());
    let config = cli.into_config(debug_env, Some(progress_manager.callback()))?;

    let stats = butterfly_reach::run(&config)
        .await
        .with_context(|| format!("failed to compute distances into {}", config.output.display()))?;

    progress_manager.pb.finish_and_clear();
    eprintln!(
        "📁 Saved to: {} ({} batches, {} requests, {} houses reached)",
        config.output.display(),
        stats.batches,
        stats.requests,
        stats.houses_reached
    );

    Ok(())
}
