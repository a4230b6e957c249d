//! spotgridd: the spotgrid command-line daemon.
//!
//! Each invocation does one thing and exits; an external scheduler (cron,
//! a CI plan, a systemd timer) decides how often cycles run.
//!
//! # Usage
//!
//! ```text
//! spotgridd init --fleet-id sfr-1234 --region us-east-1 > spotgrid.toml
//! spotgridd validate --config spotgrid.toml
//! spotgridd cycle --config spotgrid.toml --world world.json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

const DEFAULT_LOG_FILTER: &str = "info,spotgridd=debug,spotgrid=debug";

#[derive(Parser)]
#[command(
    name = "spotgridd",
    about = "Spot fleet autoscaler for build agents",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a config file and list every invalid field.
    Validate {
        #[arg(short, long, default_value = "spotgrid.toml")]
        config: PathBuf,
    },
    /// Print a scaffolded config, or write it with --output.
    Init {
        #[arg(long)]
        fleet_id: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        /// Write here instead of stdout. Refuses to overwrite.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run one decision cycle against a fleet and build-server snapshot.
    Cycle {
        #[arg(short, long, default_value = "spotgrid.toml")]
        config: PathBuf,
        /// JSON world snapshot; rewritten with the cycle's effects.
        #[arg(short, long)]
        world: PathBuf,
        /// Clock for queue wait times (default: now).
        #[arg(long)]
        now_ms: Option<u64>,
        /// Leave the world snapshot untouched.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Validate { config } => commands::validate::run(&config),
        Command::Init {
            fleet_id,
            region,
            output,
        } => commands::init::run(&fleet_id, &region, output.as_deref()),
        Command::Cycle {
            config,
            world,
            now_ms,
            dry_run,
        } => commands::cycle::run(&config, &world, now_ms, dry_run).await,
    }
}

/// Logs go to stderr so that reports on stdout stay machine-readable.
fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
