use std::path::PathBuf;

use clap::Parser;
use swerve_zenoh_runtime::config::SERVO_PORT;
use swerve_zenoh_runtime::runtime::{self, RunOptions};
use tracing_subscriber::EnvFilter;

/// Swerve drivetrain runtime: zenoh commands in, odometry out.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Drive configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against simulated modules instead of servos
    #[arg(long)]
    sim: bool,

    /// Serial port of the servo bus
    #[arg(long, default_value = SERVO_PORT)]
    port: String,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let options = RunOptions {
        config: args.config,
        sim: args.sim,
        port: args.port,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
