// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depth-bridge")]
#[command(about = "Frame-stream core for multi-sensor depth cameras")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sensor modules and stream profiles of the simulated device
    Profiles,

    /// Print the effective configuration as JSON
    Config {
        /// Config file (default: <config dir>/depth-bridge/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run the node and summarize the published topics
    Run {
        /// Config file (default: <config dir>/depth-bridge/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Streaming duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Comma-separated filter list, replaces the configured one
        #[arg(short, long)]
        filters: Option<String>,

        /// Publish depth aligned to the other image streams
        #[arg(long)]
        align: bool,

        /// Publish a colored point cloud
        #[arg(long)]
        pointcloud: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=depth_bridge=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Profiles => cli::list_profiles(),
        Commands::Config { config } => cli::print_config(config),
        Commands::Run {
            config,
            duration,
            filters,
            align,
            pointcloud,
        } => cli::run_node(cli::RunOptions {
            config,
            duration,
            filters,
            align,
            pointcloud,
        }),
    }
}
