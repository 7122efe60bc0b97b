// src/cli/mod.rs — CLI definition (clap derive)

pub mod control;
pub mod field;
pub mod migrate;
pub mod serve;
pub mod status;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fieldwatch",
    about = "Real-time hazard tracking and alert distribution for emergency response",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the distribution server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
        /// Skip the durable store; events are distributed but not recorded
        #[arg(long)]
        no_db: bool,
    },
    /// Stream image files to the server as a field unit
    Field {
        /// Unit identifier to register as
        #[arg(short, long)]
        unit: String,
        /// Directory of frames (jpg, png, webp), sent in name order
        #[arg(short, long)]
        frames: PathBuf,
        /// Server endpoint (defaults to [client].endpoint)
        #[arg(long)]
        endpoint: Option<String>,
        /// Stop after one pass instead of cycling through the frames
        #[arg(long)]
        once: bool,
    },
    /// Control-center console: receive alerts and announce them in priority order
    Control {
        /// Operator identifier to register as
        #[arg(short, long)]
        operator: String,
        /// Server endpoint (defaults to [client].endpoint)
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Show resolved configuration, provider availability and store summary
    Status,
    /// Run or inspect database migrations
    Migrate {
        /// Show applied migrations only
        #[arg(long)]
        status: bool,
        /// Revert the most recent migration
        #[arg(long)]
        rollback: bool,
    },
}
