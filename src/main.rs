// src/main.rs — fieldwatch entry point

use clap::Parser;

use fieldwatch::cli::{Cli, Commands};
use fieldwatch::infra::config::Config;
use fieldwatch::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    logger::init_logging(&cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Falls back to defaults if no config.toml
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve { port, no_db } => {
            fieldwatch::cli::serve::run_serve(&config, port, no_db).await
        }
        Commands::Field {
            unit,
            frames,
            endpoint,
            once,
        } => {
            fieldwatch::cli::field::run_field(&config, &unit, &frames, endpoint.as_deref(), once)
                .await
        }
        Commands::Control { operator, endpoint } => {
            fieldwatch::cli::control::run_control(&config, &operator, endpoint.as_deref()).await
        }
        Commands::Status => {
            fieldwatch::cli::status::show_status(&config, cli.config.as_deref()).await
        }
        Commands::Migrate { status, rollback } => {
            fieldwatch::cli::migrate::run_migrate(&config, status, rollback).await
        }
    }
}
