mod cli;
mod config;
mod error;
mod model;
mod providers;
mod sync;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match cli::parse_args(&args)? {
        Command::Sync { config } => cli::handle_sync(config).await?,
        Command::Status { config } => cli::handle_status(config)?,
        Command::Help => cli::print_help(),
    }

    Ok(())
}
