mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, CrdAction};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check => commands::check::run().await?,
        Commands::List => commands::list::run().await?,
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
        Commands::Run {
            interval_secs,
            metrics_port,
        } => commands::run::run(interval_secs, metrics_port).await?,
    }

    Ok(())
}
