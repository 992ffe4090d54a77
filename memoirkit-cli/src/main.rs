//! `MemoirKit` developer CLI.
//!
//! Drives the backup subsystem against a local directory so backups can be
//! created, inspected and restored without a device.

mod cli;
mod commands;
mod stores;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use commands::App;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "memoirkit_core=debug,memoirkit=debug"
    } else {
        "memoirkit_core=info,memoirkit=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(cli.verbose)
        .init();

    let app = App::new(&cli)?;
    app.run(cli.command).await
}
