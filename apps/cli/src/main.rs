//! readdo CLI: capture links with an intent, turn them into todos.
//!
//! Catalog commands talk to the local database directly; `worker` and
//! `drain` run the processing pipeline over the capture queue.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
