//! porter CLI: prompt-driven table enrichment.
//!
//! Expands row templates with fetched web resources, sends them to an
//! OpenAI-compatible model and writes validated replies back to the table.

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
