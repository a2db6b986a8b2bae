// Preach: probabilistic rare-path search
//
// Builds a branch-level CFG with per-outcome probabilities, enumerates
// paths rarest-first, and selects the least probable ones for test
// generation.

use anyhow::Result;
use clap::Parser;

use preach::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    run_command(cli)?;

    Ok(())
}

fn run_command(cli: Cli) -> Result<()> {
    match cli.command.clone() {
        Commands::Search(args) => cli::cmds::search(args, &cli)?,
        Commands::Select(args) => cli::cmds::select(args, &cli)?,
        Commands::Cfg(args) => cli::cmds::cfg(args, &cli)?,
    }
    Ok(())
}
