//! ## kestrel-cli
//! **Command line front end for the simulation kernel**
//!
//! Runs the built-in rally model, writes a checkpoint part way through and
//! restarts from it.
//!
//! ### Expectations:
//! - Configuration from `config/kestrel.yaml` or `--config`, then `KESTREL_*`
//! - Flags override both

use clap::Parser;

mod commands;
mod error;
mod rally;

use commands::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run(args)?,
        Commands::Restart(args) => commands::restart(args)?,
        Commands::Inspect(args) => commands::inspect(args)?,
    }
    Ok(())
}
