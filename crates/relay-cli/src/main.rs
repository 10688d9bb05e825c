mod bootstrap_helpers;
mod cli_args;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::current_unix_timestamp_ms;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::commands::execute_cli;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let output = execute_cli(&cli, current_unix_timestamp_ms())?;
    let rendered =
        serde_json::to_string_pretty(&output).context("failed to render command output")?;
    println!("{rendered}");
    Ok(())
}
