use std::io::{self, Write};

use anyhow::{Result, anyhow};
use clap::CommandFactory;
use clap_complete::{Shell, generate};

/// Prints the completion script for the named shell.
///
/// # Errors
/// Fails when `shell` is not one `clap_complete` knows.
pub fn run(shell: &str) -> Result<()> {
    let shell = shell
        .parse::<Shell>()
        .map_err(|err| anyhow!("invalid shell type: {err}"))?;
    write_completion(shell, &mut io::stdout());
    Ok(())
}

fn write_completion(shell: Shell, out: &mut dyn Write) {
    let mut command = crate::Cli::command();
    generate(shell, &mut command, "turnsync", out);
}
