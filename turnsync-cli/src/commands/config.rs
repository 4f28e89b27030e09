use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use shared::config::{ClientConfig, ConfigFormat, preferences::split_key};

use super::{open_preferences, resolve_config};
use crate::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Format of the configuration file (yaml, json or toml). Defaults to yaml.
        #[arg(long, short)]
        format: Option<String>,

        /// Output path (default: turnsync.<format> in the current directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        /// Output format (yaml, json or toml). Defaults to yaml.
        #[arg(long, short)]
        format: Option<String>,
    },

    /// Store a preference, e.g. `server.url` or `auth.token`
    Set {
        /// Namespaced key (`namespace.key`)
        key: String,
        value: String,
    },

    /// Print a stored preference
    Get {
        /// Namespaced key (`namespace.key`)
        key: String,
    },

    /// Remove a stored preference
    Unset {
        /// Namespaced key (`namespace.key`)
        key: String,
    },

    /// List every stored preference
    List,
}

fn parse_format(format: Option<&str>) -> Result<ConfigFormat> {
    format
        .unwrap_or("yaml")
        .parse::<ConfigFormat>()
        .map_err(anyhow::Error::msg)
}

/// Runs one `config` subcommand.
///
/// # Errors
/// Fails on unsupported formats, unreadable configuration or preference
/// files, and unknown keys.
pub fn run(action: ConfigAction, global: &GlobalArgs) -> Result<()> {
    match action {
        ConfigAction::Init {
            format,
            output,
            force,
        } => {
            let format = parse_format(format.as_deref())?;
            let path = output.unwrap_or_else(|| PathBuf::from(format.file_name()));
            if path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite it",
                    path.display()
                );
            }
            let rendered = ClientConfig::with_defaults().render(format)?;
            fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Configuration file '{}' generated successfully.", path.display());
        }
        ConfigAction::Show { format } => {
            let format = parse_format(format.as_deref())?;
            let config = resolve_config(global)?;
            print!("{}", config.render(format)?);
        }
        ConfigAction::Set { key, value } => {
            let (namespace, name) = split_key(&key)?;
            let mut preferences = open_preferences(global)?;
            preferences.set(namespace, name, value)?;
            println!("{key} saved to {}", preferences.path().display());
        }
        ConfigAction::Get { key } => {
            let (namespace, name) = split_key(&key)?;
            let preferences = open_preferences(global)?;
            match preferences.get(namespace, name) {
                Some(value) => println!("{value}"),
                None => bail!("{key} is not set"),
            }
        }
        ConfigAction::Unset { key } => {
            let (namespace, name) = split_key(&key)?;
            let mut preferences = open_preferences(global)?;
            if preferences.remove(namespace, name)? {
                println!("{key} removed");
            } else {
                println!("{key} was not set");
            }
        }
        ConfigAction::List => {
            let preferences = open_preferences(global)?;
            for (namespace, name, value) in preferences.entries() {
                println!("{namespace}.{name} = {value}");
            }
        }
    }
    Ok(())
}
