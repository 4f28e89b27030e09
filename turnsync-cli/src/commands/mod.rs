pub mod completion;
pub mod config;
pub mod follow;
pub mod history;
pub mod render;
pub mod send;
pub mod sessions;

use anyhow::{Context, Result};
use shared::config::{ClientConfig, ConfigError, PreferenceStore, client::parse_server_url};

use crate::GlobalArgs;

/// Opens the preference store named on the command line, or the default one.
pub fn open_preferences(global: &GlobalArgs) -> Result<PreferenceStore> {
    let path = global
        .preferences
        .clone()
        .unwrap_or_else(PreferenceStore::default_path);
    PreferenceStore::open(&path)
        .with_context(|| format!("failed to open preferences at {}", path.display()))
}

/// Resolves the effective configuration: defaults, file, environment, stored
/// preferences, then command-line flags.
pub fn resolve_config(global: &GlobalArgs) -> Result<ClientConfig> {
    let mut config = ClientConfig::load_config(global.config.as_deref())
        .context("failed to load configuration")?;
    let preferences = open_preferences(global)?;
    config.apply_preferences(&preferences)?;

    if let Some(server) = &global.server {
        config.server_url = parse_server_url("--server", server)?;
    }
    if let Some(token) = &global.token {
        config.api_token = Some(token.clone());
    }

    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}
