use std::{fmt, fs, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{ConfigError, PreferenceStore};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080/";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Timings and limits of the reconciliation core, in milliseconds on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// First reconnect delay.
    pub backoff_base_ms: u64,
    /// Ceiling for the exponential reconnect delay.
    pub backoff_cap_ms: u64,
    /// Symmetric jitter as a fraction of the computed delay (0.0 - 1.0).
    pub backoff_jitter: f64,
    /// Give up reconnecting after this many failed attempts. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
    pub fallback_poll_interval_ms: u64,
    /// How long an optimistic send may stay unconfirmed before it is flagged.
    pub pending_deadline_ms: u64,
    /// Delay before the trailing "latest" fetch is issued.
    pub fetch_debounce_ms: u64,
    pub safety_net_interval_ms: u64,
    /// Second catch-up fetch after a reconnect.
    pub reconnect_follow_up_ms: u64,
    /// A connection loss is only announced if it lasts this long.
    pub loss_grace_ms: u64,
    /// Maximum spread of agent turns merged into one composite entry.
    pub group_window_ms: u64,
    /// Number of turns requested per "load older" page.
    pub page_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            backoff_jitter: 0.0,
            max_reconnect_attempts: None,
            fallback_poll_interval_ms: 5_000,
            pending_deadline_ms: 10_000,
            fetch_debounce_ms: 500,
            safety_net_interval_ms: 30_000,
            reconnect_follow_up_ms: 3_000,
            loss_grace_ms: 2_000,
            group_window_ms: 2_000,
            page_size: 50,
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub const fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_interval_ms)
    }

    #[must_use]
    pub const fn pending_deadline(&self) -> Duration {
        Duration::from_millis(self.pending_deadline_ms)
    }

    #[must_use]
    pub const fn fetch_debounce(&self) -> Duration {
        Duration::from_millis(self.fetch_debounce_ms)
    }

    #[must_use]
    pub const fn safety_net_interval(&self) -> Duration {
        Duration::from_millis(self.safety_net_interval_ms)
    }

    #[must_use]
    pub const fn reconnect_follow_up(&self) -> Duration {
        Duration::from_millis(self.reconnect_follow_up_ms)
    }

    #[must_use]
    pub const fn loss_grace(&self) -> Duration {
        Duration::from_millis(self.loss_grace_ms)
    }

    #[must_use]
    pub const fn group_window(&self) -> Duration {
        Duration::from_millis(self.group_window_ms)
    }

    /// Collects every problem instead of stopping at the first one.
    ///
    /// # Errors
    /// Returns the list of human readable problems.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.backoff_base_ms == 0 {
            errors.push("sync.backoff_base_ms must be greater than 0".to_string());
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            errors.push(format!(
                "sync.backoff_cap_ms ({}) must not be below sync.backoff_base_ms ({})",
                self.backoff_cap_ms, self.backoff_base_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            errors.push(format!(
                "sync.backoff_jitter must be between 0.0 and 1.0, got {}",
                self.backoff_jitter
            ));
        }
        if self.max_reconnect_attempts == Some(0) {
            errors.push("sync.max_reconnect_attempts must be at least 1 when set".to_string());
        }
        for (name, value) in [
            ("fallback_poll_interval_ms", self.fallback_poll_interval_ms),
            ("pending_deadline_ms", self.pending_deadline_ms),
            ("safety_net_interval_ms", self.safety_net_interval_ms),
        ] {
            if value == 0 {
                errors.push(format!("sync.{name} must be greater than 0"));
            }
        }
        if self.page_size == 0 {
            errors.push("sync.page_size must be greater than 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// On-disk configuration formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))
    }

    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Yaml => "turnsync.yaml",
            Self::Json => "turnsync.json",
            Self::Toml => "turnsync.toml",
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(format!("unsupported format '{other}'; use yaml, json or toml")),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        })
    }
}

/// The main configuration structure for the turnsync client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the transcript server.
    pub server_url: Url,

    /// Bearer token passed through on every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Logging level
    pub log_level: String,

    pub sync: SyncSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ClientConfig {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            server_url: default_server_url(),
            api_token: None,
            log_level: "info".to_string(),
            sync: SyncSettings::default(),
        }
    }

    /// Loads the configuration from a file and the process environment.
    ///
    /// # Errors
    /// Fails when the file cannot be read or parsed, or an environment value is
    /// malformed.
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::load_config`] with an injected environment lookup.
    ///
    /// Environment values only apply to settings the file left at their default.
    ///
    /// # Errors
    /// See [`ClientConfig::load_config`].
    pub fn load_with_env<F>(config_path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };
        let defaults = Self::with_defaults();

        if config.server_url == defaults.server_url
            && let Some(raw) = env("TURNSYNC_SERVER_URL")
        {
            config.server_url = parse_server_url("TURNSYNC_SERVER_URL", &raw)?;
        }
        if config.api_token.is_none() {
            config.api_token = env("TURNSYNC_API_TOKEN").filter(|token| !token.trim().is_empty());
        }
        if config.log_level == defaults.log_level
            && let Some(level) = env("TURNSYNC_LOG_LEVEL")
        {
            config.log_level = level.trim().to_ascii_lowercase();
        }

        Ok(config)
    }

    /// Reads one configuration file; missing fields keep their defaults.
    ///
    /// # Errors
    /// Fails on I/O errors, unknown extensions and malformed content.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        debug!(path = %path.display(), %format, "loading client configuration");
        match format {
            ConfigFormat::Yaml => serde_yml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            ConfigFormat::Json => {
                serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))
            }
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Fills the server URL and token from stored preferences when neither the
    /// file nor the environment provided them.
    ///
    /// # Errors
    /// Fails when the stored server URL is not a valid URL.
    pub fn apply_preferences(&mut self, preferences: &PreferenceStore) -> Result<(), ConfigError> {
        if self.server_url == default_server_url()
            && let Some(raw) = preferences.get("server", "url")
        {
            self.server_url = parse_server_url("server.url", raw)?;
        }
        if self.api_token.is_none() {
            self.api_token = preferences.get("auth", "token").map(str::to_string);
        }
        Ok(())
    }

    /// Serializes the configuration in the requested format.
    ///
    /// # Errors
    /// Returns [`ConfigError::Serialize`] when the serializer rejects the value.
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Yaml => {
                serde_yml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
            ConfigFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
            }
        }
    }

    /// Validate the complete configuration including sync settings.
    ///
    /// # Errors
    /// Returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.server_url.scheme(), "http" | "https") {
            errors.push(format!(
                "server_url must use http or https, got {}",
                self.server_url.scheme()
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            ));
        }
        if let Err(sync_errors) = self.sync.validate() {
            errors.extend(sync_errors);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn default_server_url() -> Url {
    Url::parse(DEFAULT_SERVER_URL).unwrap_or_else(|_| unreachable!("default server URL is valid"))
}

/// Parses a server base URL, making sure it ends with `/` so relative API
/// paths join underneath it.
///
/// # Errors
/// Returns [`ConfigError::InvalidValue`] naming `key`.
pub fn parse_server_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&normalized).map_err(|err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: err.to_string(),
    })
}
