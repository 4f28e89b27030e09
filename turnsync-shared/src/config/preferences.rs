//! Namespaced key-value preferences persisted as TOML under the user config
//! directory. Read once at startup, rewritten on every change.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use directories::BaseDirs;
use tracing::debug;

use super::ConfigError;

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    values: Namespaces,
}

impl PreferenceStore {
    /// Default location: `<config dir>/turnsync/preferences.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("turnsync").join("preferences.toml"))
            .unwrap_or_else(|| PathBuf::from("./turnsync-preferences.toml"))
    }

    /// Opens the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    /// Fails when the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&content).map_err(|err| ConfigError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?
        } else {
            Namespaces::new()
        };
        debug!(path = %path.display(), namespaces = values.len(), "loaded preferences");
        Ok(Self { path, values })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, namespace: &str, key: &str) -> Option<&str> {
        self.values
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .map(String::as_str)
    }

    /// Stores a value and persists the file.
    ///
    /// # Errors
    /// Fails when the file cannot be written.
    pub fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), ConfigError> {
        self.values
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self.persist()
    }

    /// Removes a value, persisting only when something was removed.
    ///
    /// # Errors
    /// Fails when the file cannot be written.
    pub fn remove(&mut self, namespace: &str, key: &str) -> Result<bool, ConfigError> {
        let Some(entries) = self.values.get_mut(namespace) else {
            return Ok(false);
        };
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        if entries.is_empty() {
            self.values.remove(namespace);
        }
        self.persist()?;
        Ok(true)
    }

    /// All values as `namespace.key = value` triples, sorted.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.values.iter().flat_map(|(namespace, entries)| {
            entries
                .iter()
                .map(move |(key, value)| (namespace.as_str(), key.as_str(), value.as_str()))
        })
    }

    fn persist(&self) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content =
            toml::to_string_pretty(&self.values).map_err(|err| ConfigError::Serialize(err.to_string()))?;
        fs::write(&self.path, content).map_err(write_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(write_error)?;
        }
        debug!(path = %self.path.display(), "preferences saved");
        Ok(())
    }
}

/// Splits a `namespace.key` argument.
///
/// # Errors
/// Returns [`ConfigError::InvalidValue`] when either part is missing.
pub fn split_key(qualified: &str) -> Result<(&str, &str), ConfigError> {
    match qualified.split_once('.') {
        Some((namespace, key)) if !namespace.is_empty() && !key.is_empty() => Ok((namespace, key)),
        _ => Err(ConfigError::InvalidValue {
            key: qualified.to_string(),
            message: "expected <namespace>.<key>".to_string(),
        }),
    }
}
