//! # Configuration
//!
//! Client configuration (`client`) and the persisted preference store
//! (`preferences`).

pub mod client;
pub mod preferences;

use std::{io, path::PathBuf};

use thiserror::Error;

pub use client::{ClientConfig, ConfigFormat, SyncSettings};
pub use preferences::PreferenceStore;

/// Failures while loading, validating or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {}", .path.display(), .source)]
    Write { path: PathBuf, source: io::Error },

    #[error("unsupported configuration format for {}; use yaml, json or toml", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid configuration in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
