//! Client configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::storage::{self, FileStorage, LocalStorage, MemoryStorage};

pub const ENV_REQUEST_TIMEOUT_MS: &str = "LEDGERLINE_REQUEST_TIMEOUT_MS";
pub const ENV_STORAGE_PATH: &str = "LEDGERLINE_STORAGE_PATH";
pub const ENV_ALLOW_BYPASS: &str = "LEDGERLINE_ALLOW_BYPASS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound for each backend call. `None` waits indefinitely.
    pub request_deadline: Option<Duration>,
    /// File-backed local storage location; `None` keeps it in memory.
    pub storage_path: Option<PathBuf>,
    /// Whether the development authorization bypass may be enabled.
    pub allow_bypass: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_deadline: None,
            storage_path: None,
            allow_bypass: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_REQUEST_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            // 0 disables the deadline.
            config.request_deadline = (millis > 0).then(|| Duration::from_millis(millis));
        }

        if let Some(raw) = lookup(ENV_STORAGE_PATH) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                config.storage_path = Some(PathBuf::from(trimmed));
            }
        }

        if let Some(raw) = lookup(ENV_ALLOW_BYPASS) {
            config.allow_bypass = parse_bool(&raw).ok_or(ConfigError::Invalid {
                key: ENV_ALLOW_BYPASS,
                value: raw.clone(),
            })?;
        }

        Ok(config)
    }

    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = Some(deadline);
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Persist to `<data_dir>/ledgerline/local-storage.json`.
    pub fn with_default_storage_path(self) -> anyhow::Result<Self> {
        Ok(self.with_storage_path(storage::default_storage_path()?))
    }

    pub fn with_allow_bypass(mut self, allow: bool) -> Self {
        self.allow_bypass = allow;
        self
    }

    /// Open the configured local storage.
    pub fn open_storage(&self) -> anyhow::Result<Arc<dyn LocalStorage>> {
        Ok(match &self.storage_path {
            Some(path) => Arc::new(FileStorage::open(path)?),
            None => Arc::new(MemoryStorage::new()),
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
