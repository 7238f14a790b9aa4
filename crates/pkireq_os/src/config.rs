#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pkireq_engines::notifier::NOTIFIER_LOG;
use pkireq_engines::policy::POLICY_ACCEPT_ALL;
use pkireq_engines::registry::RegistryError;
use pkireq_engines::service::SERVICE_NOOP;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const ENV_DEFAULT_APPROVAL_THRESHOLD: &str = "PKIREQ_DEFAULT_APPROVAL_THRESHOLD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse queue config from {origin}: {source}")]
    ParseToml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid queue config field {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error(transparent)]
    Plugin(#[from] RegistryError),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// How many distinct agent approvals a request type needs before it moves to
/// APPROVED. Zero is read as one.
pub trait ApprovalThreshold: Send + Sync {
    fn required_approvals(&self, request_type: &str) -> u32;
}

impl<F> ApprovalThreshold for F
where
    F: Fn(&str) -> u32 + Send + Sync,
{
    fn required_approvals(&self, request_type: &str) -> u32 {
        self(request_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub default_approval_threshold: u32,
    pub approval_thresholds: BTreeMap<String, u32>,
    /// When false no pending notification is sent at all.
    pub notify_pending: bool,
    pub policy: String,
    pub service: String,
    pub notifier: String,
    /// Falls back to `notifier` when unset.
    pub pending_notifier: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_approval_threshold: 1,
            approval_thresholds: BTreeMap::new(),
            notify_pending: true,
            policy: POLICY_ACCEPT_ALL.to_string(),
            service: SERVICE_NOOP.to_string(),
            notifier: NOTIFIER_LOG.to_string(),
            pending_notifier: None,
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<inline>")
    }

    /// Reads `path`, applies environment overrides, then validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        debug!(path = %path.display(), "queue config loaded");
        Ok(config)
    }

    /// Parses and validates `path` as written, without environment overrides.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_with(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::apply_env_overrides`] with a caller-supplied variable
    /// lookup.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_DEFAULT_APPROVAL_THRESHOLD) {
            self.default_approval_threshold = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(ENV_DEFAULT_APPROVAL_THRESHOLD, "expected unsigned integer")
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_approval_threshold == 0 {
            return Err(ConfigError::invalid(
                "default_approval_threshold",
                "must be at least 1",
            ));
        }
        if let Some((request_type, _)) = self.approval_thresholds.iter().find(|(_, n)| **n == 0) {
            return Err(ConfigError::invalid(
                format!("approval_thresholds.{request_type}"),
                "must be at least 1",
            ));
        }
        for (field, value) in [
            ("policy", &self.policy),
            ("service", &self.service),
            ("notifier", &self.notifier),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        Ok(())
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::ParseToml {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl ApprovalThreshold for QueueConfig {
    fn required_approvals(&self, request_type: &str) -> u32 {
        self.approval_thresholds
            .get(request_type)
            .copied()
            .unwrap_or(self.default_approval_threshold)
    }
}
