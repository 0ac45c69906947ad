//! Workflow settings
//!
//! Sources, lowest priority first: built-in defaults, an optional file at
//! `~/.config/coverkube/config.{toml,json,yaml}`, then `COVERKUBE_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Tunables for polling, timeouts and the helper pod
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Sleep between convergence polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for old replicas to disappear after a restart
    #[serde(default = "default_rollout_timeout")]
    pub rollout_timeout_secs: u64,

    /// Deadline for a pod to reach Running
    #[serde(default = "default_pod_ready_timeout")]
    pub pod_ready_timeout_secs: u64,

    /// Deadline for a deleted pod to disappear
    #[serde(default = "default_pod_deletion_timeout")]
    pub pod_deletion_timeout_secs: u64,

    /// Image of the collector pod; must ship `bash` and `tar`
    #[serde(default = "default_collector_image")]
    pub collector_image: String,

    /// Requested size of the coverage claim
    #[serde(default = "default_storage_size")]
    pub storage_size: String,

    /// Number of extraction attempts before giving up
    #[serde(default = "default_extraction_attempts")]
    pub extraction_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_rollout_timeout() -> u64 {
    600
}

fn default_pod_ready_timeout() -> u64 {
    300
}

fn default_pod_deletion_timeout() -> u64 {
    300
}

fn default_collector_image() -> String {
    "debian:stable-slim".to_string()
}

fn default_storage_size() -> String {
    "100M".to_string()
}

fn default_extraction_attempts() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            rollout_timeout_secs: default_rollout_timeout(),
            pod_ready_timeout_secs: default_pod_ready_timeout(),
            pod_deletion_timeout_secs: default_pod_deletion_timeout(),
            collector_image: default_collector_image(),
            storage_size: default_storage_size(),
            extraction_attempts: default_extraction_attempts(),
        }
    }
}

impl Settings {
    /// Load settings from the default config file location and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path().as_deref())
    }

    /// Load settings from an explicit file path (without extension) and the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(&path.to_string_lossy()).required(false));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("COVERKUBE").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Apply one timeout to every wait loop
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs();
        self.rollout_timeout_secs = secs;
        self.pod_ready_timeout_secs = secs;
        self.pod_deletion_timeout_secs = secs;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.rollout_timeout_secs)
    }

    pub fn pod_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_ready_timeout_secs)
    }

    pub fn pod_deletion_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_deletion_timeout_secs)
    }
}

/// `~/.config/coverkube/config`, extension resolved by the config crate
fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("coverkube").join("config"))
}
