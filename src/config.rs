//! Runner configuration
//!
//! Values come from the YAML config file when present, then `PROCLINE_*`
//! environment variables on top. Every tunable has a default, so an empty
//! environment runs with in-crate constants.

use std::{collections::HashMap, fs, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{
    error::ErrorKind,
    identity::{DEFAULT_PIPELINE_ID, PipelineId},
    retry::RetryPolicy
};

/// Configuration for the system runner and its process actors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Datastore URI, e.g. `inmemory:` or `rocksdb:/var/lib/procline`
    ///
    /// Optional because definitions may carry their own store factory; the
    /// runner refuses to start when neither is given.
    pub datastore:            Option<String>,
    /// Pipelines each process runs on
    pub pipeline_ids:         Vec<PipelineId>,
    /// Poll fallback interval for pullers
    pub poll_interval_ms:     u64,
    /// Notifications per log read
    pub page_size:            usize,
    /// Bound of the event and prompt queues inside each actor
    pub queue_capacity:       usize,
    /// Attempts for operational errors at the call, read and apply
    /// boundaries
    pub retry_max_attempts:   u32,
    /// Fixed wait between retry attempts
    pub retry_backoff_ms:     u64,
    /// How long the runner waits for processes to acknowledge Stop
    pub stop_timeout_ms:      u64,
    /// How long a stopping process waits for each loop to finish
    pub loop_join_timeout_ms: u64,
    /// How long a pusher waits for downstream prompt acknowledgements
    pub delivery_timeout_ms:  u64
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            datastore:            None,
            pipeline_ids:         vec![DEFAULT_PIPELINE_ID],
            poll_interval_ms:     1000,
            page_size:            5,
            queue_capacity:       100,
            retry_max_attempts:   10,
            retry_backoff_ms:     100,
            stop_timeout_ms:      6000,
            loop_join_timeout_ms: 3000,
            delivery_timeout_ms:  10000
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file (when present) with environment
    /// overrides applied on top
    pub fn load() -> Result<Self> {
        let mut config = match get_config_file_path() {
            Ok(path) if path.exists() => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?
            }
            _ => Self::default()
        };

        config.apply_overrides(&std::env::vars().collect())?;
        Ok(config)
    }

    /// Apply `PROCLINE_*` overrides from the given variable map
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        if let Some(value) = vars.get("PROCLINE_DATASTORE") {
            self.datastore = Some(value.clone());
        }
        if let Some(value) = vars.get("PROCLINE_PIPELINE_IDS") {
            self.pipeline_ids = value
                .split(',')
                .map(|part| {
                    part.trim()
                        .parse::<PipelineId>()
                        .with_context(|| format!("Invalid PROCLINE_PIPELINE_IDS entry: {}", part))
                })
                .collect::<Result<Vec<_>>>()?;
            if self.pipeline_ids.is_empty() {
                anyhow::bail!("PROCLINE_PIPELINE_IDS must name at least one pipeline");
            }
        }

        if let Some(value) = numeric_override(vars, "PROCLINE_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = value;
        }
        if let Some(value) = numeric_override(vars, "PROCLINE_PAGE_SIZE")? {
            self.page_size = value;
        }
        if let Some(value) = numeric_override(vars, "PROCLINE_QUEUE_CAPACITY")? {
            self.queue_capacity = value;
        }
        if let Some(value) = numeric_override(vars, "PROCLINE_RETRY_MAX_ATTEMPTS")? {
            self.retry_max_attempts = value;
        }
        if let Some(value) = numeric_override(vars, "PROCLINE_RETRY_BACKOFF_MS")? {
            self.retry_backoff_ms = value;
        }
        if let Some(value) = numeric_override(vars, "PROCLINE_STOP_TIMEOUT_MS")? {
            self.stop_timeout_ms = value;
        }
        if let Some(value) = numeric_override(vars, "PROCLINE_LOOP_JOIN_TIMEOUT_MS")? {
            self.loop_join_timeout_ms = value;
        }
        if let Some(value) = numeric_override(vars, "PROCLINE_DELIVERY_TIMEOUT_MS")? {
            self.delivery_timeout_ms = value;
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn loop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_join_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Retry policy over the configured attempt budget and backoff
    pub fn retry_policy(&self, retry_on: &[ErrorKind]) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_backoff(), retry_on)
    }
}

fn numeric_override<T: FromStr>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display
{
    match vars.get(key) {
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => anyhow::bail!("Invalid {}: {}", key, e)
        },
        None => Ok(None)
    }
}

/// Get the project directories for cross-platform config path resolution
pub fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "procline").context("Failed to determine project directories")
}

/// Get the config file path
pub fn get_config_file_path() -> Result<PathBuf> {
    let project_dirs = get_project_dirs()?;
    Ok(project_dirs.config_dir().join("config.yaml"))
}
