//! Client configuration file (`docsearch.ron`).
//!
//! Every field is optional; missing fields keep the library defaults.
//! Durations are whole milliseconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use client_logging::client_info;
use docsearch_client::{ClientSettings, PollSettings, RetryPolicy};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "docsearch.ron";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub user_id: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub stream_idle_timeout_ms: u64,
    pub cache_ttl_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_mutations: bool,
    pub poll_initial_delay_ms: u64,
    pub poll_interval_ms: u64,
    /// `None` polls until the job settles.
    pub poll_max_duration_ms: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for AppConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            user_id: settings.user_id,
            connect_timeout_ms: millis(settings.connect_timeout),
            request_timeout_ms: millis(settings.request_timeout),
            stream_idle_timeout_ms: millis(settings.stream_idle_timeout),
            cache_ttl_ms: millis(settings.cache_ttl),
            max_retries: settings.retry.max_retries,
            retry_base_delay_ms: millis(settings.retry.base_delay),
            retry_max_delay_ms: millis(settings.retry.max_delay),
            retry_mutations: settings.retry_mutations,
            poll_initial_delay_ms: millis(settings.poll.initial_delay),
            poll_interval_ms: millis(settings.poll.interval),
            poll_max_duration_ms: settings.poll.max_duration.map(millis),
        }
    }
}

impl AppConfig {
    /// Loads `path`, or `docsearch.ron` in the working directory when no path
    /// is given. Only an explicitly named file is required to exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = ron::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        client_info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn to_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            user_id: self.user_id,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            stream_idle_timeout: Duration::from_millis(self.stream_idle_timeout_ms),
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
            },
            retry_mutations: self.retry_mutations,
            poll: PollSettings {
                initial_delay: Duration::from_millis(self.poll_initial_delay_ms),
                interval: Duration::from_millis(self.poll_interval_ms),
                max_duration: self.poll_max_duration_ms.map(Duration::from_millis),
            },
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
