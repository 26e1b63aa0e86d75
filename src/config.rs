//! Application-level configuration loading: round timing, cache lifetime and generator persona.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::questions::{generator::DEFAULT_SYSTEM_PROMPT, supply::DEFAULT_BATCH_TTL};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_BACK_CONFIG_PATH";
/// Default answer window per question.
const DEFAULT_QUESTION_TIME_LIMIT: Duration = Duration::from_secs(30);
/// Default capacity of each game's SSE broadcast channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    question_time_limit: Duration,
    cache_ttl: Duration,
    system_prompt: String,
    event_channel_capacity: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        time_limit_secs = app_config.question_time_limit.as_secs(),
                        cache_ttl_secs = app_config.cache_ttl.as_secs(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Answer window of every question.
    pub fn question_time_limit(&self) -> Duration {
        self.question_time_limit
    }

    /// Lifetime of a cached question batch.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// System message sent with every generation request.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Capacity of each game's SSE broadcast channel.
    pub fn event_channel_capacity(&self) -> usize {
        self.event_channel_capacity
    }

    /// Override the answer window.
    pub fn with_question_time_limit(mut self, limit: Duration) -> Self {
        self.question_time_limit = limit;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            question_time_limit: DEFAULT_QUESTION_TIME_LIMIT,
            cache_ttl: DEFAULT_BATCH_TTL,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    question_time_limit_secs: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    cache_ttl_secs: Duration,
    system_prompt: Option<String>,
    event_channel_capacity: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            question_time_limit_secs: DEFAULT_QUESTION_TIME_LIMIT,
            cache_ttl_secs: DEFAULT_BATCH_TTL,
            system_prompt: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            question_time_limit: value.question_time_limit_secs,
            cache_ttl: value.cache_ttl_secs,
            system_prompt: value
                .system_prompt
                .filter(|prompt| !prompt.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            event_channel_capacity: value.event_channel_capacity.max(1),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
