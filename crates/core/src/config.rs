//! # Configuration
//!
//! Environment-driven settings for the remote assistants API, the poll loop,
//! and the skill capability context. A missing API key is fatal at startup;
//! everything else has a sensible default.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Default assistants API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default model attached to new assistants.
pub const DEFAULT_MODEL: &str = "gpt-4-1106-preview";

/// Prefix for environment variables that feed the [`SkillContext`].
const CONTEXT_ENV_PREFIX: &str = "JEWEL_CTX_";

/// Connection settings for the remote assistants service.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl AssistantConfig {
    /// Read the configuration from the environment.
    ///
    /// `OPENAI_API_KEY` is required; `JEWEL_BASE_URL` and `JEWEL_MODEL`
    /// override the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingEnv("OPENAI_API_KEY"))?;

        let base_url = std::env::var("JEWEL_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let model = std::env::var("JEWEL_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

/// Tuning for the run poll loop: exponential backoff with a hard deadline.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the first status re-check.
    pub initial_interval: Duration,
    /// Backoff factor applied after every check.
    pub backoff_multiplier: f64,
    /// Ceiling for the backoff.
    pub max_interval: Duration,
    /// Hard deadline for one run; exceeding it yields a local timeout.
    pub max_duration: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(2),
            max_duration: Duration::from_secs(120),
        }
    }
}

impl PollConfig {
    /// Read poll tuning from the environment, falling back to defaults.
    ///
    /// `JEWEL_POLL_INITIAL_MS`, `JEWEL_POLL_MAX_MS` and
    /// `JEWEL_POLL_DEADLINE_SECS` are recognized.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_interval: env_millis("JEWEL_POLL_INITIAL_MS")
                .unwrap_or(defaults.initial_interval),
            backoff_multiplier: defaults.backoff_multiplier,
            max_interval: env_millis("JEWEL_POLL_MAX_MS").unwrap_or(defaults.max_interval),
            max_duration: std::env::var("JEWEL_POLL_DEADLINE_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_duration),
        }
    }

    /// Next delay after `current`, capped at `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let scaled = current.mul_f64(self.backoff_multiplier);
        scaled.min(self.max_interval)
    }

    /// Override the hard deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.max_duration = deadline;
        self
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Explicit capability context handed to skill handlers.
///
/// Fields are assembled from `JEWEL_CTX_*` environment variables
/// (`JEWEL_CTX_SAP_API_KEY` becomes `sap_api_key`). A handler only ever sees
/// the fields its skill row declares in `context_keys` - never the whole map
/// and never ambient process credentials.
#[derive(Debug, Clone, Default)]
pub struct SkillContext {
    fields: HashMap<String, String>,
}

impl SkillContext {
    /// Collect all `JEWEL_CTX_*` variables from the environment.
    pub fn from_env() -> Self {
        let fields = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(CONTEXT_ENV_PREFIX)
                    .map(|name| (name.to_ascii_lowercase(), value))
            })
            .collect();
        Self { fields }
    }

    /// Add or replace a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Project the context onto a skill's declared keys.
    ///
    /// Returns the name of the first declared key that is not configured, so
    /// the dispatcher can turn it into a per-call error payload.
    pub fn select(
        &self,
        keys: &[String],
    ) -> Result<serde_json::Map<String, serde_json::Value>, String> {
        let mut out = serde_json::Map::with_capacity(keys.len());
        for key in keys {
            match self.fields.get(key) {
                Some(value) => {
                    out.insert(key.clone(), serde_json::Value::String(value.clone()));
                }
                None => return Err(key.clone()),
            }
        }
        Ok(out)
    }
}
