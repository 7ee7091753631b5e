//! # Error Taxonomy
//!
//! Typed errors for the recoverable failure classes; `anyhow` stays at the
//! application edges. Dispatch failures never appear here - they are folded
//! into tool-output payloads by the run driver.

use thiserror::Error;

/// Startup configuration problems. Fatal: the process must not come up
/// half-configured.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

/// Skill registry mutations. Recoverable, reported to the caller.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("skill name {0:?} is invalid (letters, digits, '_' and '-', max 64 chars)")]
    InvalidName(String),
    #[error("a skill named {0:?} already exists")]
    Duplicate(String),
    #[error("no skill named {0:?}")]
    NotFound(String),
    #[error("registry lock poisoned")]
    Lock,
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

/// A single skill that failed to compile during loading. Collected, never
/// propagated: the rest of the table still loads.
#[derive(Debug, Clone, Error)]
#[error("skill {name:?} failed to load: {message}")]
pub struct SkillLoadError {
    pub name: String,
    pub message: String,
}

/// Remote assistants-API failures. Surfaced to the user as a failed state.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("assistants API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("assistants API returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("unexpected assistants API response: {0}")]
    Decode(String),
}
