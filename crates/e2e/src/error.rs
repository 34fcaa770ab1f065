//! Error types for smoke checks
//!
//! Two layers: [`CheckFailure`] is the verdict of a check that ran to
//! completion, [`SmokeError`] is anything that stopped the harness itself
//! (bad config, missing Node, broken bridge, IO).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmokeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server did not answer at {url} after {attempts} attempts")]
    ServerNotReady { url: String, attempts: usize },

    #[error("Node.js not found. Install Node and run: npx playwright install")]
    NodeNotFound,

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Spec parse error: {0}")]
    SpecParse(String),

    #[error("Check already ran (state: {0})")]
    InvalidState(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid glob: {0}")]
    Glob(#[from] globset::Error),
}

pub type SmokeResult<T> = Result<T, SmokeError>;

/// Why a check failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckFailure {
    #[error("navigation to {url} failed: {reason}")]
    NavigationError { url: String, reason: String },

    #[error("expected to find text {text:?} within {timeout_ms}ms, but never did")]
    AssertionTimeout {
        text: String,
        timeout_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },

    #[error("uncaught exception in page: {message}")]
    UncaughtException { message: String },
}

impl CheckFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckFailure::NavigationError { .. } => "navigation_error",
            CheckFailure::AssertionTimeout { .. } => "assertion_timeout",
            CheckFailure::UncaughtException { .. } => "uncaught_exception",
        }
    }
}
