//! Uncaught page exception filtering
//!
//! Remix apps throw a hydration mismatch error on load when driven by an
//! automated browser. The error is benign for a smoke check, so it is matched
//! here and dropped instead of failing the run.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::SmokeResult;

/// An exception the page threw and did not catch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncaughtException {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl UncaughtException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

/// Patterns for the React hydration error family
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    r"Hydration failed because the initial UI does not match",
    r"There was an error while hydrating",
    r"Text content does not match server-rendered HTML",
    r"Minified React error #(418|419|422|423|425)",
];

pub fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect()
}

/// Decides which uncaught exceptions to ignore
#[derive(Debug, Clone)]
pub struct ExceptionFilter {
    patterns: Vec<Regex>,
}

impl ExceptionFilter {
    /// Compile a filter; patterns match case-insensitively anywhere in the message
    pub fn new<I, S>(patterns: I) -> SmokeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// A filter that suppresses nothing
    pub fn none() -> Self {
        Self { patterns: Vec::new() }
    }

    /// Same filter plus extra patterns
    pub fn extended<I, S>(&self, extra: I) -> SmokeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = self.clone();
        filter.patterns.extend(Self::new(extra)?.patterns);
        Ok(filter)
    }

    pub fn is_suppressed(&self, exception: &UncaughtException) -> bool {
        self.patterns.iter().any(|p| p.is_match(&exception.message))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Split exceptions into (suppressed, unmatched)
    pub fn partition(
        &self,
        exceptions: Vec<UncaughtException>,
    ) -> (Vec<UncaughtException>, Vec<UncaughtException>) {
        exceptions.into_iter().partition(|e| self.is_suppressed(e))
    }
}

impl Default for ExceptionFilter {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
                .collect(),
        }
    }
}
