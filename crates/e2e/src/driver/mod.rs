//! Browser drivers
//!
//! A driver owns one isolated browser session. [`SmokeCheck`](crate::check::SmokeCheck)
//! talks to it only through [`BrowserDriver`], so the check logic is the same
//! whether a real browser or a plain HTTP fetch renders the page.

pub mod http;
pub mod playwright;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::config::SmokeConfig;
use crate::error::SmokeResult;
use crate::exceptions::UncaughtException;

pub use http::HttpDriver;
pub use playwright::{Browser, PlaywrightDriver};

/// What the browser saw when the navigation settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationResponse {
    /// Final URL after redirects
    pub url: String,
    /// Final HTTP status, if the backend exposes one
    pub status: Option<u16>,
}

impl NavigationResponse {
    pub fn is_success(&self) -> bool {
        self.status.map(|s| (200..300).contains(&s)).unwrap_or(true)
    }
}

#[async_trait]
pub trait BrowserDriver: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Load `url`; errors mean the page never loaded
    async fn navigate(&mut self, url: &Url) -> SmokeResult<NavigationResponse>;

    /// Wait up to `timeout` for a text node equal to (`exact`) or containing `text`
    async fn find_text(&mut self, text: &str, exact: bool, timeout: Duration) -> SmokeResult<bool>;

    /// Drain exceptions the page threw since the last call
    fn take_uncaught_exceptions(&mut self) -> Vec<UncaughtException>;

    /// Visible text of the current page, for diagnostics
    async fn text_snapshot(&mut self) -> SmokeResult<Option<String>>;

    /// Save a failure artifact named `name` under `dir`
    async fn capture_failure(&mut self, _dir: &Path, _name: &str) -> SmokeResult<Option<PathBuf>> {
        Ok(None)
    }

    /// Tear down the session
    async fn close(&mut self) -> SmokeResult<()>;
}

/// Which backend renders pages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Real browser through Playwright (runs client-side JavaScript)
    #[default]
    Playwright,
    /// Plain HTTP fetch of server-rendered HTML
    Http,
}

impl DriverKind {
    /// Start a fresh session for one check
    pub async fn launch(&self, config: &SmokeConfig) -> SmokeResult<Box<dyn BrowserDriver>> {
        match self {
            DriverKind::Playwright => {
                let driver = PlaywrightDriver::launch(config.into()).await?;
                Ok(Box::new(driver))
            }
            DriverKind::Http => {
                let driver = HttpDriver::new(config.into())?;
                Ok(Box::new(driver))
            }
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Playwright => write!(f, "playwright"),
            DriverKind::Http => write!(f, "http"),
        }
    }
}

/// Collapse runs of whitespace to single spaces and trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cap diagnostic text so results stay readable
pub fn truncate_snapshot(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
