//! The smoke check: visit a route, wait for text, pass or fail
//!
//! A check walks `NotStarted → Navigating → Polling → {Passed | Failed}` once.
//! Navigation problems and missing text become a [`CheckFailure`]; anything
//! that breaks the driver itself is returned as a [`SmokeError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::driver::{truncate_snapshot, BrowserDriver};
use crate::error::{CheckFailure, SmokeError, SmokeResult};
use crate::exceptions::{ExceptionFilter, UncaughtException};
use crate::spec::SmokeSpec;

const SNAPSHOT_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    NotStarted,
    Navigating,
    Polling,
    Passed,
    Failed,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckState::NotStarted => "not_started",
            CheckState::Navigating => "navigating",
            CheckState::Polling => "polling",
            CheckState::Passed => "passed",
            CheckState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A check that found its text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pass {
    pub url: String,
    pub status: Option<u16>,
    pub duration_ms: u64,
    /// Exceptions the filter ignored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed_exceptions: Vec<UncaughtException>,
}

pub type CheckOutcome = Result<Pass, CheckFailure>;

/// Per-check settings
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub path: String,
    pub text: String,
    pub exact: bool,
    pub timeout: Duration,
    pub fail_on_unmatched: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        let spec = SmokeSpec::default();
        Self {
            path: spec.path,
            text: spec.expect_text,
            exact: spec.exact,
            timeout: Duration::from_millis(4000),
            fail_on_unmatched: false,
        }
    }
}

impl CheckOptions {
    pub fn from_spec(spec: &SmokeSpec, default_timeout: Duration, fail_on_unmatched: bool) -> Self {
        Self {
            path: spec.path.clone(),
            text: spec.expect_text.clone(),
            exact: spec.exact,
            timeout: spec.timeout(default_timeout),
            fail_on_unmatched,
        }
    }
}

pub struct SmokeCheck {
    base_url: Url,
    options: CheckOptions,
    filter: ExceptionFilter,
    state: CheckState,
    suppressed: Vec<UncaughtException>,
}

impl SmokeCheck {
    pub fn new(base_url: Url, options: CheckOptions, filter: ExceptionFilter) -> Self {
        Self {
            base_url,
            options,
            filter,
            state: CheckState::NotStarted,
            suppressed: Vec::new(),
        }
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    /// Absolute URL the check visits
    pub fn target_url(&self) -> SmokeResult<Url> {
        Ok(self.base_url.join(&self.options.path)?)
    }

    /// Run the check against an open driver session
    ///
    /// The caller owns the session and closes it afterwards, on every path.
    pub async fn run(&mut self, driver: &mut dyn BrowserDriver) -> SmokeResult<CheckOutcome> {
        if self.state != CheckState::NotStarted {
            return Err(SmokeError::InvalidState(self.state.to_string()));
        }

        let start = Instant::now();
        let url = self.target_url()?;

        self.transition(CheckState::Navigating);
        info!("Visiting {} ({})", url, driver.name());

        let nav = match driver.navigate(&url).await {
            Ok(nav) => nav,
            Err(SmokeError::Navigation { url, reason }) => {
                return Ok(self.fail(CheckFailure::NavigationError { url, reason }));
            }
            Err(e) => {
                self.transition(CheckState::Failed);
                return Err(e);
            }
        };

        if !nav.is_success() {
            let status = nav.status.unwrap_or_default();
            return Ok(self.fail(CheckFailure::NavigationError {
                url: nav.url,
                reason: format!("server responded with status {}", status),
            }));
        }

        if let Some(failure) = self.drain_exceptions(driver) {
            return Ok(self.fail(failure));
        }

        self.transition(CheckState::Polling);
        debug!(
            "Looking for {:?} (exact: {}, timeout: {}ms)",
            self.options.text,
            self.options.exact,
            self.options.timeout.as_millis()
        );

        let found = match driver
            .find_text(&self.options.text, self.options.exact, self.options.timeout)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                self.transition(CheckState::Failed);
                return Err(e);
            }
        };

        if let Some(failure) = self.drain_exceptions(driver) {
            return Ok(self.fail(failure));
        }

        if !found {
            let snapshot = match driver.text_snapshot().await {
                Ok(text) => text.map(|t| truncate_snapshot(&t, SNAPSHOT_LIMIT)),
                Err(e) => {
                    debug!("Could not snapshot page text: {}", e);
                    None
                }
            };
            return Ok(self.fail(CheckFailure::AssertionTimeout {
                text: self.options.text.clone(),
                timeout_ms: self.options.timeout.as_millis() as u64,
                snapshot,
            }));
        }

        self.transition(CheckState::Passed);
        Ok(Ok(Pass {
            url: nav.url,
            status: nav.status,
            duration_ms: start.elapsed().as_millis() as u64,
            suppressed_exceptions: std::mem::take(&mut self.suppressed),
        }))
    }

    /// Apply the exception filter to whatever the page threw so far
    fn drain_exceptions(&mut self, driver: &mut dyn BrowserDriver) -> Option<CheckFailure> {
        let (suppressed, unmatched) = self.filter.partition(driver.take_uncaught_exceptions());

        for exception in &suppressed {
            debug!("Ignoring uncaught exception: {}", exception.message);
        }
        self.suppressed.extend(suppressed);

        let mut failure = None;
        for exception in unmatched {
            warn!("Uncaught exception in page: {}", exception.message);
            if self.options.fail_on_unmatched && failure.is_none() {
                failure = Some(CheckFailure::UncaughtException {
                    message: exception.message,
                });
            }
        }
        failure
    }

    fn fail(&mut self, failure: CheckFailure) -> CheckOutcome {
        self.transition(CheckState::Failed);
        Err(failure)
    }

    fn transition(&mut self, next: CheckState) {
        debug!("Check state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Visit `base_url` and look for the text described by `options`
pub async fn run_smoke_check(
    base_url: &Url,
    options: CheckOptions,
    filter: ExceptionFilter,
    driver: &mut dyn BrowserDriver,
) -> SmokeResult<CheckOutcome> {
    SmokeCheck::new(base_url.clone(), options, filter).run(driver).await
}
