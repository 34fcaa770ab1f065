//! Test runner that orchestrates the app server, driver sessions and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::check::{CheckOptions, CheckOutcome, SmokeCheck};
use crate::config::SmokeConfig;
use crate::driver::BrowserDriver;
use crate::error::{CheckFailure, SmokeError, SmokeResult};
use crate::exceptions::{ExceptionFilter, UncaughtException};
use crate::server::ServerHandle;
use crate::spec::{SmokeSpec, SpecPattern};

/// Slack on top of navigation and polling before a check is aborted
const ABORT_SLACK: Duration = Duration::from_secs(5);

/// Result of running a single check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CheckFailure>,
    /// Harness error that stopped the check before a verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed_exceptions: Vec<UncaughtException>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl TestResult {
    fn errored(name: &str, duration_ms: u64, error: &SmokeError) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            duration_ms,
            url: None,
            failure: None,
            error: Some(error.to_string()),
            suppressed_exceptions: Vec::new(),
            artifact: None,
        }
    }

    /// One-line reason for a failed check
    pub fn reason(&self) -> String {
        match (&self.failure, &self.error) {
            (Some(failure), _) => failure.to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// Result of running all checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub started_at: DateTime<Utc>,
    pub base_url: String,
    pub driver: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Which specs to run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub pattern: Option<String>,
    pub tag: Option<String>,
    pub name: Option<String>,
}

impl Selection {
    pub fn apply(&self, specs: Vec<SmokeSpec>) -> SmokeResult<Vec<SmokeSpec>> {
        let pattern = self.pattern.as_deref().map(SpecPattern::new).transpose()?;

        let selected: Vec<SmokeSpec> = specs
            .into_iter()
            .filter(|s| pattern.as_ref().map(|p| p.matches(s)).unwrap_or(true))
            .filter(|s| self.tag.as_deref().map(|t| s.has_tag(t)).unwrap_or(true))
            .filter(|s| self.name.as_ref().map(|n| &s.name == n).unwrap_or(true))
            .collect();

        if selected.is_empty() {
            return Err(SmokeError::SpecParse(format!(
                "no spec matches the selection {:?}",
                self
            )));
        }
        Ok(selected)
    }
}

/// Main smoke runner
pub struct TestRunner {
    config: SmokeConfig,
    filter: ExceptionFilter,
    server: Option<ServerHandle>,
}

impl TestRunner {
    /// Validate the config and build a runner
    pub fn new(config: SmokeConfig) -> SmokeResult<Self> {
        config.validate()?;
        let filter = config.exception_filter()?;
        Ok(Self {
            config,
            filter,
            server: None,
        })
    }

    pub fn config(&self) -> &SmokeConfig {
        &self.config
    }

    /// Start the app server if one is configured
    pub async fn start_server(&mut self) -> SmokeResult<()> {
        if self.server.is_some() {
            return Ok(()); // Already running
        }
        let Some(server_config) = self.config.server.clone() else {
            return Ok(());
        };

        let base_url = self.config.base_url()?;
        self.server = Some(ServerHandle::spawn(&server_config, &base_url).await?);
        Ok(())
    }

    pub async fn stop_server(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop().await;
        }
    }

    /// Load specs from the configured directory and apply the selection
    pub fn load_specs(&self, selection: &Selection) -> SmokeResult<Vec<SmokeSpec>> {
        let specs = SmokeSpec::load_or_default(&self.config.specs_dir)?;
        selection.apply(specs)
    }

    /// Run checks one after another, each in a fresh driver session
    pub async fn run_specs(&mut self, specs: &[SmokeSpec]) -> SmokeResult<TestSuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        self.start_server().await?;

        info!("Running {} check(s)...", specs.len());

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = self.run_spec(spec).await;
            if result.success {
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                error!("✗ {} - {}", result.name, result.reason());
            }
            results.push(result);
        }

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        Ok(TestSuiteResult {
            started_at,
            base_url: self.config.base_url.clone(),
            driver: self.config.driver.to_string(),
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        })
    }

    /// Run one check with a driver from the configured backend
    pub async fn run_spec(&self, spec: &SmokeSpec) -> TestResult {
        let start = Instant::now();
        match self.config.driver.launch(&self.config).await {
            Ok(mut driver) => self.run_spec_with(spec, driver.as_mut()).await,
            Err(e) => TestResult::errored(&spec.name, start.elapsed().as_millis() as u64, &e),
        }
    }

    /// Run one check on `driver` and close the session afterwards, whatever happened
    pub async fn run_spec_with(&self, spec: &SmokeSpec, driver: &mut dyn BrowserDriver) -> TestResult {
        let start = Instant::now();
        debug!("Running check: {}", spec.name);

        let verdict = self.execute(spec, driver).await;

        let mut artifact = None;
        if self.config.screenshot_on_failure && !matches!(verdict, Ok(Ok(_))) {
            match driver
                .capture_failure(&self.config.screenshot_dir(), &artifact_name(&spec.name))
                .await
            {
                Ok(path) => artifact = path,
                Err(e) => debug!("Failure capture skipped: {}", e),
            }
        }

        if let Err(e) = driver.close().await {
            warn!("Closing {} session failed: {}", driver.name(), e);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let mut result = match verdict {
            Ok(Ok(pass)) => TestResult {
                name: spec.name.clone(),
                success: true,
                duration_ms,
                url: Some(pass.url),
                failure: None,
                error: None,
                suppressed_exceptions: pass.suppressed_exceptions,
                artifact: None,
            },
            Ok(Err(failure)) => TestResult {
                name: spec.name.clone(),
                success: false,
                duration_ms,
                url: None,
                failure: Some(failure),
                error: None,
                suppressed_exceptions: Vec::new(),
                artifact: None,
            },
            Err(e) => TestResult::errored(&spec.name, duration_ms, &e),
        };
        result.artifact = artifact;
        result
    }

    async fn execute(&self, spec: &SmokeSpec, driver: &mut dyn BrowserDriver) -> SmokeResult<CheckOutcome> {
        let base_url = self.config.base_url()?;
        let filter = self.filter.extended(&spec.ignore_exceptions)?;
        let options = CheckOptions::from_spec(
            spec,
            self.config.command_timeout(),
            self.config.exceptions.fail_on_unmatched,
        );
        let limit = self.config.page_load_timeout() + options.timeout + ABORT_SLACK;

        let mut check = SmokeCheck::new(base_url, options, filter);
        let outcome = tokio::time::timeout(limit, check.run(driver)).await;
        match outcome {
            Ok(outcome) => outcome,
            Err(_) => Err(SmokeError::Timeout(format!(
                "check {} aborted after {}s in state {}",
                spec.name,
                limit.as_secs(),
                check.state()
            ))),
        }
    }

    /// Write results as JSON under the output directory
    pub fn write_results(&self, results: &TestSuiteResult) -> SmokeResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// File-system safe name for a check
fn artifact_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
