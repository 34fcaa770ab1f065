//! Runner configuration
//!
//! Resolved in three layers: built-in defaults, then `smoke.toml` when it
//! exists, then environment variables and command-line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::driver::playwright::Browser;
use crate::driver::DriverKind;
use crate::error::{SmokeError, SmokeResult};
use crate::exceptions::{default_ignore_patterns, ExceptionFilter};

pub const DEFAULT_CONFIG_FILE: &str = "smoke.toml";

/// Smoke runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    /// Where the app under test is served
    pub base_url: String,

    /// How long to poll for expected text
    pub default_command_timeout_ms: u64,

    /// How long a navigation may take before it counts as failed
    pub page_load_timeout_ms: u64,

    /// Delay between DOM polls for drivers that poll from Rust
    pub poll_interval_ms: u64,

    /// Directory holding YAML check specs
    pub specs_dir: PathBuf,

    /// Directory for results and failure artifacts
    pub output_dir: PathBuf,

    pub screenshot_on_failure: bool,

    pub driver: DriverKind,

    pub browser: Browser,

    pub headless: bool,

    pub viewport: Viewport,

    pub exceptions: ExceptionConfig,

    /// Optional command that serves the app under test
    pub server: Option<ServerConfig>,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            default_command_timeout_ms: 4000,
            page_load_timeout_ms: 60_000,
            poll_interval_ms: 100,
            specs_dir: PathBuf::from("e2e"),
            output_dir: PathBuf::from("test-results"),
            screenshot_on_failure: true,
            driver: DriverKind::default(),
            browser: Browser::default(),
            headless: true,
            viewport: Viewport::default(),
            exceptions: ExceptionConfig::default(),
            server: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1000, height: 660 }
    }
}

/// Uncaught page exception handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionConfig {
    /// Messages matching any of these are ignored
    pub ignore_patterns: Vec<String>,

    /// Fail the check on an exception no pattern matches
    pub fail_on_unmatched: bool,
}

impl Default for ExceptionConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            fail_on_unmatched: false,
        }
    }
}

/// Command that serves the app under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_startup_timeout_secs() -> u64 {
    60
}

impl ServerConfig {
    /// Build from a shell-style command line, split on whitespace
    pub fn from_command_line(line: &str) -> SmokeResult<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let command = parts
            .next()
            .ok_or_else(|| SmokeError::Config("server command is empty".to_string()))?;
        Ok(Self {
            command,
            args: parts.collect(),
            cwd: None,
            startup_timeout_secs: default_startup_timeout_secs(),
        })
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

/// Values from the environment and command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub driver: Option<DriverKind>,
    pub browser: Option<Browser>,
    pub headless: Option<bool>,
    pub specs_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub server_command: Option<String>,
}

impl SmokeConfig {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load(path: &Path) -> SmokeResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply(&mut self, overrides: Overrides) -> SmokeResult<()> {
        if let Some(base_url) = overrides.base_url {
            self.base_url = base_url;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.default_command_timeout_ms = timeout_ms;
        }
        if let Some(driver) = overrides.driver {
            self.driver = driver;
        }
        if let Some(browser) = overrides.browser {
            self.browser = browser;
        }
        if let Some(headless) = overrides.headless {
            self.headless = headless;
        }
        if let Some(specs_dir) = overrides.specs_dir {
            self.specs_dir = specs_dir;
        }
        if let Some(output_dir) = overrides.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(line) = overrides.server_command {
            let mut server = ServerConfig::from_command_line(&line)?;
            if let Some(existing) = &self.server {
                server.cwd = existing.cwd.clone();
                server.startup_timeout_secs = existing.startup_timeout_secs;
            }
            self.server = Some(server);
        }
        Ok(())
    }

    pub fn validate(&self) -> SmokeResult<()> {
        let url = self.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SmokeError::Config(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.default_command_timeout_ms == 0 {
            return Err(SmokeError::Config(
                "default_command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.page_load_timeout_ms == 0 {
            return Err(SmokeError::Config(
                "page_load_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(SmokeError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        self.exception_filter()?;
        Ok(())
    }

    pub fn base_url(&self) -> SmokeResult<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn exception_filter(&self) -> SmokeResult<ExceptionFilter> {
        ExceptionFilter::new(&self.exceptions.ignore_patterns)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.default_command_timeout_ms)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.output_dir.join("screenshots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SmokeConfig::default();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.default_command_timeout_ms, 4000);
        assert_eq!(config.driver, DriverKind::Playwright);
        assert!(config.headless);
        assert!(!config.exceptions.fail_on_unmatched);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SmokeConfig::load(&dir.path().join("smoke.toml")).unwrap();
        assert_eq!(config.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
base_url = "http://127.0.0.1:8080"
driver = "http"

[exceptions]
fail_on_unmatched = true

[server]
command = "npm"
args = ["run", "start"]
"#
        )
        .unwrap();

        let config = SmokeConfig::load(file.path()).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.driver, DriverKind::Http);
        assert_eq!(config.default_command_timeout_ms, 4000);
        assert!(config.exceptions.fail_on_unmatched);
        // Section default keeps the hydration patterns
        assert!(!config.exceptions.ignore_patterns.is_empty());
        let server = config.server.unwrap();
        assert_eq!(server.command, "npm");
        assert_eq!(server.args, vec!["run", "start"]);
        assert_eq!(server.startup_timeout_secs, 60);
    }

    #[test]
    fn test_overrides_win() {
        let mut config = SmokeConfig::default();
        config
            .apply(Overrides {
                base_url: Some("http://localhost:4000".to_string()),
                timeout_ms: Some(250),
                headless: Some(false),
                server_command: Some("npm run dev".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.base_url, "http://localhost:4000");
        assert_eq!(config.command_timeout(), Duration::from_millis(250));
        assert!(!config.headless);
        let server = config.server.unwrap();
        assert_eq!(server.command, "npm");
        assert_eq!(server.args, vec!["run", "dev"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SmokeConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SmokeConfig {
            base_url: "ftp://localhost".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SmokeError::Config(_))));

        let config = SmokeConfig {
            default_command_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SmokeError::Config(_))));

        let mut config = SmokeConfig::default();
        config.exceptions.ignore_patterns.push("[".to_string());
        assert!(matches!(config.validate(), Err(SmokeError::Pattern(_))));
    }

    #[test]
    fn test_empty_server_command() {
        assert!(ServerConfig::from_command_line("   ").is_err());
    }
}
