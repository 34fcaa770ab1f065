//! Declarative YAML check specs

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SmokeError, SmokeResult};

pub const DEFAULT_EXPECT_TEXT: &str = "Discover Remix";

/// A smoke check parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeSpec {
    /// Unique name for this check
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering checks
    #[serde(default)]
    pub tags: Vec<String>,

    /// Route to visit, relative to the base URL
    #[serde(default = "default_path")]
    pub path: String,

    /// Text that must appear on the rendered page
    #[serde(default = "default_expect_text")]
    pub expect_text: String,

    /// Match a whole text node instead of a substring
    #[serde(default)]
    pub exact: bool,

    /// Overrides the default command timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Extra exception patterns ignored for this check only
    #[serde(default)]
    pub ignore_exceptions: Vec<String>,

    /// File this spec was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_expect_text() -> String {
    DEFAULT_EXPECT_TEXT.to_string()
}

impl Default for SmokeSpec {
    /// Visits `/` and looks for the Remix template heading
    fn default() -> Self {
        Self {
            name: "home-page".to_string(),
            description: "Should display template name.".to_string(),
            tags: vec!["smoke".to_string()],
            path: default_path(),
            expect_text: default_expect_text(),
            exact: false,
            timeout_ms: None,
            ignore_exceptions: Vec::new(),
            source: None,
        }
    }
}

impl SmokeSpec {
    /// Parse a spec from a YAML string
    pub fn from_yaml(yaml: &str) -> SmokeResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a spec from a YAML file
    pub fn from_file(path: &Path) -> SmokeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut spec = Self::from_yaml(&content)
            .map_err(|e| SmokeError::SpecParse(format!("{}: {}", path.display(), e)))?;
        spec.source = Some(path.to_path_buf());
        Ok(spec)
    }

    /// Load all specs under a directory, sorted by file path
    pub fn load_all(dir: &Path) -> SmokeResult<Vec<Self>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut specs = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_yaml(e.path()))
        {
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    /// Load specs, falling back to the built-in home page check
    pub fn load_or_default(dir: &Path) -> SmokeResult<Vec<Self>> {
        let specs = Self::load_all(dir)?;
        if specs.is_empty() {
            Ok(vec![Self::default()])
        } else {
            Ok(specs)
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Effective polling timeout for this check
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    fn validate(&self) -> SmokeResult<()> {
        if self.name.trim().is_empty() {
            return Err(SmokeError::SpecParse("name must not be empty".to_string()));
        }
        if self.expect_text.trim().is_empty() {
            return Err(SmokeError::SpecParse(format!(
                "{}: expect_text must not be empty",
                self.name
            )));
        }
        if !self.path.starts_with('/') {
            return Err(SmokeError::SpecParse(format!(
                "{}: path must start with '/', got {:?}",
                self.name, self.path
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(SmokeError::SpecParse(format!(
                "{}: timeout_ms must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

/// Selects specs by file path glob, as in `--spec 'e2e/home*.yaml'`
#[derive(Debug, Clone)]
pub struct SpecPattern {
    matcher: GlobMatcher,
}

impl SpecPattern {
    pub fn new(pattern: &str) -> SmokeResult<Self> {
        Ok(Self {
            matcher: Glob::new(pattern)?.compile_matcher(),
        })
    }

    /// Specs without a source file match on their name
    pub fn matches(&self, spec: &SmokeSpec) -> bool {
        match &spec.source {
            Some(path) => {
                self.matcher.is_match(path)
                    || path.file_name().map(|n| self.matcher.is_match(n)).unwrap_or(false)
            }
            None => self.matcher.is_match(&spec.name),
        }
    }
}
