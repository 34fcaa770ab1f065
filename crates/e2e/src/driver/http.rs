//! Static HTTP driver
//!
//! Fetches server-rendered HTML and searches its text. No JavaScript runs, so
//! the page can never throw; polling re-fetches the page until the text shows
//! up or the timeout passes.

use async_trait::async_trait;
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use super::{normalize_whitespace, BrowserDriver, NavigationResponse};
use crate::config::SmokeConfig;
use crate::error::{SmokeError, SmokeResult};
use crate::exceptions::UncaughtException;

#[derive(Debug, Clone)]
pub struct HttpDriverConfig {
    pub page_load_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for HttpDriverConfig {
    fn default() -> Self {
        Self {
            page_load_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&SmokeConfig> for HttpDriverConfig {
    fn from(config: &SmokeConfig) -> Self {
        Self {
            page_load_timeout: config.page_load_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

pub struct HttpDriver {
    client: reqwest::Client,
    config: HttpDriverConfig,
    current: Option<Url>,
    body: Option<String>,
    page: Option<PageText>,
}

impl HttpDriver {
    pub fn new(config: HttpDriverConfig) -> SmokeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.page_load_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            current: None,
            body: None,
            page: None,
        })
    }

    async fn fetch(&self, url: &Url) -> SmokeResult<(NavigationResponse, String)> {
        let resp = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| SmokeError::Navigation {
                url: url.to_string(),
                reason: describe_request_error(&e),
            })?;

        let nav = NavigationResponse {
            url: resp.url().to_string(),
            status: Some(resp.status().as_u16()),
        };
        let body = resp.text().await?;
        Ok((nav, body))
    }

    fn store(&mut self, body: String) {
        self.page = Some(PageText::parse(&body));
        self.body = Some(body);
    }

    fn page_has_text(&self, text: &str, exact: bool) -> bool {
        self.page
            .as_ref()
            .map(|page| page.contains(text, exact))
            .unwrap_or(false)
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn navigate(&mut self, url: &Url) -> SmokeResult<NavigationResponse> {
        debug!("GET {}", url);
        let (nav, body) = self.fetch(url).await?;
        self.current = Some(url.clone());
        self.store(body);
        Ok(nav)
    }

    async fn find_text(&mut self, text: &str, exact: bool, timeout: Duration) -> SmokeResult<bool> {
        let current = self
            .current
            .clone()
            .ok_or_else(|| SmokeError::Driver("find_text before navigate".to_string()))?;
        let deadline = Instant::now() + timeout;

        loop {
            if self.page_has_text(text, exact) {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                continue;
            }

            // A failed or slow re-fetch while polling keeps the last body
            match tokio::time::timeout(remaining, self.fetch(&current)).await {
                Ok(Ok((_, body))) => self.store(body),
                Ok(Err(e)) => debug!("Re-fetch of {} failed: {}", current, e),
                Err(_) => debug!("Re-fetch of {} still pending at the deadline", current),
            }
        }
    }

    fn take_uncaught_exceptions(&mut self) -> Vec<UncaughtException> {
        Vec::new()
    }

    async fn text_snapshot(&mut self) -> SmokeResult<Option<String>> {
        Ok(self.page.as_ref().map(|page| page.text().to_string()))
    }

    async fn capture_failure(&mut self, dir: &Path, name: &str) -> SmokeResult<Option<PathBuf>> {
        let Some(body) = &self.body else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.html", name));
        std::fs::write(&path, body)?;
        Ok(Some(path))
    }

    async fn close(&mut self) -> SmokeResult<()> {
        self.current = None;
        self.body = None;
        self.page = None;
        Ok(())
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_connect() {
        format!("connection refused or unreachable ({})", e)
    } else if e.is_timeout() {
        format!("page load timed out ({})", e)
    } else {
        e.to_string()
    }
}

/// Rendered text of a document's `<body>`
///
/// Head content never renders, and neither do `script`, `style`, `template`
/// or `noscript` subtrees. Entities are decoded by the parser.
#[derive(Debug, Clone, Default)]
pub struct PageText {
    /// Text nodes, whitespace-normalized, empty ones dropped
    nodes: Vec<String>,
    /// Normalized text content of every element, as Playwright sees it
    elements: Vec<String>,
    text: String,
}

impl PageText {
    pub fn parse(html: &str) -> Self {
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
        let mut page = Self::default();
        if let Some(body) = find_element(&dom.document, "body") {
            page.collect(&body);
        }
        page.text = page.nodes.join(" ");
        page
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the page shows `needle`
    ///
    /// `exact` needs an element whose whole text equals `needle`, case
    /// included. Otherwise the body text is searched case-insensitively, so
    /// matches may span inline elements.
    pub fn contains(&self, needle: &str, exact: bool) -> bool {
        let needle = normalize_whitespace(needle);
        if exact {
            self.elements.iter().any(|element| *element == needle)
        } else {
            self.text.to_lowercase().contains(&needle.to_lowercase())
        }
    }

    /// Walks `handle`, returning its raw text content
    fn collect(&mut self, handle: &Handle) -> String {
        match &handle.data {
            NodeData::Text { contents } => {
                let raw = contents.borrow().to_string();
                let node = normalize_whitespace(&raw);
                if !node.is_empty() {
                    self.nodes.push(node);
                }
                raw
            }
            NodeData::Element { name, .. } => {
                if matches!(&*name.local, "script" | "style" | "template" | "noscript") {
                    return String::new();
                }
                let mut content = String::new();
                for child in handle.children.borrow().iter() {
                    content.push_str(&self.collect(child));
                }
                let element = normalize_whitespace(&content);
                if !element.is_empty() {
                    self.elements.push(element);
                }
                content
            }
            _ => String::new(),
        }
    }
}

fn find_element(handle: &Handle, tag: &str) -> Option<Handle> {
    if let NodeData::Element { name, .. } = &handle.data {
        if &*name.local == tag {
            return Some(handle.clone());
        }
    }
    handle
        .children
        .borrow()
        .iter()
        .find_map(|child| find_element(child, tag))
}

/// Whether the rendered text of `html` has `needle`; see [`PageText::contains`]
pub fn contains_text(html: &str, needle: &str, exact: bool) -> bool {
    PageText::parse(html).contains(needle, exact)
}
