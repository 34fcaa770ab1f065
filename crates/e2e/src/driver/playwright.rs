//! Playwright browser automation
//!
//! The browser lives in a long-running Node process running `bridge.js`. The
//! driver writes one JSON request per line to its stdin; a reader task parses
//! stdout and routes responses and page errors into separate channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{BrowserDriver, NavigationResponse};
use crate::config::{SmokeConfig, Viewport};
use crate::error::{SmokeError, SmokeResult};
use crate::exceptions::UncaughtException;

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Extra time the driver waits on the bridge beyond the operation's own timeout
const BRIDGE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for a Playwright session
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,
    pub navigation_timeout: Duration,
    pub launch_timeout: Duration,
    /// Node executable
    pub node_binary: PathBuf,
    /// `node_modules` that holds the `playwright` package
    pub node_modules: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
            navigation_timeout: Duration::from_secs(60),
            launch_timeout: Duration::from_secs(30),
            node_binary: PathBuf::from("node"),
            node_modules: PathBuf::from("node_modules"),
        }
    }
}

impl From<&SmokeConfig> for PlaywrightConfig {
    fn from(config: &SmokeConfig) -> Self {
        Self {
            browser: config.browser,
            headless: config.headless,
            viewport: config.viewport,
            navigation_timeout: config.page_load_timeout(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct BridgeConfig {
    browser: &'static str,
    headless: bool,
    viewport_width: u32,
    viewport_height: u32,
    navigation_timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: BridgeRequest<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Navigate { url: &'a str },
    FindText { text: &'a str, exact: bool, timeout_ms: u64 },
    Snapshot,
    Screenshot { path: &'a Path },
    Close,
}

impl BridgeRequest<'_> {
    fn op(&self) -> &'static str {
        match self {
            BridgeRequest::Navigate { .. } => "navigate",
            BridgeRequest::FindText { .. } => "find_text",
            BridgeRequest::Snapshot => "snapshot",
            BridgeRequest::Screenshot { .. } => "screenshot",
            BridgeRequest::Close => "close",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeMessage {
    Ready,
    Fatal {
        error: String,
    },
    Response(BridgeResponse),
    PageError {
        message: String,
        #[serde(default)]
        stack: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    found: Option<bool>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Playwright browser session
pub struct PlaywrightDriver {
    child: Child,
    stdin: ChildStdin,
    messages: mpsc::UnboundedReceiver<BridgeMessage>,
    exceptions: mpsc::UnboundedReceiver<UncaughtException>,
    reader: JoinHandle<()>,
    next_id: u64,
    config: PlaywrightConfig,
    closed: bool,
    // Holds the bridge script on disk for the life of the session
    _script_dir: TempDir,
}

impl PlaywrightDriver {
    /// Spawn the bridge and wait until the browser is up
    pub async fn launch(config: PlaywrightConfig) -> SmokeResult<Self> {
        Self::check_node_installed(&config.node_binary)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let bridge_config = serde_json::to_string(&BridgeConfig {
            browser: config.browser.as_str(),
            headless: config.headless,
            viewport_width: config.viewport.width,
            viewport_height: config.viewport.height,
            navigation_timeout_ms: config.navigation_timeout.as_millis() as u64,
        })?;

        let node_modules = std::env::current_dir()?.join(&config.node_modules);

        info!(
            "Launching {} (headless: {})",
            config.browser.as_str(),
            config.headless
        );

        let mut child = TokioCommand::new(&config.node_binary)
            .arg(&script_path)
            .env("SMOKE_BRIDGE_CONFIG", bridge_config)
            .env("NODE_PATH", &node_modules)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SmokeError::Driver(format!("failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SmokeError::Driver("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SmokeError::Driver("bridge stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "bridge", "{}", line);
                }
            });
        }

        let (message_tx, messages) = mpsc::unbounded_channel();
        let (exception_tx, exceptions) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<BridgeMessage>(&line) {
                    Ok(BridgeMessage::PageError { message, stack }) => {
                        let _ = exception_tx.send(UncaughtException { message, stack });
                    }
                    Ok(message) => {
                        if message_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!(target: "bridge", "{}", line),
                }
            }
        });

        let mut driver = Self {
            child,
            stdin,
            messages,
            exceptions,
            reader,
            next_id: 0,
            config,
            closed: false,
            _script_dir: script_dir,
        };

        driver.wait_ready().await?;
        Ok(driver)
    }

    /// Check that Node is available
    fn check_node_installed(node: &Path) -> SmokeResult<()> {
        let status = Command::new(node)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(SmokeError::NodeNotFound),
        }
    }

    async fn wait_ready(&mut self) -> SmokeResult<()> {
        let launch_timeout = self.config.launch_timeout;
        let ready = tokio::time::timeout(launch_timeout, async {
            loop {
                match self.messages.recv().await {
                    Some(BridgeMessage::Ready) => return Ok(()),
                    Some(BridgeMessage::Fatal { error }) => return Err(SmokeError::Driver(error)),
                    Some(other) => debug!("Ignoring bridge message before ready: {:?}", other),
                    None => {
                        return Err(SmokeError::Driver(
                            "bridge exited before the browser was ready".to_string(),
                        ))
                    }
                }
            }
        })
        .await;

        match ready {
            Ok(result) => result,
            Err(_) => Err(SmokeError::Timeout(format!(
                "browser launch ({}s)",
                launch_timeout.as_secs()
            ))),
        }
    }

    /// Send one request and wait for its response
    async fn request(
        &mut self,
        request: BridgeRequest<'_>,
        limit: Duration,
    ) -> SmokeResult<BridgeResponse> {
        self.next_id += 1;
        let id = self.next_id;
        let op = request.op();

        let mut line = serde_json::to_string(&Envelope { id, request })?;
        line.push('\n');
        debug!("bridge <- {}", line.trim_end());

        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let wait = async {
            loop {
                match self.messages.recv().await {
                    Some(BridgeMessage::Response(resp)) if resp.id == id => return Ok(resp),
                    Some(BridgeMessage::Response(resp)) => {
                        warn!("Dropping stale bridge response {}", resp.id)
                    }
                    Some(BridgeMessage::Fatal { error }) => return Err(SmokeError::Driver(error)),
                    Some(BridgeMessage::Ready) | Some(BridgeMessage::PageError { .. }) => {}
                    None => {
                        return Err(SmokeError::Driver(format!(
                            "bridge exited during {}",
                            op
                        )))
                    }
                }
            }
        };

        match tokio::time::timeout(limit + BRIDGE_GRACE, wait).await {
            Ok(result) => result,
            Err(_) => Err(SmokeError::Timeout(format!("bridge {} response", op))),
        }
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn navigate(&mut self, url: &Url) -> SmokeResult<NavigationResponse> {
        let limit = self.config.navigation_timeout;
        let resp = self
            .request(BridgeRequest::Navigate { url: url.as_str() }, limit)
            .await?;

        if !resp.ok {
            return Err(SmokeError::Navigation {
                url: url.to_string(),
                reason: resp.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(NavigationResponse {
            url: resp.url.unwrap_or_else(|| url.to_string()),
            status: resp.status,
        })
    }

    async fn find_text(&mut self, text: &str, exact: bool, timeout: Duration) -> SmokeResult<bool> {
        let resp = self
            .request(
                BridgeRequest::FindText {
                    text,
                    exact,
                    timeout_ms: timeout.as_millis() as u64,
                },
                timeout,
            )
            .await?;

        if !resp.ok {
            return Err(SmokeError::Driver(
                resp.error.unwrap_or_else(|| "find_text failed".to_string()),
            ));
        }
        Ok(resp.found.unwrap_or(false))
    }

    fn take_uncaught_exceptions(&mut self) -> Vec<UncaughtException> {
        let mut out = Vec::new();
        while let Ok(exception) = self.exceptions.try_recv() {
            out.push(exception);
        }
        out
    }

    async fn text_snapshot(&mut self) -> SmokeResult<Option<String>> {
        let resp = self
            .request(BridgeRequest::Snapshot, Duration::from_secs(5))
            .await?;
        Ok(if resp.ok { resp.text } else { None })
    }

    async fn capture_failure(&mut self, dir: &Path, name: &str) -> SmokeResult<Option<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let path = std::path::absolute(dir.join(format!("{}.png", name)))?;
        let resp = self
            .request(BridgeRequest::Screenshot { path: &path }, Duration::from_secs(30))
            .await?;

        if !resp.ok {
            warn!(
                "Screenshot failed: {}",
                resp.error.unwrap_or_else(|| "unknown error".to_string())
            );
            return Ok(None);
        }
        Ok(Some(path))
    }

    async fn close(&mut self) -> SmokeResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.request(BridgeRequest::Close, Duration::from_secs(5)).await {
            debug!("Bridge close request failed: {}", e);
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => debug!("Bridge exited with {}", status),
            _ => {
                warn!("Bridge did not exit, killing it");
                self.child.kill().await?;
            }
        }
        self.reader.abort();
        Ok(())
    }
}

impl Drop for PlaywrightDriver {
    fn drop(&mut self) {
        self.reader.abort();
        if !self.closed {
            let _ = self.child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let line = serde_json::to_value(&Envelope {
            id: 3,
            request: BridgeRequest::FindText {
                text: "Discover Remix",
                exact: false,
                timeout_ms: 4000,
            },
        })
        .unwrap();
        assert_eq!(
            line,
            serde_json::json!({
                "id": 3,
                "op": "find_text",
                "text": "Discover Remix",
                "exact": false,
                "timeout_ms": 4000
            })
        );

        let close = serde_json::to_value(&Envelope { id: 4, request: BridgeRequest::Close }).unwrap();
        assert_eq!(close, serde_json::json!({ "id": 4, "op": "close" }));
    }

    #[test]
    fn test_parse_bridge_messages() {
        let msg: BridgeMessage = serde_json::from_str(
            r#"{"type":"response","id":1,"ok":true,"status":200,"url":"http://localhost:3000/"}"#,
        )
        .unwrap();
        match msg {
            BridgeMessage::Response(resp) => {
                assert_eq!(resp.id, 1);
                assert!(resp.ok);
                assert_eq!(resp.status, Some(200));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: BridgeMessage = serde_json::from_str(
            r#"{"type":"page_error","message":"Hydration failed","stack":null}"#,
        )
        .unwrap();
        assert!(matches!(msg, BridgeMessage::PageError { ref message, .. } if message == "Hydration failed"));

        let msg: BridgeMessage = serde_json::from_str(r#"{"type":"ready"}"#).unwrap();
        assert!(matches!(msg, BridgeMessage::Ready));
    }

    #[test]
    fn test_bridge_script_handles_every_op() {
        for op in ["navigate", "find_text", "snapshot", "screenshot", "close"] {
            assert!(
                BRIDGE_SCRIPT.contains(&format!("case '{}'", op)),
                "bridge.js is missing op {}",
                op
            );
        }
        assert!(BRIDGE_SCRIPT.contains("'pageerror'"));
    }

    #[test]
    fn test_missing_node_binary() {
        let err = PlaywrightDriver::check_node_installed(Path::new("/nonexistent/node")).unwrap_err();
        assert!(matches!(err, SmokeError::NodeNotFound));
    }

    #[test]
    fn test_browser_names() {
        assert_eq!(Browser::Chromium.as_str(), "chromium");
        assert_eq!(Browser::Webkit.as_str(), "webkit");
    }
}
