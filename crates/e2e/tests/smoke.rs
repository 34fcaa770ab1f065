//! End-to-end checks against a local fixture app
//!
//! Run with: cargo test --package smoke-e2e --test smoke

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use smoke_e2e::driver::http::{HttpDriver, HttpDriverConfig};
use smoke_e2e::driver::NavigationResponse;
use smoke_e2e::runner::Selection;
use smoke_e2e::{
    run_smoke_check, BrowserDriver, CheckFailure, CheckOptions, DriverKind, ExceptionFilter,
    SmokeConfig, SmokeResult, SmokeSpec, TestRunner, UncaughtException,
};

const HOME: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head><title>New Remix App</title></head>
  <body>
    <main>
      <h1>Discover Remix</h1>
      <p>Welcome to the template.</p>
    </main>
    <script>window.__remixContext = {};</script>
  </body>
</html>"#;

const BLANK: &str = "<html><body><main><h1>Welcome</h1></main></body></html>";

/// Serve `router` on an ephemeral port
async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
}

async fn serve_home() -> Url {
    serve(
        Router::new()
            .route("/", get(|| async { Html(HOME) }))
            .route("/blank", get(|| async { Html(BLANK) }))
            .route(
                "/broken",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Html("<h1>Discover Remix</h1>")) }),
            ),
    )
    .await
}

/// A URL nothing listens on
fn refused_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap()
}

fn http_driver() -> HttpDriver {
    HttpDriver::new(HttpDriverConfig {
        page_load_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(25),
    })
    .unwrap()
}

fn options(path: &str, timeout_ms: u64) -> CheckOptions {
    CheckOptions {
        path: path.to_string(),
        timeout: Duration::from_millis(timeout_ms),
        ..Default::default()
    }
}

fn http_config(base_url: &Url, output: &Path) -> SmokeConfig {
    SmokeConfig {
        base_url: base_url.to_string(),
        driver: DriverKind::Http,
        default_command_timeout_ms: 500,
        poll_interval_ms: 25,
        page_load_timeout_ms: 5000,
        specs_dir: output.join("specs"),
        output_dir: output.to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn home_page_passes() {
    let base = serve_home().await;
    let mut driver = http_driver();

    let outcome = run_smoke_check(&base, options("/", 4000), ExceptionFilter::default(), &mut driver)
        .await
        .unwrap();

    let pass = outcome.unwrap();
    assert_eq!(pass.status, Some(200));
    assert!(pass.url.ends_with('/'));
    driver.close().await.unwrap();
}

#[tokio::test]
async fn unreachable_app_is_navigation_error() {
    let base = refused_url();
    let mut driver = http_driver();

    let failure = run_smoke_check(&base, options("/", 4000), ExceptionFilter::default(), &mut driver)
        .await
        .unwrap()
        .unwrap_err();

    match failure {
        CheckFailure::NavigationError { url, reason } => {
            assert!(url.starts_with(base.as_str()));
            assert!(!reason.is_empty());
        }
        other => panic!("expected navigation error, got {:?}", other),
    }
}

#[tokio::test]
async fn server_error_is_navigation_error() {
    let base = serve_home().await;
    let mut driver = http_driver();

    let failure = run_smoke_check(&base, options("/broken", 4000), ExceptionFilter::default(), &mut driver)
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(failure, CheckFailure::NavigationError { .. }));
}

#[tokio::test]
async fn missing_text_times_out() {
    let base = serve_home().await;
    let mut driver = http_driver();
    let start = Instant::now();

    let failure = run_smoke_check(&base, options("/blank", 300), ExceptionFilter::default(), &mut driver)
        .await
        .unwrap()
        .unwrap_err();

    assert!(start.elapsed() >= Duration::from_millis(300));
    match failure {
        CheckFailure::AssertionTimeout { text, timeout_ms, snapshot } => {
            assert_eq!(text, "Discover Remix");
            assert_eq!(timeout_ms, 300);
            assert_eq!(snapshot.as_deref(), Some("Welcome"));
        }
        other => panic!("expected assertion timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn text_that_appears_late_is_found_by_polling() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < 3 {
                    Html(BLANK)
                } else {
                    Html(HOME)
                }
            }),
        )
        .with_state(hits.clone());
    let base = serve(router).await;
    let mut driver = http_driver();

    let outcome = run_smoke_check(&base, options("/", 2000), ExceptionFilter::default(), &mut driver)
        .await
        .unwrap();

    assert!(outcome.is_ok());
    assert!(hits.load(Ordering::SeqCst) >= 4);
}

#[tokio::test]
async fn hanging_refetch_does_not_outlive_the_timeout() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) > 0 {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
                Html(BLANK)
            }),
        )
        .with_state(hits.clone());
    let base = serve(router).await;
    let mut driver = http_driver();
    let start = Instant::now();

    let failure = run_smoke_check(&base, options("/", 300), ExceptionFilter::default(), &mut driver)
        .await
        .unwrap()
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    match failure {
        CheckFailure::AssertionTimeout { snapshot, .. } => {
            assert_eq!(snapshot.as_deref(), Some("Welcome"));
        }
        other => panic!("expected assertion timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn only_rendered_body_text_matches() {
    let base = serve(
        Router::new()
            .route(
                "/title-only",
                get(|| async {
                    Html("<html><head><title>Discover Remix</title></head><body><h1>Welcome</h1></body></html>")
                }),
            )
            .route(
                "/edge",
                get(|| async {
                    Html(r#"<html><body><nav><a title="x > y" href="/">Discover&#32;Remix</a></nav><p>DISCOVER REMIX</p></body></html>"#)
                }),
            ),
    )
    .await;
    let mut driver = http_driver();

    let failure = run_smoke_check(&base, options("/title-only", 200), ExceptionFilter::default(), &mut driver)
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(failure.kind(), "assertion_timeout");
    driver.close().await.unwrap();

    let exact = CheckOptions {
        exact: true,
        ..options("/edge", 1000)
    };
    let outcome = run_smoke_check(&base, exact, ExceptionFilter::default(), &mut driver)
        .await
        .unwrap();
    assert!(outcome.is_ok());
    driver.close().await.unwrap();

    let shouted = CheckOptions {
        text: "discover remix".to_string(),
        ..options("/edge", 1000)
    };
    let outcome = run_smoke_check(&base, shouted, ExceptionFilter::default(), &mut driver)
        .await
        .unwrap();
    assert!(outcome.is_ok());
}

/// Wraps a real driver and throws page exceptions during render
struct ThrowingDriver {
    inner: HttpDriver,
    throw: Vec<UncaughtException>,
    pending: Vec<UncaughtException>,
    closed: Arc<AtomicBool>,
}

impl ThrowingDriver {
    fn new(message: &str, closed: Arc<AtomicBool>) -> Self {
        Self {
            inner: http_driver(),
            throw: vec![UncaughtException {
                message: message.to_string(),
                stack: Some("at hydrateRoot (entry.client.tsx:12:3)".to_string()),
            }],
            pending: Vec::new(),
            closed,
        }
    }
}

#[async_trait]
impl BrowserDriver for ThrowingDriver {
    fn name(&self) -> &'static str {
        "throwing"
    }

    async fn navigate(&mut self, url: &Url) -> SmokeResult<NavigationResponse> {
        let nav = self.inner.navigate(url).await?;
        self.pending.append(&mut self.throw);
        Ok(nav)
    }

    async fn find_text(&mut self, text: &str, exact: bool, timeout: Duration) -> SmokeResult<bool> {
        self.inner.find_text(text, exact, timeout).await
    }

    fn take_uncaught_exceptions(&mut self) -> Vec<UncaughtException> {
        std::mem::take(&mut self.pending)
    }

    async fn text_snapshot(&mut self) -> SmokeResult<Option<String>> {
        self.inner.text_snapshot().await
    }

    async fn capture_failure(&mut self, dir: &Path, name: &str) -> SmokeResult<Option<PathBuf>> {
        self.inner.capture_failure(dir, name).await
    }

    async fn close(&mut self) -> SmokeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await
    }
}

#[tokio::test]
async fn hydration_exception_does_not_fail_the_check() {
    let base = serve_home().await;
    let output = tempfile::tempdir().unwrap();
    let runner = TestRunner::new(http_config(&base, output.path())).unwrap();

    let closed = Arc::new(AtomicBool::new(false));
    let mut driver = ThrowingDriver::new(
        "Hydration failed because the initial UI does not match what was rendered on the server.",
        closed.clone(),
    );

    let result = runner.run_spec_with(&SmokeSpec::default(), &mut driver).await;

    assert!(result.success, "unexpected failure: {}", result.reason());
    assert_eq!(result.suppressed_exceptions.len(), 1);
    assert!(closed.load(Ordering::SeqCst), "session was not closed after a pass");
}

#[tokio::test]
async fn unmatched_exception_fails_in_strict_mode() {
    let base = serve_home().await;
    let output = tempfile::tempdir().unwrap();
    let mut config = http_config(&base, output.path());
    config.exceptions.fail_on_unmatched = true;
    let runner = TestRunner::new(config).unwrap();

    let closed = Arc::new(AtomicBool::new(false));
    let mut driver = ThrowingDriver::new("TypeError: undefined is not a function", closed.clone());

    let result = runner.run_spec_with(&SmokeSpec::default(), &mut driver).await;

    assert!(!result.success);
    assert!(matches!(result.failure, Some(CheckFailure::UncaughtException { .. })));
    assert!(closed.load(Ordering::SeqCst), "session was not closed after a failure");
}

#[tokio::test]
async fn spec_level_patterns_extend_the_filter() {
    let base = serve_home().await;
    let output = tempfile::tempdir().unwrap();
    let mut config = http_config(&base, output.path());
    config.exceptions.fail_on_unmatched = true;
    let runner = TestRunner::new(config).unwrap();

    let spec = SmokeSpec {
        ignore_exceptions: vec!["ResizeObserver loop".to_string()],
        ..Default::default()
    };
    let mut driver = ThrowingDriver::new(
        "ResizeObserver loop completed with undelivered notifications.",
        Arc::new(AtomicBool::new(false)),
    );

    let result = runner.run_spec_with(&spec, &mut driver).await;
    assert!(result.success, "unexpected failure: {}", result.reason());
}

#[tokio::test]
async fn runner_writes_results_and_failure_artifacts() {
    let base = serve_home().await;
    let output = tempfile::tempdir().unwrap();
    let specs_dir = output.path().join("specs");
    std::fs::create_dir_all(&specs_dir).unwrap();
    std::fs::write(specs_dir.join("home.yaml"), "name: home\ntags: [smoke]\n").unwrap();
    std::fs::write(
        specs_dir.join("blank.yaml"),
        "name: blank\npath: /blank\ntimeout_ms: 200\n",
    )
    .unwrap();

    let mut runner = TestRunner::new(http_config(&base, output.path())).unwrap();
    let specs = runner.load_specs(&Selection::default()).unwrap();
    assert_eq!(specs.len(), 2);

    let suite = runner.run_specs(&specs).await.unwrap();
    assert_eq!(suite.total, 2);
    assert_eq!(suite.passed, 1);
    assert_eq!(suite.failed, 1);
    assert!(!suite.success());

    let blank = suite.results.iter().find(|r| r.name == "blank").unwrap();
    assert!(matches!(blank.failure, Some(CheckFailure::AssertionTimeout { .. })));
    let artifact = blank.artifact.as_ref().expect("failure artifact");
    assert!(std::fs::read_to_string(artifact).unwrap().contains("Welcome"));

    let path = runner.write_results(&suite).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(json["passed"], 1);
    assert_eq!(json["driver"], "http");

    let smoke_only = runner
        .load_specs(&Selection { tag: Some("smoke".to_string()), ..Default::default() })
        .unwrap();
    let suite = runner.run_specs(&smoke_only).await.unwrap();
    assert!(suite.success());
}

#[tokio::test]
async fn runner_reports_unreachable_app() {
    let output = tempfile::tempdir().unwrap();
    let mut runner = TestRunner::new(http_config(&refused_url(), output.path())).unwrap();

    let suite = runner.run_specs(&[SmokeSpec::default()]).await.unwrap();
    assert_eq!(suite.failed, 1);
    assert!(matches!(
        suite.results[0].failure,
        Some(CheckFailure::NavigationError { .. })
    ));
}

fn in_path(bin: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-lc")
        .arg(format!("command -v {bin} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Drives a real browser against the fixture app.
///
/// Marked ignored because it requires Node and the `playwright` package with
/// browsers installed in ./node_modules.
#[tokio::test]
#[ignore]
async fn playwright_home_page_passes() {
    if !in_path("node") {
        eprintln!("Skipping: node not available in PATH");
        return;
    }

    let base = serve_home().await;
    let output = tempfile::tempdir().unwrap();
    let mut config = http_config(&base, output.path());
    config.driver = DriverKind::Playwright;
    config.default_command_timeout_ms = 4000;
    let mut runner = TestRunner::new(config).unwrap();

    let suite = runner.run_specs(&[SmokeSpec::default()]).await.unwrap();
    assert!(suite.success(), "{:?}", suite.results[0]);
}
