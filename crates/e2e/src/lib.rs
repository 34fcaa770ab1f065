//! Smoke E2E Checks
//!
//! This crate provides a Rust-controlled smoke test for the Remix app:
//! - Optionally spawns the app server and waits for it to answer
//! - Drives a browser through Playwright (or plain HTTP for server-rendered HTML)
//! - Parses declarative YAML check specs
//! - Ignores the benign hydration exceptions Remix throws under automation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    run-e2e (Rust)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── start_server() -> ServerHandle                       │
//! │    ├── DriverKind::launch() -> Box<dyn BrowserDriver>       │
//! │    │     ├── PlaywrightDriver (node bridge, JSON lines)     │
//! │    │     └── HttpDriver (reqwest + HTML text)               │
//! │    ├── SmokeCheck::run(driver) -> Result<Pass, CheckFailure>│
//! │    │     NotStarted → Navigating → Polling → Passed|Failed  │
//! │    └── write_results() -> test-results.json                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SmokeSpec (YAML)                                           │
//! │    ├── name, description, tags                              │
//! │    ├── path (default "/")                                   │
//! │    ├── expect_text (default "Discover Remix"), exact        │
//! │    └── timeout_ms, ignore_exceptions                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod check;
pub mod config;
pub mod driver;
pub mod error;
pub mod exceptions;
pub mod runner;
pub mod server;
pub mod spec;

pub use check::{run_smoke_check, CheckOptions, CheckOutcome, CheckState, Pass, SmokeCheck};
pub use config::SmokeConfig;
pub use driver::{BrowserDriver, DriverKind};
pub use error::{CheckFailure, SmokeError, SmokeResult};
pub use exceptions::{ExceptionFilter, UncaughtException};
pub use runner::TestRunner;
pub use spec::SmokeSpec;
