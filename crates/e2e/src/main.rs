//! run-e2e - smoke check runner entry point
//!
//! Exit codes: 0 when every check passes, 1 when any check fails, 2 when the
//! harness itself could not run.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use smoke_e2e::config::{Overrides, DEFAULT_CONFIG_FILE};
use smoke_e2e::driver::playwright::Browser;
use smoke_e2e::runner::Selection;
use smoke_e2e::{DriverKind, SmokeConfig, SmokeError, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "run-e2e")]
#[command(author, version, about = "Smoke checks for the Remix app", long_about = None)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "SMOKE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Base URL of the running app
    #[arg(long, env = "SMOKE_BASE_URL")]
    base_url: Option<String>,

    /// Run only spec files matching this glob
    #[arg(short, long)]
    spec: Option<String>,

    /// Run only checks with this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the check with this name
    #[arg(short, long)]
    name: Option<String>,

    /// Directory holding check specs
    #[arg(long)]
    specs_dir: Option<PathBuf>,

    /// Run the browser headless (`--headless` alone means true)
    #[arg(long, env = "SMOKE_HEADLESS", num_args = 0..=1, default_missing_value = "true")]
    headless: Option<bool>,

    /// Browser to use
    #[arg(long, env = "SMOKE_BROWSER", value_enum)]
    browser: Option<Browser>,

    /// Page rendering backend
    #[arg(long, env = "SMOKE_DRIVER", value_enum)]
    driver: Option<DriverKind>,

    /// How long to wait for expected text (ms)
    #[arg(long, env = "SMOKE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Command that serves the app, started before the checks
    #[arg(long)]
    server_command: Option<String>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match run(args).await {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = SmokeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    config.apply(Overrides {
        base_url: args.base_url,
        timeout_ms: args.timeout_ms,
        driver: args.driver,
        browser: args.browser,
        headless: args.headless,
        specs_dir: args.specs_dir,
        output_dir: args.output,
        server_command: args.server_command,
    })?;

    let mut runner = TestRunner::new(config)?;

    let selection = Selection {
        pattern: args.spec,
        tag: args.tag,
        name: args.name,
    };
    let specs = runner.load_specs(&selection)?;

    let outcome = tokio::select! {
        result = runner.run_specs(&specs) => result,
        _ = tokio::signal::ctrl_c() => Err(SmokeError::Interrupted),
    };
    runner.stop_server().await;

    let results = outcome?;
    runner.write_results(&results)?;

    Ok(results.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_flag() {
        let args = Args::try_parse_from(["run-e2e", "--headless"]).unwrap();
        assert_eq!(args.headless, Some(true));

        let args = Args::try_parse_from(["run-e2e", "--headless", "false"]).unwrap();
        assert_eq!(args.headless, Some(false));

        let args = Args::try_parse_from(["run-e2e", "--headless", "--tag", "smoke"]).unwrap();
        assert_eq!(args.headless, Some(true));
        assert_eq!(args.tag.as_deref(), Some("smoke"));
    }
}
