//! Server management - starting the app under test and waiting for it

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use crate::config::ServerConfig;
use crate::error::{SmokeError, SmokeResult};

/// Handle to a running app server
pub struct ServerHandle {
    child: Child,
    base_url: Url,
}

impl ServerHandle {
    /// Spawn the configured command and wait until `base_url` answers
    pub async fn spawn(config: &ServerConfig, base_url: &Url) -> SmokeResult<Self> {
        let port = base_url.port_or_known_default().ok_or_else(|| {
            SmokeError::Config(format!("cannot determine port of {}", base_url))
        })?;

        info!("Starting `{} {}` on port {}", config.command, config.args.join(" "), port);

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|e| {
            SmokeError::ServerStartup(format!("failed to spawn {}: {}", config.command, e))
        })?;

        let mut handle = ServerHandle {
            child,
            base_url: base_url.clone(),
        };

        // Wait for server to answer
        if let Err(e) = handle.wait_until_ready(config.startup_timeout()).await {
            handle.stop().await;
            return Err(e);
        }

        info!("Server is up at {}", base_url);
        Ok(handle)
    }

    async fn wait_until_ready(&mut self, timeout: Duration) -> SmokeResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            if let Some(status) = self.child.try_wait()? {
                return Err(SmokeError::ServerStartup(format!(
                    "server exited early with {}",
                    status
                )));
            }

            match wait_for_response(&client, &self.base_url).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for server to start...");
                    }
                    // Connection refused is expected while server is starting
                    if !e.is_connect() {
                        warn!("Readiness check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(250)).await;
        }

        Err(SmokeError::ServerNotReady {
            url: self.base_url.to_string(),
            attempts,
        })
    }

    /// Stop the server, politely first
    pub async fn stop(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        info!("Stopping server (pid: {})", pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_secs(5), self.child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }

        // Force kill if still running
        let _ = self.child.kill().await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Any HTTP response means the server is listening
async fn wait_for_response(client: &reqwest::Client, url: &Url) -> Result<(), reqwest::Error> {
    client.get(url.clone()).send().await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let config = ServerConfig::from_command_line("/nonexistent/remix-serve").unwrap();
        let url = Url::parse("http://127.0.0.1:3999").unwrap();
        let err = ServerHandle::spawn(&config, &url).await.err().unwrap();
        assert!(matches!(err, SmokeError::ServerStartup(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let config = ServerConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 3".to_string()],
            cwd: None,
            startup_timeout_secs: 5,
        };
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
        let err = ServerHandle::spawn(&config, &url).await.err().unwrap();
        assert!(matches!(err, SmokeError::ServerStartup(_)));
    }
}
