//! Server management - spawning and health checking the application under test

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Handle to the application server. A reused server is not owned and is
/// left running on stop.
pub struct ServerHandle {
    child: Option<Child>,
    base_url: String,
}

impl ServerHandle {
    /// Reuse a healthy server at the configured URL, or spawn the dev server.
    pub async fn start(config: &ServerConfig) -> E2eResult<Self> {
        let client = health_client()?;

        if config.reuse_existing && is_healthy(&client, &config.url).await {
            info!("Reusing running server at {}", config.url);
            return Ok(Self {
                child: None,
                base_url: config.url.clone(),
            });
        }

        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| E2eError::ServerStartup("empty server command".to_string()))?;
        info!("Spawning app server: {}", config.command.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&config.env)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!("Failed to spawn {program}: {e}"))
        })?;

        let mut handle = ServerHandle {
            child: Some(child),
            base_url: config.url.clone(),
        };

        if let Err(e) = handle.wait_for_healthy(&client, config.startup_timeout()).await {
            handle.stop()?;
            return Err(e);
        }

        info!("Server is healthy at {}", handle.base_url);
        Ok(handle)
    }

    /// Wait for the server to answer on its base URL
    async fn wait_for_healthy(
        &mut self,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> E2eResult<()> {
        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(E2eError::ServerStartup(format!(
                        "server exited early with {status}"
                    )));
                }
            }

            match client.get(&self.base_url).send().await {
                Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Health check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for server to start...");
                    }
                    // Connection refused is expected while the dev server compiles
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(500)).await;
        }

        Err(E2eError::ServerHealthCheck(attempts))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_owned(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the server if this handle spawned it
    pub fn stop(&mut self) -> E2eResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!("Stopping server (pid: {})", child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        // Force kill if still running
        let _ = child.kill();
        let _ = child.wait();

        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn health_client() -> E2eResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

async fn is_healthy(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
        Err(_) => false,
    }
}

/// Configuration for the application server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Start the server before running scenarios
    pub enabled: bool,

    /// Program and arguments
    pub command: Vec<String>,

    /// Directory the command runs in (the app's package root)
    pub working_dir: Option<PathBuf>,

    /// URL polled until the server answers
    pub url: String,

    /// Use a server already listening on `url` instead of spawning one
    pub reuse_existing: bool,

    pub startup_timeout_ms: u64,

    /// Extra environment for the server process
    pub env: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["npm".to_string(), "run".to_string(), "dev".to_string()],
            working_dir: None,
            url: "http://localhost:3000".to_string(),
            reuse_existing: true,
            startup_timeout_ms: 120_000,
            env: BTreeMap::new(),
        }
    }
}
