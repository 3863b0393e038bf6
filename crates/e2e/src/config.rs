//! Engine configuration (TOML)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::LaunchOptions;
use crate::error::E2eResult;
use crate::locator::SettlePolicy;
use crate::playwright::PlaywrightConfig;
use crate::roles::SessionLayout;
use crate::server::ServerConfig;

/// Top-level configuration shared by every scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Origin that relative scenario URLs are resolved against
    pub base_url: String,

    /// Number of scenarios run concurrently, each on its own session
    pub parallelism: usize,

    pub launch: LaunchOptions,

    pub timeouts: Timeouts,

    /// Locators for the sign-in and logout controls
    pub layout: SessionLayout,

    pub server: ServerConfig,

    pub playwright: PlaywrightConfig,

    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            parallelism: 1,
            launch: LaunchOptions::default(),
            timeouts: Timeouts::default(),
            layout: SessionLayout::default(),
            server: ServerConfig::default(),
            playwright: PlaywrightConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Absolute URL for a scenario target; absolute inputs pass through.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("about:") {
            return url.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if url.starts_with('/') {
            format!("{base}{url}")
        } else {
            format!("{base}/{url}")
        }
    }
}

/// Timeout policy, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub navigation_ms: u64,
    /// Upper bound for a click or fill, settle excluded
    pub action_ms: u64,
    /// Default bound for `locate` steps and reads
    pub locate_ms: u64,
    /// Best-effort DOMContentLoaded wait per frame
    pub frame_ready_ms: u64,
    /// Short probe for optional controls (sign-in entry, role choice)
    pub probe_ms: u64,
    pub poll_ms: u64,
    pub scenario_deadline_ms: u64,
    pub settle: SettlePolicy,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 10_000,
            action_ms: 5_000,
            locate_ms: 5_000,
            frame_ready_ms: 3_000,
            probe_ms: 1_000,
            poll_ms: 100,
            scenario_deadline_ms: 300_000,
            settle: SettlePolicy::default(),
        }
    }
}

impl Timeouts {
    /// No settle delay and short bounds, for in-memory runs.
    pub fn fast() -> Self {
        Self {
            navigation_ms: 1_000,
            action_ms: 500,
            locate_ms: 500,
            frame_ready_ms: 300,
            probe_ms: 100,
            poll_ms: 10,
            scenario_deadline_ms: 30_000,
            settle: SettlePolicy::None,
        }
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn locate(&self) -> Duration {
        Duration::from_millis(self.locate_ms)
    }

    pub fn frame_ready(&self) -> Duration {
        Duration::from_millis(self.frame_ready_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn scenario_deadline(&self) -> Duration {
        Duration::from_millis(self.scenario_deadline_ms)
    }
}

/// Where run artifacts are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub screenshots_on_failure: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("test-results"),
            screenshots_dir: PathBuf::from("test-results/screenshots"),
            screenshots_on_failure: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.timeouts.action(), Duration::from_secs(5));
        assert_eq!(config.timeouts.settle, SettlePolicy::Fixed { ms: 3_000 });
    }

    #[test]
    fn test_partial_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e2e.toml");
        std::fs::write(
            &path,
            r#"
base_url = "http://127.0.0.1:4000/"
parallelism = 4

[timeouts]
action_ms = 2000

[timeouts.settle]
mode = "stable"
window_ms = 250
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.timeouts.action_ms, 2_000);
        assert_eq!(config.timeouts.navigation_ms, 10_000);
        assert_eq!(config.timeouts.settle, SettlePolicy::Stable { window_ms: 250 });
        assert_eq!(config.resolve_url("/customer"), "http://127.0.0.1:4000/customer");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/e2e.toml");
        let mut config = EngineConfig::default();
        config.launch.headless = false;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert!(!loaded.launch.headless);
        assert_eq!(loaded.layout, config.layout);
    }

    #[test]
    fn test_absolute_urls_pass_through() {
        let config = EngineConfig::default();
        assert_eq!(
            config.resolve_url("https://example.com/x"),
            "https://example.com/x"
        );
        assert_eq!(config.resolve_url("auth/sign-in"), "http://localhost:3000/auth/sign-in");
    }
}
