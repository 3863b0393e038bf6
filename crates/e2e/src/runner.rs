//! Suite runner: app server lifecycle, scenario selection and result files

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::driver::DriverFactory;
use crate::engine::{ScenarioEngine, ScenarioReport};
use crate::error::{E2eError, E2eResult};
use crate::scenario::Scenario;
use crate::server::ServerHandle;

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioReport>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Main E2E test runner
pub struct TestRunner<F: DriverFactory> {
    engine: ScenarioEngine<F>,

    /// Running server handle (if any)
    server: Option<ServerHandle>,

    /// Scenario directory
    scenarios_dir: PathBuf,
}

impl<F: DriverFactory> TestRunner<F> {
    pub fn new(factory: F, config: EngineConfig, scenarios_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: ScenarioEngine::new(factory, config),
            server: None,
            scenarios_dir: scenarios_dir.into(),
        }
    }

    pub fn engine(&self) -> &ScenarioEngine<F> {
        &self.engine
    }

    pub fn scenarios_dir(&self) -> &Path {
        &self.scenarios_dir
    }

    /// Start (or reuse) the application server when enabled
    pub async fn start_server(&mut self) -> E2eResult<()> {
        let config = &self.engine.config().server;
        if !config.enabled || self.server.is_some() {
            return Ok(());
        }
        self.server = Some(ServerHandle::start(config).await?);
        Ok(())
    }

    /// Stop the server
    pub fn stop_server(&mut self) -> E2eResult<()> {
        if let Some(mut server) = self.server.take() {
            server.stop()?;
        }
        Ok(())
    }

    /// Run all scenarios in the scenario directory
    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.scenarios_dir)?;
        self.run_scenarios(&scenarios).await
    }

    /// Run scenarios matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.scenarios_dir)?;
        let filtered: Vec<Scenario> = Scenario::filter_by_tag(&scenarios, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_scenarios(&filtered).await
    }

    /// Run a specific scenario by name
    pub async fn run_test(&mut self, name: &str) -> E2eResult<ScenarioReport> {
        let scenarios = Scenario::load_all(&self.scenarios_dir)?;
        let scenario = scenarios
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Scenario not found: {name}")))?;

        self.start_server().await?;
        Ok(self.engine.run(&scenario).await)
    }

    /// Run a list of scenarios, up to `parallelism` at a time
    pub async fn run_scenarios(&mut self, scenarios: &[Scenario]) -> E2eResult<TestSuiteResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        // Ensure server is running
        self.start_server().await?;

        let parallelism = self.engine.config().parallelism.max(1);
        info!(
            "Running {} scenario(s), {} at a time...",
            scenarios.len(),
            parallelism
        );

        let engine = &self.engine;
        let results: Vec<ScenarioReport> = stream::iter(scenarios)
            .map(|scenario| engine.run(scenario))
            .buffered(parallelism)
            .collect()
            .await;

        let passed = results.iter().filter(|r| r.passed()).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        Ok(TestSuiteResult {
            run_id,
            started_at,
            total: scenarios.len(),
            passed,
            failed,
            duration_ms,
            results,
        })
    }

    /// Write suite results to `test-results.json` in the results directory
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        let dir = &self.engine.config().output.results_dir;
        std::fs::create_dir_all(dir)?;

        let path = dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl<F: DriverFactory> Drop for TestRunner<F> {
    fn drop(&mut self) {
        let _ = self.stop_server();
    }
}
