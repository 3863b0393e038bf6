//! Scenario execution
//!
//! One run walks `Init -> SessionAcquired -> Running(i) -> Verifying ->
//! Passed | Failed -> Released`. Steps run strictly in order and the first
//! hard error ends the run. Release of the browser session happens on every
//! path, including a failed acquisition and an exceeded scenario deadline.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactStore;
use crate::config::EngineConfig;
use crate::driver::{
    BrowserHandle, ContextHandle, Driver, DriverFactory, LaunchOptions, PageHandle, Readiness,
};
use crate::error::{E2eError, E2eResult, FailureKind};
use crate::locator::{Action, Locator};
use crate::oracle::{evaluate, Evaluation};
use crate::roles::{Role, RoleSessionHelper};
use crate::scenario::{ActKind, Scenario, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    SessionAcquired,
    Running(usize),
    Verifying,
    Passed,
    Failed,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Failing step; verify predicates continue the numbering after the last step
    pub step_index: Option<usize>,
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Failure {
    fn from_error(step_index: Option<usize>, err: E2eError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        let (expected, actual) = match err {
            E2eError::AssertionFailed { expected, actual } => (Some(expected), Some(actual)),
            _ => (None, None),
        };
        Self {
            step_index,
            kind,
            message,
            expected,
            actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    /// Absorbed readiness timeout; does not affect the verdict
    SoftTimeout { reason: String },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub step: String,
    pub outcome: StepOutcome,
    pub duration_ms: u64,
    /// Frames that missed the readiness wait while resolving this step's target
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames_not_ready: Vec<String>,
}

/// Result of one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub run_id: Uuid,
    pub name: String,
    pub verdict: Verdict,
    pub steps: Vec<StepRecord>,
    pub states: Vec<RunState>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.verdict {
            Verdict::Pass => None,
            Verdict::Fail(failure) => Some(failure),
        }
    }
}

/// Browser resources of one run. Acquisition may stop part way; release
/// closes whatever was opened, innermost first.
struct Session<D: Driver> {
    driver: D,
    browser: Option<BrowserHandle>,
    context: Option<ContextHandle>,
    page: Option<PageHandle>,
}

impl<D: Driver> Session<D> {
    fn new(driver: D) -> Self {
        Self {
            driver,
            browser: None,
            context: None,
            page: None,
        }
    }

    async fn acquire(&mut self, launch: &LaunchOptions) -> E2eResult<(ContextHandle, PageHandle)> {
        let browser = self.driver.open(launch).await?;
        self.browser = Some(browser.clone());
        let context = self.driver.new_context(&browser).await?;
        self.context = Some(context.clone());
        let page = self.driver.new_page(&context).await?;
        self.page = Some(page.clone());
        Ok((context, page))
    }

    async fn screenshot(&self, timeout: Duration) -> E2eResult<Vec<u8>> {
        let page = match &self.context {
            Some(context) => self.driver.pages(context).await?.pop().or_else(|| self.page.clone()),
            None => None,
        };
        let page = page.ok_or_else(|| E2eError::Session("no page to capture".to_string()))?;
        tokio::time::timeout(timeout, self.driver.screenshot(&page))
            .await
            .map_err(|_| E2eError::Session("screenshot timed out".to_string()))?
    }

    async fn release(self) {
        if let Some(context) = &self.context {
            if let Err(e) = self.driver.close_context(context).await {
                warn!("Failed to close context {context}: {e}");
            }
        }
        if let Some(browser) = &self.browser {
            if let Err(e) = self.driver.close_browser(browser).await {
                warn!("Failed to close browser {browser}: {e}");
            }
        }
        if let Err(e) = self.driver.shutdown().await {
            warn!("Failed to shut down driver: {e}");
        }
    }
}

/// Progress shared with the run future so it survives a deadline cancellation.
#[derive(Default)]
struct Progress {
    states: Vec<RunState>,
    steps: Vec<StepRecord>,
    current: Option<usize>,
}

pub struct ScenarioEngine<F: DriverFactory> {
    factory: F,
    config: EngineConfig,
    artifacts: ArtifactStore,
}

impl<F: DriverFactory> ScenarioEngine<F> {
    pub fn new(factory: F, config: EngineConfig) -> Self {
        let artifacts = ArtifactStore::new(config.output.screenshots_dir.clone());
        Self {
            factory,
            config,
            artifacts,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Run one scenario to a verdict. Never returns an error: every failure,
    /// including driver connection, ends up in the report.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = self.config.timeouts.scenario_deadline();
        info!("Running scenario: {} ({run_id})", scenario.name);

        let mut progress = Progress {
            states: vec![RunState::Init],
            ..Progress::default()
        };

        let (verdict, artifacts) = match self.factory.connect().await {
            Ok(driver) => {
                let mut session = Session::new(driver);
                let outcome = tokio::time::timeout(
                    deadline,
                    self.drive(&mut session, scenario, &mut progress),
                )
                .await;

                let verdict = match outcome {
                    Ok(Ok(())) => Verdict::Pass,
                    Ok(Err(failure)) => Verdict::Fail(failure),
                    Err(_) => {
                        error!("Scenario {} exceeded its deadline of {deadline:?}", scenario.name);
                        Verdict::Fail(Failure::from_error(
                            progress.current,
                            E2eError::Deadline(deadline),
                        ))
                    }
                };
                progress.states.push(terminal_state(&verdict));

                let artifacts = match verdict {
                    Verdict::Fail(_) if self.config.output.screenshots_on_failure => {
                        self.capture(&session, &scenario.name).await
                    }
                    _ => Vec::new(),
                };

                session.release().await;
                (verdict, artifacts)
            }
            Err(e) => {
                error!("Failed to connect driver for {}: {e}", scenario.name);
                let verdict = Verdict::Fail(Failure::from_error(None, e));
                progress.states.push(terminal_state(&verdict));
                (verdict, Vec::new())
            }
        };
        progress.states.push(RunState::Released);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &verdict {
            Verdict::Pass => info!("✓ {} ({duration_ms} ms)", scenario.name),
            Verdict::Fail(f) => error!("✗ {} - {}", scenario.name, f.message),
        }

        ScenarioReport {
            run_id,
            name: scenario.name.clone(),
            verdict,
            steps: progress.steps,
            states: progress.states,
            started_at,
            duration_ms,
            artifacts,
        }
    }

    async fn drive(
        &self,
        session: &mut Session<F::Driver>,
        scenario: &Scenario,
        progress: &mut Progress,
    ) -> Result<(), Failure> {
        let (context, page) = session
            .acquire(&self.config.launch)
            .await
            .map_err(|e| Failure::from_error(None, e))?;
        progress.states.push(RunState::SessionAcquired);

        let timeouts = &self.config.timeouts;
        let locator = Locator::new(&session.driver, &context, &page, timeouts);
        let helper = RoleSessionHelper::new(&locator, &self.config);
        let mut active_role: Option<Role> = None;

        for (index, step) in scenario.steps.iter().enumerate() {
            progress.states.push(RunState::Running(index));
            progress.current = Some(index);
            debug!("Executing step {index}: {step}");

            let started = Instant::now();
            let result = self.execute(&locator, &helper, step, &mut active_role).await;
            let frames_not_ready = locator.take_soft_timeouts();
            let duration_ms = started.elapsed().as_millis() as u64;

            let outcome = match &result {
                Ok(None) => StepOutcome::Ok,
                Ok(Some(reason)) => StepOutcome::SoftTimeout {
                    reason: reason.clone(),
                },
                Err(e) => StepOutcome::Failed {
                    message: e.to_string(),
                },
            };
            progress.steps.push(StepRecord {
                index,
                step: step.to_string(),
                outcome,
                duration_ms,
                frames_not_ready,
            });

            if let Err(e) = result {
                return Err(Failure::from_error(Some(index), e));
            }
        }

        progress.states.push(RunState::Verifying);
        for (offset, predicate) in scenario.verify.iter().enumerate() {
            let index = scenario.steps.len() + offset;
            progress.current = Some(index);
            match evaluate(&locator, predicate).await {
                Ok(Evaluation::Holds) => {}
                Ok(Evaluation::Violated { expected, actual }) => {
                    return Err(Failure::from_error(
                        Some(index),
                        E2eError::AssertionFailed { expected, actual },
                    ))
                }
                Err(e) => return Err(Failure::from_error(Some(index), e)),
            }
        }
        Ok(())
    }

    /// Execute one step. `Ok(Some(reason))` is an absorbed soft timeout.
    async fn execute(
        &self,
        locator: &Locator<'_, F::Driver>,
        helper: &RoleSessionHelper<'_, F::Driver>,
        step: &Step,
        active_role: &mut Option<Role>,
    ) -> E2eResult<Option<String>> {
        let timeouts = &self.config.timeouts;
        let bound = |ms: &Option<u64>, default: Duration| {
            ms.map(Duration::from_millis).unwrap_or(default)
        };

        match step {
            Step::Navigate {
                url,
                wait_until,
                timeout_ms,
            } => {
                let url = self.config.resolve_url(url);
                let page = locator.active_page().await?;
                locator
                    .driver()
                    .goto(&page, &url, *wait_until, bound(timeout_ms, timeouts.navigation()))
                    .await?;
            }
            Step::WaitForLoad {
                frame,
                state,
                timeout_ms,
            } => {
                let resolved = locator.frame_now(frame.as_deref()).await?;
                let timeout = bound(timeout_ms, timeouts.frame_ready());
                match locator
                    .driver()
                    .wait_for_load(&resolved.frame, *state, timeout)
                    .await
                {
                    Ok(()) if *state != Readiness::Commit => {
                        locator.record_readiness(&resolved, true).await?;
                    }
                    Ok(()) => {}
                    Err(e) if e.is_soft() => {
                        warn!("{e}; continuing");
                        if *state == Readiness::DomContentLoaded {
                            locator.record_readiness(&resolved, false).await?;
                        }
                        return Ok(Some(e.to_string()));
                    }
                    Err(e) => return Err(e),
                }
            }
            Step::Locate {
                locator: target,
                frame,
                timeout_ms,
            } => {
                locator
                    .resolve(target, frame.as_deref(), bound(timeout_ms, timeouts.locate()))
                    .await?;
            }
            Step::Act {
                locator: target,
                kind,
                value,
                frame,
                timeout_ms,
            } => {
                let action = match kind {
                    ActKind::Click => Action::Click,
                    ActKind::Fill => Action::Fill(value.clone().unwrap_or_default()),
                };
                locator
                    .act(
                        target,
                        frame.as_deref(),
                        &action,
                        bound(timeout_ms, timeouts.action()),
                    )
                    .await?;
            }
            Step::Assert { predicate } => {
                if let Evaluation::Violated { expected, actual } =
                    evaluate(locator, predicate).await?
                {
                    return Err(E2eError::AssertionFailed { expected, actual });
                }
            }
            Step::Login {
                role,
                email,
                password,
            } => {
                helper.login(*role, email, password).await?;
                *active_role = Some(*role);
            }
            Step::Logout => {
                let role = active_role
                    .take()
                    .ok_or_else(|| E2eError::Session("logout without an active role".to_string()))?;
                helper.logout(role).await?;
            }
        }
        Ok(None)
    }

    async fn capture(&self, session: &Session<F::Driver>, scenario: &str) -> Vec<PathBuf> {
        let timeout = self.config.timeouts.navigation();
        match session.screenshot(timeout).await {
            Ok(png) => match self.artifacts.save_screenshot(scenario, &png) {
                Ok(path) => vec![path],
                Err(e) => {
                    warn!("Failed to store failure screenshot: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to capture failure screenshot: {e}");
                Vec::new()
            }
        }
    }
}

fn terminal_state(verdict: &Verdict) -> RunState {
    match verdict {
        Verdict::Pass => RunState::Passed,
        Verdict::Fail(_) => RunState::Failed,
    }
}
