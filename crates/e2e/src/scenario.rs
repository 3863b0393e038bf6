//! Declarative YAML scenarios

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::driver::Readiness;
use crate::error::{E2eError, E2eResult};
use crate::oracle::Predicate;
use crate::roles::Role;
use crate::selector::LocatorRef;

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order
    pub steps: Vec<Step>,

    /// End-state predicates checked after the last step
    #[serde(default)]
    pub verify: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActKind {
    Click,
    Fill,
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate the active page (URL relative to the base URL)
    Navigate {
        url: String,
        #[serde(default = "default_commit")]
        wait_until: Readiness,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Best-effort wait for a frame to load; timing out is not a failure
    WaitForLoad {
        #[serde(default)]
        frame: Option<String>,
        #[serde(default)]
        state: Readiness,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for an element to exist
    Locate {
        locator: LocatorRef,
        #[serde(default)]
        frame: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Click or fill an element
    Act {
        locator: LocatorRef,
        kind: ActKind,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        frame: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    Assert {
        predicate: Predicate,
    },

    Login {
        role: Role,
        email: String,
        password: String,
    },

    Logout,
}

fn default_commit() -> Readiness {
    Readiness::Commit
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Navigate { url, .. } => write!(f, "navigate:{url}"),
            Step::WaitForLoad { frame, state, .. } => write!(
                f,
                "wait_for_load:{}:{}",
                frame.as_deref().unwrap_or("main"),
                state.as_str()
            ),
            Step::Locate { locator, .. } => write!(f, "locate:{locator}"),
            Step::Act { locator, kind, .. } => match kind {
                ActKind::Click => write!(f, "click:{locator}"),
                ActKind::Fill => write!(f, "fill:{locator}"),
            },
            Step::Assert { predicate } => write!(f, "assert:{}", predicate.describe()),
            Step::Login { role, email, .. } => write!(f, "login:{role}:{email}"),
            Step::Logout => f.write_str("logout"),
        }
    }
}

impl Scenario {
    /// Parse and validate a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            E2eError::Yaml(err) => E2eError::SpecParse(format!("{}: {err}", path.display())),
            other => other,
        })
    }

    /// Load all scenarios from a directory, sorted by name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Static checks: non-empty, fills carry a value, login/logout alternate.
    pub fn validate(&self) -> E2eResult<()> {
        let invalid = |reason: String| E2eError::InvalidScenario {
            scenario: self.name.clone(),
            reason,
        };

        if self.steps.is_empty() {
            return Err(invalid("no steps".to_string()));
        }

        let mut active: Option<Role> = None;
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Act {
                    kind: ActKind::Fill,
                    value: None,
                    ..
                } => return Err(invalid(format!("step {index}: fill without a value"))),
                Step::Login { role, .. } => {
                    if let Some(current) = active {
                        return Err(invalid(format!(
                            "step {index}: login as {role} while {current} is still logged in"
                        )));
                    }
                    active = Some(*role);
                }
                Step::Logout => {
                    if active.take().is_none() {
                        return Err(invalid(format!("step {index}: logout without a session")));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
