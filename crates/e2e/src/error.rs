//! Error types for E2E scenarios

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Driver bridge error: {0}")]
    Bridge(String),

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Invalid scenario '{scenario}': {reason}")]
    InvalidScenario { scenario: String, reason: String },

    #[error("Navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Frame '{frame}' not ready after {timeout:?}")]
    FrameReadinessTimeout { frame: String, timeout: Duration },

    #[error("Element {target} not actionable after {timeout:?}: {reason}")]
    InteractionTimeout {
        target: String,
        timeout: Duration,
        reason: String,
    },

    #[error("Element detached: {0}")]
    Detached(String),

    #[error("Read of {target} failed: {reason}")]
    Read { target: String, reason: String },

    #[error("Assertion failed: expected {expected}, got {actual}")]
    AssertionFailed { expected: String, actual: String },

    #[error("Scenario deadline of {0:?} exceeded")]
    Deadline(Duration),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Reporting category of a scenario failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Navigation,
    InteractionTimeout,
    Read,
    Assertion,
    Deadline,
    Session,
    Scenario,
}

impl E2eError {
    /// Soft errors are absorbed by the step that raised them and never reach a verdict.
    pub fn is_soft(&self) -> bool {
        matches!(self, E2eError::FrameReadinessTimeout { .. })
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            E2eError::Navigation { .. } => FailureKind::Navigation,
            E2eError::InteractionTimeout { .. } | E2eError::FrameReadinessTimeout { .. } => {
                FailureKind::InteractionTimeout
            }
            E2eError::Read { .. } | E2eError::Detached(_) => FailureKind::Read,
            E2eError::AssertionFailed { .. } => FailureKind::Assertion,
            E2eError::Deadline(_) => FailureKind::Deadline,
            E2eError::InvalidScenario { .. } | E2eError::SpecParse(_) => FailureKind::Scenario,
            _ => FailureKind::Session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_readiness_is_the_only_soft_error() {
        let soft = E2eError::FrameReadinessTimeout {
            frame: "ads".into(),
            timeout: Duration::from_secs(3),
        };
        assert!(soft.is_soft());

        let hard = E2eError::InteractionTimeout {
            target: "xpath=//button".into(),
            timeout: Duration::from_secs(5),
            reason: "not visible".into(),
        };
        assert!(!hard.is_soft());
        assert_eq!(hard.kind(), FailureKind::InteractionTimeout);
    }

    #[test]
    fn detached_reads_are_reported_as_read_failures() {
        assert_eq!(E2eError::Detached("row".into()).kind(), FailureKind::Read);
        assert_eq!(
            E2eError::Bridge("pipe closed".into()).kind(),
            FailureKind::Session
        );
    }
}
