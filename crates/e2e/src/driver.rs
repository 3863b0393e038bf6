//! Driver adapter seam
//!
//! The engine talks to a browser only through [`Driver`]. Adapters are pure
//! passthrough: no operation retries, and every wait is bounded by the timeout
//! the caller passes in. Retry policy lives in the locator and the engine.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;
use crate::selector::Selector;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

handle!(
    /// A launched browser process
    BrowserHandle
);
handle!(
    /// An isolated browsing context (cookies, storage)
    ContextHandle
);
handle!(
    /// A tab inside a context
    PageHandle
);
handle!(
    /// A document or iframe inside a page
    FrameHandle
);
handle!(
    /// A live element; only valid until the DOM replaces it
    ElementHandle
);

/// Load milestone a navigation or wait should reach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Response received and document committed
    Commit,
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Commit => "commit",
            Readiness::DomContentLoaded => "domcontentloaded",
            Readiness::Load => "load",
            Readiness::NetworkIdle => "networkidle",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

/// Browser process launch flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    pub browser: BrowserKind,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Disable the Chromium sandbox (containers without user namespaces)
    pub no_sandbox: bool,
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            window_width: 1280,
            window_height: 720,
            no_sandbox: false,
            extra_args: vec![
                "--disable-dev-shm-usage".to_string(),
                "--ipc=host".to_string(),
                "--single-process".to_string(),
            ],
        }
    }
}

impl LaunchOptions {
    /// Full argument list passed to the browser process.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![format!(
            "--window-size={},{}",
            self.window_width, self.window_height
        )];
        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Actionability snapshot of an element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementState {
    pub fn is_actionable(&self) -> bool {
        self.attached && self.visible && self.enabled
    }

    /// Why the element cannot be acted on, if it cannot.
    pub fn blocker(&self) -> Option<&'static str> {
        if !self.attached {
            Some("detached from the document")
        } else if !self.visible {
            Some("not visible")
        } else if !self.enabled {
            Some("disabled")
        } else {
            None
        }
    }
}

/// Browser automation capability consumed by the engine.
///
/// A detached element must surface as [`crate::E2eError::Detached`] so callers
/// can tell it apart from transport failures.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn open(&self, launch: &LaunchOptions) -> E2eResult<BrowserHandle>;

    async fn new_context(&self, browser: &BrowserHandle) -> E2eResult<ContextHandle>;

    async fn new_page(&self, context: &ContextHandle) -> E2eResult<PageHandle>;

    /// Pages of a context in opening order.
    async fn pages(&self, context: &ContextHandle) -> E2eResult<Vec<PageHandle>>;

    async fn goto(
        &self,
        page: &PageHandle,
        url: &str,
        readiness: Readiness,
        timeout: Duration,
    ) -> E2eResult<()>;

    async fn wait_for_load(
        &self,
        frame: &FrameHandle,
        readiness: Readiness,
        timeout: Duration,
    ) -> E2eResult<()>;

    /// Frames of a page, main frame first. Re-querying may return a different set.
    async fn frames(&self, page: &PageHandle) -> E2eResult<Vec<FrameHandle>>;

    /// Name and URL of a frame, used to target iframes by name.
    async fn frame_info(&self, frame: &FrameHandle) -> E2eResult<(String, String)>;

    /// The `nth` match of `selector`, without waiting.
    async fn query(
        &self,
        frame: &FrameHandle,
        selector: &Selector,
        nth: usize,
    ) -> E2eResult<Option<ElementHandle>>;

    async fn query_child(
        &self,
        element: &ElementHandle,
        selector: &Selector,
        nth: usize,
    ) -> E2eResult<Option<ElementHandle>>;

    async fn element_state(&self, element: &ElementHandle) -> E2eResult<ElementState>;

    async fn click(&self, element: &ElementHandle, timeout: Duration) -> E2eResult<()>;

    async fn fill(&self, element: &ElementHandle, value: &str, timeout: Duration) -> E2eResult<()>;

    async fn inner_text(&self, element: &ElementHandle) -> E2eResult<String>;

    async fn url(&self, page: &PageHandle) -> E2eResult<String>;

    async fn title(&self, page: &PageHandle) -> E2eResult<String>;

    /// Rendered text content of the page body.
    async fn content(&self, page: &PageHandle) -> E2eResult<String>;

    /// PNG screenshot of the viewport.
    async fn screenshot(&self, page: &PageHandle) -> E2eResult<Vec<u8>>;

    async fn close_context(&self, context: &ContextHandle) -> E2eResult<()>;

    async fn close_browser(&self, browser: &BrowserHandle) -> E2eResult<()>;

    /// Tear down the driver connection itself.
    async fn shutdown(&self) -> E2eResult<()>;
}

/// Connects one driver per scenario session so parallel runs share nothing.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    type Driver: Driver + 'static;

    async fn connect(&self) -> E2eResult<Self::Driver>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_launch_args_match_container_profile() {
        let args = LaunchOptions::default().args();
        assert_eq!(args[0], "--window-size=1280,720");
        assert!(args.contains(&"--disable-dev-shm-usage".to_string()));
        assert!(!args.contains(&"--no-sandbox".to_string()));
    }

    #[test]
    fn test_blocker_reports_first_missing_condition() {
        let state = ElementState {
            attached: true,
            visible: false,
            enabled: false,
        };
        assert_eq!(state.blocker(), Some("not visible"));
        assert!(!state.is_actionable());

        let ok = ElementState {
            attached: true,
            visible: true,
            enabled: true,
        };
        assert!(ok.blocker().is_none());
    }
}
