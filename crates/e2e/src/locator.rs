//! Resilient element location
//!
//! A [`Locator`] turns a [`LocatorRef`] into a live element at the moment it
//! is needed and never caches handles between calls. Waits are bounded by
//! [`poll_until`]; transient states (no match yet, not actionable, detached
//! mid-action) are retried until the timeout, after which the last observed
//! reason is reported.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::config::Timeouts;
use crate::driver::{ContextHandle, Driver, ElementHandle, ElementState, PageHandle};
use crate::error::{E2eError, E2eResult};
use crate::frame::{FrameResolver, ResolvedFrame};
use crate::selector::{LocatorRef, Selector};
use crate::wait::{poll_until, Polled, Probe, WaitConfig};

/// What happens before an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SettlePolicy {
    None,
    /// Unconditional pause before every interaction
    Fixed { ms: u64 },
    /// Wait until the element's state and text stop changing for the window
    Stable { window_ms: u64 },
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::Fixed { ms: 3_000 }
    }
}

/// Interaction kind for [`Locator::act`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click,
    Fill(String),
}

impl Action {
    fn verb(&self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::Fill(_) => "fill",
        }
    }
}

pub struct Locator<'a, D: Driver + ?Sized> {
    driver: &'a D,
    frames: FrameResolver<'a, D>,
    timeouts: &'a Timeouts,
    soft_timeouts: Mutex<Vec<String>>,
}

impl<'a, D: Driver + ?Sized> Locator<'a, D> {
    pub fn new(
        driver: &'a D,
        context: &'a ContextHandle,
        page: &'a PageHandle,
        timeouts: &'a Timeouts,
    ) -> Self {
        Self {
            driver,
            frames: FrameResolver::new(driver, context, page, timeouts.frame_ready()),
            timeouts,
            soft_timeouts: Mutex::new(Vec::new()),
        }
    }

    pub fn driver(&self) -> &'a D {
        self.driver
    }

    pub fn timeouts(&self) -> &'a Timeouts {
        self.timeouts
    }

    /// Frames whose readiness wait timed out since the last call.
    pub fn take_soft_timeouts(&self) -> Vec<String> {
        std::mem::take(&mut *self.soft_timeouts.lock())
    }

    /// Page the next step acts on.
    pub async fn active_page(&self) -> E2eResult<PageHandle> {
        self.frames.active_page().await
    }

    /// Resolve `frame` (main frame when `None`), recording soft readiness timeouts.
    pub async fn frame(&self, frame: Option<&str>) -> E2eResult<ResolvedFrame> {
        let resolved = self.frames.resolve(frame).await?;
        self.soft_timeouts
            .lock()
            .extend(resolved.soft_timeouts.iter().cloned());
        Ok(resolved)
    }

    /// Resolve `frame` as the page stands, without readiness waits.
    pub async fn frame_now(&self, frame: Option<&str>) -> E2eResult<ResolvedFrame> {
        self.frames.resolve_now(frame).await
    }

    /// Remember the outcome of an explicit wait so later steps on the same
    /// document do not wait on that frame again.
    pub async fn record_readiness(&self, resolved: &ResolvedFrame, ready: bool) -> E2eResult<()> {
        self.frames.record(resolved, ready).await
    }

    /// Poll until the nth match exists, without waiting for actionability.
    pub async fn resolve(
        &self,
        target: &LocatorRef,
        frame: Option<&str>,
        timeout: Duration,
    ) -> E2eResult<ElementHandle> {
        let resolved = self.frame(frame).await?;
        self.resolve_in(&resolved, target, timeout).await
    }

    async fn resolve_in(
        &self,
        resolved: &ResolvedFrame,
        target: &LocatorRef,
        timeout: Duration,
    ) -> E2eResult<ElementHandle> {
        let driver = self.driver;
        let frame = &resolved.frame;
        let selector = &target.selector;
        let nth = target.nth;

        let polled = poll_until(self.wait(timeout), move || async move {
            Ok(match driver.query(frame, selector, nth).await? {
                Some(element) => Probe::Ready(element),
                None => Probe::Pending("no element matches".to_string()),
            })
        })
        .await?;

        match polled {
            Polled::Ready(element) => Ok(element),
            Polled::Elapsed { last_reason } => Err(E2eError::InteractionTimeout {
                target: target.to_string(),
                timeout,
                reason: last_reason,
            }),
        }
    }

    /// Settle, then click or fill once the element is attached, visible and enabled.
    pub async fn act(
        &self,
        target: &LocatorRef,
        frame: Option<&str>,
        action: &Action,
        timeout: Duration,
    ) -> E2eResult<()> {
        let resolved = self.frame(frame).await?;
        self.settle(&resolved, target, timeout).await?;

        debug!("{} {target}", action.verb());
        let driver = self.driver;
        let frame = &resolved.frame;
        let selector = &target.selector;
        let nth = target.nth;

        let polled = poll_until(self.wait(timeout), move || async move {
            let Some(element) = driver.query(frame, selector, nth).await? else {
                return Ok(Probe::Pending("no element matches".to_string()));
            };
            let state = driver.element_state(&element).await?;
            if let Some(blocker) = state.blocker() {
                return Ok(Probe::Pending(blocker.to_string()));
            }

            let outcome = match action {
                Action::Click => driver.click(&element, timeout).await,
                Action::Fill(value) => driver.fill(&element, value, timeout).await,
            };
            match outcome {
                Ok(()) => Ok(Probe::Ready(())),
                Err(E2eError::Detached(_)) => {
                    Ok(Probe::Pending("detached during action".to_string()))
                }
                Err(E2eError::InteractionTimeout { reason, .. }) => Ok(Probe::Pending(reason)),
                Err(e) => Err(e),
            }
        })
        .await?;

        match polled {
            Polled::Ready(()) => Ok(()),
            Polled::Elapsed { last_reason } => Err(E2eError::InteractionTimeout {
                target: target.to_string(),
                timeout,
                reason: last_reason,
            }),
        }
    }

    /// Inner text of the element, or of its `field` child.
    pub async fn read(
        &self,
        target: &LocatorRef,
        field: Option<&Selector>,
        frame: Option<&str>,
    ) -> E2eResult<String> {
        let resolved = self.frame(frame).await?;
        let element = self
            .resolve_in(&resolved, target, self.timeouts.locate())
            .await?;
        self.text_of(target, element, field).await
    }

    /// Single-shot [`read`](Self::read): `None` when nothing matches right now.
    pub async fn read_now(
        &self,
        target: &LocatorRef,
        field: Option<&Selector>,
        frame: Option<&str>,
    ) -> E2eResult<Option<String>> {
        let resolved = self.frame_now(frame).await?;
        match self
            .driver
            .query(&resolved.frame, &target.selector, target.nth)
            .await?
        {
            Some(element) => self.text_of(target, element, field).await.map(Some),
            None => Ok(None),
        }
    }

    async fn text_of(
        &self,
        target: &LocatorRef,
        element: ElementHandle,
        field: Option<&Selector>,
    ) -> E2eResult<String> {
        let element = match field {
            None => element,
            Some(field) => match self.driver.query_child(&element, field, 0).await {
                Ok(Some(child)) => child,
                Ok(None) => {
                    return Err(E2eError::Read {
                        target: target.to_string(),
                        reason: format!("field {field} is absent"),
                    })
                }
                Err(E2eError::Detached(_)) => return Err(detached_read(target)),
                Err(e) => return Err(e),
            },
        };

        match self.driver.inner_text(&element).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(E2eError::Detached(_)) => Err(detached_read(target)),
            Err(e) => Err(e),
        }
    }

    /// Visibility right now, no waiting.
    pub async fn is_visible(&self, target: &LocatorRef, frame: Option<&str>) -> E2eResult<bool> {
        let resolved = self.frame_now(frame).await?;
        let Some(element) = self
            .driver
            .query(&resolved.frame, &target.selector, target.nth)
            .await?
        else {
            return Ok(false);
        };
        let state = self.driver.element_state(&element).await?;
        Ok(state.attached && state.visible)
    }

    /// Number of matches right now.
    pub async fn count(&self, selector: &Selector, frame: Option<&str>) -> E2eResult<usize> {
        let resolved = self.frame_now(frame).await?;
        let mut count = 0;
        while self
            .driver
            .query(&resolved.frame, selector, count)
            .await?
            .is_some()
        {
            count += 1;
        }
        Ok(count)
    }

    /// Probe for an optional control: true when it becomes visible within `timeout`.
    pub async fn probe(&self, target: &LocatorRef, timeout: Duration) -> E2eResult<bool> {
        let resolved = self.frame_now(None).await?;
        let driver = self.driver;
        let frame = &resolved.frame;
        let selector = &target.selector;
        let nth = target.nth;

        let polled = poll_until(self.wait(timeout), move || async move {
            let Some(element) = driver.query(frame, selector, nth).await? else {
                return Ok(Probe::Pending("absent".to_string()));
            };
            Ok(if driver.element_state(&element).await?.visible {
                Probe::Ready(())
            } else {
                Probe::Pending("hidden".to_string())
            })
        })
        .await?;
        Ok(matches!(polled, Polled::Ready(())))
    }

    fn wait(&self, timeout: Duration) -> WaitConfig {
        WaitConfig::new(timeout, self.timeouts.poll())
    }

    async fn settle(
        &self,
        resolved: &ResolvedFrame,
        target: &LocatorRef,
        timeout: Duration,
    ) -> E2eResult<()> {
        match self.timeouts.settle {
            SettlePolicy::None => Ok(()),
            SettlePolicy::Fixed { ms } => {
                sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            SettlePolicy::Stable { window_ms } => {
                self.settle_stable(resolved, target, Duration::from_millis(window_ms), timeout)
                    .await
            }
        }
    }

    /// Returns once the observed snapshot has not changed for `window`, or at
    /// `timeout`; the interaction itself reports any remaining problem.
    async fn settle_stable(
        &self,
        resolved: &ResolvedFrame,
        target: &LocatorRef,
        window: Duration,
        timeout: Duration,
    ) -> E2eResult<()> {
        let deadline = Instant::now() + timeout;
        let mut last = self.snapshot(resolved, target).await?;
        let mut since = Instant::now();

        loop {
            let now = Instant::now();
            if last.is_some() && now - since >= window {
                return Ok(());
            }
            if now >= deadline {
                trace!("{target} never settled");
                return Ok(());
            }
            sleep(self.timeouts.poll().min(deadline - now)).await;

            let current = self.snapshot(resolved, target).await?;
            if current != last {
                last = current;
                since = Instant::now();
            }
        }
    }

    async fn snapshot(
        &self,
        resolved: &ResolvedFrame,
        target: &LocatorRef,
    ) -> E2eResult<Option<(ElementState, String)>> {
        let Some(element) = self
            .driver
            .query(&resolved.frame, &target.selector, target.nth)
            .await?
        else {
            return Ok(None);
        };
        let state = self.driver.element_state(&element).await?;
        match self.driver.inner_text(&element).await {
            Ok(text) => Ok(Some((state, text))),
            Err(E2eError::Detached(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn detached_read(target: &LocatorRef) -> E2eError {
    E2eError::Read {
        target: target.to_string(),
        reason: "element detached before its text was read".to_string(),
    }
}
