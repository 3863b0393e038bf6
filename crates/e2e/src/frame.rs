//! Frame resolution
//!
//! Scenario steps target the most recently opened page of the session's
//! context: flows that open a second tab continue in that tab. Within the page
//! every frame gets one best-effort DOMContentLoaded wait per navigation; a
//! frame that never becomes ready is logged and reported, not fatal.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::driver::{ContextHandle, Driver, FrameHandle, PageHandle, Readiness};
use crate::error::{E2eError, E2eResult};

/// The frame a step should act on.
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub page: PageHandle,
    pub frame: FrameHandle,
    /// Whether the target frame is known to have reached DOMContentLoaded
    pub ready: bool,
    /// Frames of the current document known to have missed the readiness wait
    pub soft_timeouts: Vec<String>,
}

/// Readiness outcomes for the document currently shown in one page. A new
/// URL or another page starts a fresh ledger.
#[derive(Debug, Default)]
struct ReadinessLedger {
    document: Option<(PageHandle, String)>,
    frames: HashMap<FrameHandle, bool>,
}

impl ReadinessLedger {
    fn enter(&mut self, page: &PageHandle, url: &str) {
        let same = self
            .document
            .as_ref()
            .is_some_and(|(p, u)| p == page && u == url);
        if !same {
            self.document = Some((page.clone(), url.to_string()));
            self.frames.clear();
        }
    }

    fn not_ready(&self, frames: &[FrameHandle]) -> Vec<String> {
        frames
            .iter()
            .filter(|f| self.frames.get(*f) == Some(&false))
            .map(FrameHandle::to_string)
            .collect()
    }
}

pub struct FrameResolver<'a, D: Driver + ?Sized> {
    driver: &'a D,
    context: &'a ContextHandle,
    fallback: &'a PageHandle,
    readiness_timeout: Duration,
    ledger: Mutex<ReadinessLedger>,
}

impl<'a, D: Driver + ?Sized> FrameResolver<'a, D> {
    pub fn new(
        driver: &'a D,
        context: &'a ContextHandle,
        fallback: &'a PageHandle,
        readiness_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            context,
            fallback,
            readiness_timeout,
            ledger: Mutex::new(ReadinessLedger::default()),
        }
    }

    /// Most recently opened page, or the session page if the context lists none.
    pub async fn active_page(&self) -> E2eResult<PageHandle> {
        let pages = self.driver.pages(self.context).await?;
        Ok(pages.last().cloned().unwrap_or_else(|| self.fallback.clone()))
    }

    /// Resolve the main frame, or the frame matching `target` by name then URL,
    /// after waiting for readiness of every frame not yet waited on for the
    /// current document.
    pub async fn resolve(&self, target: Option<&str>) -> E2eResult<ResolvedFrame> {
        let page = self.active_page().await?;
        let url = self.driver.url(&page).await?;
        let frames = self.driver.frames(&page).await?;

        let pending: Vec<FrameHandle> = {
            let mut ledger = self.ledger.lock();
            ledger.enter(&page, &url);
            frames
                .iter()
                .filter(|f| !ledger.frames.contains_key(*f))
                .cloned()
                .collect()
        };

        let waits = pending.iter().map(|frame| {
            self.driver
                .wait_for_load(frame, Readiness::DomContentLoaded, self.readiness_timeout)
        });
        let mut outcomes = Vec::with_capacity(pending.len());
        for (frame, outcome) in pending.iter().zip(join_all(waits).await) {
            match outcome {
                Ok(()) => outcomes.push((frame.clone(), true)),
                Err(e) if e.is_soft() => {
                    debug!("frame {frame} not ready: {e}");
                    outcomes.push((frame.clone(), false));
                }
                Err(E2eError::Detached(_)) => {
                    warn!("frame {frame} detached while waiting for readiness");
                    outcomes.push((frame.clone(), false));
                }
                Err(e) => return Err(e),
            }
        }

        let soft_timeouts = {
            let mut ledger = self.ledger.lock();
            ledger.frames.extend(outcomes);
            ledger.not_ready(&frames)
        };
        self.pick(page, frames, target, soft_timeouts).await
    }

    /// Resolve without any readiness wait; for checks against the page as it
    /// is right now.
    pub async fn resolve_now(&self, target: Option<&str>) -> E2eResult<ResolvedFrame> {
        let page = self.active_page().await?;
        let frames = self.driver.frames(&page).await?;
        self.pick(page, frames, target, Vec::new()).await
    }

    /// Record the outcome of an explicit DOMContentLoaded wait on a frame.
    pub async fn record(&self, resolved: &ResolvedFrame, ready: bool) -> E2eResult<()> {
        let url = self.driver.url(&resolved.page).await?;
        let mut ledger = self.ledger.lock();
        ledger.enter(&resolved.page, &url);
        ledger.frames.insert(resolved.frame.clone(), ready);
        Ok(())
    }

    async fn pick(
        &self,
        page: PageHandle,
        frames: Vec<FrameHandle>,
        target: Option<&str>,
        soft_timeouts: Vec<String>,
    ) -> E2eResult<ResolvedFrame> {
        let index = match target {
            None => 0,
            Some(name) => self.find(&frames, name).await?,
        };
        let frame = frames
            .get(index)
            .cloned()
            .ok_or_else(|| E2eError::Session(format!("page {page} has no frames")))?;
        let ready = self.ledger.lock().frames.get(&frame).copied().unwrap_or(false);

        Ok(ResolvedFrame {
            page,
            frame,
            ready,
            soft_timeouts,
        })
    }

    async fn find(&self, frames: &[FrameHandle], target: &str) -> E2eResult<usize> {
        let mut infos = Vec::with_capacity(frames.len());
        for frame in frames {
            infos.push(self.driver.frame_info(frame).await?);
        }

        infos
            .iter()
            .position(|(name, _)| name == target)
            .or_else(|| infos.iter().position(|(_, url)| url.contains(target)))
            .ok_or_else(|| E2eError::InteractionTimeout {
                target: format!("frame={target}"),
                timeout: Duration::ZERO,
                reason: "no frame with that name or URL".to_string(),
            })
    }
}
