//! Playwright browser automation
//!
//! [`PlaywrightDriver`] keeps one `node` process per session running a small
//! bridge script and exchanges line-delimited JSON with it. Requests carry an
//! id and may be in flight together; a reader task routes each reply back to
//! its caller. Every request carries its own timeout; the bridge never retries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::driver::{
    BrowserHandle, ContextHandle, Driver, DriverFactory, ElementHandle, ElementState,
    FrameHandle, LaunchOptions, PageHandle, Readiness,
};
use crate::error::{E2eError, E2eResult};
use crate::selector::Selector;

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Configuration for the Node side of the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    /// Node executable
    pub node: String,
    /// Directory whose `node_modules` provides `playwright`
    pub project_dir: PathBuf,
    /// Skip the `npx playwright --version` check
    pub skip_install_check: bool,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            project_dir: PathBuf::from("."),
            skip_install_check: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<RemoteError>,
}

/// Failure reported by the bridge, classified on the Node side.
#[derive(Debug, Clone, Deserialize)]
struct RemoteError {
    kind: String,
    message: String,
}

/// Callers waiting for a reply, by request id. `None` once the bridge's
/// stdout has closed.
type Pending = Arc<parking_lot::Mutex<Option<HashMap<u64, oneshot::Sender<Reply>>>>>;

pub struct PlaywrightDriver {
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    reader: JoinHandle<()>,
    child: Mutex<Child>,
    next_id: AtomicU64,
    // Holds the bridge script for the lifetime of the process
    _script_dir: tempfile::TempDir,
}

impl Drop for PlaywrightDriver {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn route_replies<R>(mut lines: Lines<R>, pending: Pending)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let raw = match lines.next_line().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                debug!("bridge stdout failed: {e}");
                break;
            }
        };
        let reply: Reply = match serde_json::from_str(&raw) {
            Ok(reply) => reply,
            Err(_) => {
                debug!("bridge: {raw}");
                continue;
            }
        };
        let waiter = pending.lock().as_mut().and_then(|map| map.remove(&reply.id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!("Discarding stale bridge reply {}", reply.id),
        }
    }
    // Dropping the senders fails every outstanding exchange.
    pending.lock().take();
}

impl PlaywrightDriver {
    /// Start a bridge process.
    pub async fn spawn(config: &PlaywrightConfig) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let node_modules = std::fs::canonicalize(&config.project_dir)
            .unwrap_or_else(|_| config.project_dir.clone())
            .join("node_modules");
        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut child = TokioCommand::new(&config.node)
            .arg(&script_path)
            .current_dir(&config.project_dir)
            .env("NODE_PATH", &node_modules)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Bridge(format!("Failed to start {}: {e}", config.node)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Bridge("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Bridge("bridge stdout unavailable".to_string()))?;

        let pending: Pending = Arc::new(parking_lot::Mutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(route_replies(BufReader::new(stdout).lines(), pending.clone()));

        Ok(Self {
            stdin: Mutex::new(stdin),
            pending,
            reader,
            child: Mutex::new(child),
            next_id: AtomicU64::new(1),
            _script_dir: script_dir,
        })
    }

    /// Check if Playwright is installed
    pub fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(&config.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// One request/response exchange. The outer error is transport failure,
    /// the inner one is what the bridge reported.
    async fn exchange(&self, op: &str, args: Value) -> E2eResult<Result<Value, RemoteError>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&json!({ "id": id, "op": op, "args": args }))?;
        line.push('\n');
        trace!("bridge <- {line}");

        let (tx, rx) = oneshot::channel();
        let registered = self
            .pending
            .lock()
            .as_mut()
            .map(|map| map.insert(id, tx))
            .is_some();
        if !registered {
            return Err(E2eError::Bridge(format!("bridge exited before {op}")));
        }

        if let Err(e) = self.send(line.as_bytes()).await {
            if let Some(map) = self.pending.lock().as_mut() {
                map.remove(&id);
            }
            return Err(e);
        }

        let reply = rx
            .await
            .map_err(|_| E2eError::Bridge(format!("bridge exited during {op}")))?;
        Ok(match (reply.ok, reply.error) {
            (true, _) => Ok(reply.value),
            (false, Some(err)) => Err(err),
            (false, None) => Err(RemoteError {
                kind: "error".to_string(),
                message: format!("{op} failed without detail"),
            }),
        })
    }

    async fn send(&self, line: &[u8]) -> E2eResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Exchange where only detachment gets a dedicated error.
    async fn call(&self, op: &str, args: Value) -> E2eResult<Value> {
        self.exchange(op, args).await?.map_err(|e| generic(op, e))
    }

    async fn call_as<T: serde::de::DeserializeOwned>(&self, op: &str, args: Value) -> E2eResult<T> {
        Ok(serde_json::from_value(self.call(op, args).await?)?)
    }
}

fn generic(op: &str, err: RemoteError) -> E2eError {
    match err.kind.as_str() {
        "detached" => E2eError::Detached(err.message),
        _ => E2eError::Bridge(format!("{op}: {}", err.message)),
    }
}

fn millis(timeout: Duration) -> u64 {
    timeout.as_millis() as u64
}

#[async_trait]
impl Driver for PlaywrightDriver {
    async fn open(&self, launch: &LaunchOptions) -> E2eResult<BrowserHandle> {
        info!("Launching {} (headless: {})", launch.browser.as_str(), launch.headless);
        let args = json!({
            "browser": launch.browser.as_str(),
            "headless": launch.headless,
            "args": launch.args(),
            "viewport": { "width": launch.window_width, "height": launch.window_height },
        });
        self.call_as("open", args).await.map(BrowserHandle)
    }

    async fn new_context(&self, browser: &BrowserHandle) -> E2eResult<ContextHandle> {
        self.call_as("new_context", json!({ "browser": browser }))
            .await
            .map(ContextHandle)
    }

    async fn new_page(&self, context: &ContextHandle) -> E2eResult<PageHandle> {
        self.call_as("new_page", json!({ "context": context }))
            .await
            .map(PageHandle)
    }

    async fn pages(&self, context: &ContextHandle) -> E2eResult<Vec<PageHandle>> {
        self.call_as("pages", json!({ "context": context })).await
    }

    async fn goto(
        &self,
        page: &PageHandle,
        url: &str,
        readiness: Readiness,
        timeout: Duration,
    ) -> E2eResult<()> {
        debug!("goto {url} (until {})", readiness.as_str());
        let args = json!({
            "page": page,
            "url": url,
            "wait_until": readiness.as_str(),
            "timeout_ms": millis(timeout),
        });
        match self.exchange("goto", args).await? {
            Ok(_) => Ok(()),
            Err(err) if err.kind == "navigation" => Err(E2eError::Navigation {
                url: url.to_string(),
                reason: err.message,
            }),
            Err(err) => Err(generic("goto", err)),
        }
    }

    async fn wait_for_load(
        &self,
        frame: &FrameHandle,
        readiness: Readiness,
        timeout: Duration,
    ) -> E2eResult<()> {
        let args = json!({
            "frame": frame,
            "state": readiness.as_str(),
            "timeout_ms": millis(timeout),
        });
        match self.exchange("wait_for_load", args).await? {
            Ok(_) => Ok(()),
            Err(err) if err.kind == "frame_timeout" => Err(E2eError::FrameReadinessTimeout {
                frame: frame.to_string(),
                timeout,
            }),
            Err(err) => Err(generic("wait_for_load", err)),
        }
    }

    async fn frames(&self, page: &PageHandle) -> E2eResult<Vec<FrameHandle>> {
        self.call_as("frames", json!({ "page": page })).await
    }

    async fn frame_info(&self, frame: &FrameHandle) -> E2eResult<(String, String)> {
        self.call_as("frame_info", json!({ "frame": frame })).await
    }

    async fn query(
        &self,
        frame: &FrameHandle,
        selector: &Selector,
        nth: usize,
    ) -> E2eResult<Option<ElementHandle>> {
        let args = json!({ "frame": frame, "selector": selector, "nth": nth });
        self.call_as("query", args).await
    }

    async fn query_child(
        &self,
        element: &ElementHandle,
        selector: &Selector,
        nth: usize,
    ) -> E2eResult<Option<ElementHandle>> {
        let args = json!({ "element": element, "selector": selector, "nth": nth });
        self.call_as("query_child", args).await
    }

    async fn element_state(&self, element: &ElementHandle) -> E2eResult<ElementState> {
        self.call_as("element_state", json!({ "element": element }))
            .await
    }

    async fn click(&self, element: &ElementHandle, timeout: Duration) -> E2eResult<()> {
        let args = json!({ "element": element, "timeout_ms": millis(timeout) });
        interaction(element, timeout, self.exchange("click", args).await?)
    }

    async fn fill(&self, element: &ElementHandle, value: &str, timeout: Duration) -> E2eResult<()> {
        let args = json!({ "element": element, "value": value, "timeout_ms": millis(timeout) });
        interaction(element, timeout, self.exchange("fill", args).await?)
    }

    async fn inner_text(&self, element: &ElementHandle) -> E2eResult<String> {
        self.call_as("inner_text", json!({ "element": element })).await
    }

    async fn url(&self, page: &PageHandle) -> E2eResult<String> {
        self.call_as("url", json!({ "page": page })).await
    }

    async fn title(&self, page: &PageHandle) -> E2eResult<String> {
        self.call_as("title", json!({ "page": page })).await
    }

    async fn content(&self, page: &PageHandle) -> E2eResult<String> {
        self.call_as("content", json!({ "page": page })).await
    }

    async fn screenshot(&self, page: &PageHandle) -> E2eResult<Vec<u8>> {
        let encoded: String = self.call_as("screenshot", json!({ "page": page })).await?;
        hex::decode(encoded).map_err(|e| E2eError::Bridge(format!("bad screenshot encoding: {e}")))
    }

    async fn close_context(&self, context: &ContextHandle) -> E2eResult<()> {
        self.call("close_context", json!({ "context": context }))
            .await
            .map(drop)
    }

    async fn close_browser(&self, browser: &BrowserHandle) -> E2eResult<()> {
        self.call("close_browser", json!({ "browser": browser }))
            .await
            .map(drop)
    }

    async fn shutdown(&self) -> E2eResult<()> {
        let sent = self.call("shutdown", Value::Null).await;
        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => {
                debug!("Bridge exited with {}", status?);
            }
            Err(_) => {
                child.kill().await?;
            }
        }
        sent.map(drop)
    }
}

fn interaction(
    element: &ElementHandle,
    timeout: Duration,
    reply: Result<Value, RemoteError>,
) -> E2eResult<()> {
    match reply {
        Ok(_) => Ok(()),
        Err(err) if err.kind == "timeout" => Err(E2eError::InteractionTimeout {
            target: element.to_string(),
            timeout,
            reason: err.message,
        }),
        Err(err) => Err(generic("interaction", err)),
    }
}

/// Connects one bridge process per scenario session.
#[derive(Debug, Clone, Default)]
pub struct PlaywrightFactory {
    config: PlaywrightConfig,
}

impl PlaywrightFactory {
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        if !config.skip_install_check {
            PlaywrightDriver::check_playwright_installed(&config)?;
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl DriverFactory for PlaywrightFactory {
    type Driver = PlaywrightDriver;

    async fn connect(&self) -> E2eResult<PlaywrightDriver> {
        PlaywrightDriver::spawn(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shapes() {
        let ok: Reply = serde_json::from_str(r#"{"id":3,"ok":true,"value":"page-2"}"#).unwrap();
        assert!(ok.ok);
        assert_eq!(ok.value, json!("page-2"));

        let err: Reply = serde_json::from_str(
            r#"{"id":4,"ok":false,"error":{"kind":"detached","message":"Element is not attached"}}"#,
        )
        .unwrap();
        let remote = err.error.unwrap();
        assert!(matches!(generic("click", remote), E2eError::Detached(_)));
    }

    #[test]
    fn test_interaction_timeout_classification() {
        let el = ElementHandle("el-9".to_string());
        let err = interaction(
            &el,
            Duration::from_secs(5),
            Err(RemoteError {
                kind: "timeout".to_string(),
                message: "Timeout 5000ms exceeded".to_string(),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, E2eError::InteractionTimeout { .. }));
    }

    #[test]
    fn test_selector_wire_format_matches_bridge() {
        assert_eq!(
            serde_json::to_value(Selector::test_id("logout")).unwrap(),
            json!({ "test_id": "logout" })
        );
        assert_eq!(
            serde_json::to_value(Selector::role("button", Some("Sair"))).unwrap(),
            json!({ "role": { "role": "button", "name": "Sair" } })
        );
        assert!(BRIDGE_SCRIPT.contains("case 'test_id'"));
    }

    #[test]
    fn test_bridge_reads_visible_text_and_labels_uniformly() {
        // Page text checks see rendered text, not markup.
        assert!(BRIDGE_SCRIPT.contains("locator('body').innerText()"));
        assert!(!BRIDGE_SCRIPT.contains("lookup(page).content()"));
        // Labels resolve through the accessible label at every scope.
        assert!(!BRIDGE_SCRIPT.contains("aria-label"));
        assert!(BRIDGE_SCRIPT.contains("return byLabel(root, value, null)"));
        assert!(BRIDGE_SCRIPT.contains("return byLabel(frame, value, root)"));
    }

    #[test]
    fn test_bridge_releases_handles_on_navigation_and_close() {
        assert!(BRIDGE_SCRIPT.contains("await obj.dispose()"));
        assert!(BRIDGE_SCRIPT.contains("await releaseOwned(page, false)"));
        assert!(BRIDGE_SCRIPT.contains("await releasePages(ctx.pages())"));
    }

    #[tokio::test]
    async fn test_replies_reach_their_own_caller_out_of_order() {
        let pending: Pending = Arc::new(parking_lot::Mutex::new(Some(HashMap::new())));
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();
        {
            let mut guard = pending.lock();
            let map = guard.as_mut().unwrap();
            map.insert(1, tx1);
            map.insert(2, tx2);
            map.insert(3, tx3);
        }

        let stdout = concat!(
            "{\"id\":2,\"ok\":true,\"value\":\"second\"}\n",
            "playwright noise\n",
            "{\"id\":1,\"ok\":true,\"value\":\"first\"}\n",
        );
        route_replies(BufReader::new(stdout.as_bytes()).lines(), pending.clone()).await;

        assert_eq!(rx1.await.unwrap().value, json!("first"));
        assert_eq!(rx2.await.unwrap().value, json!("second"));
        // No reply before EOF: the waiter errors instead of hanging.
        assert!(rx3.await.is_err());
        assert!(pending.lock().is_none());
    }
}
