//! In-memory driver
//!
//! A deterministic stand-in for a browser: a [`MemorySite`] declares routes,
//! route guards and accounts, and [`MemoryDriver`] renders them into pages,
//! frames and elements with the same observable contract as the Playwright
//! bridge (fresh handles per query, detachment on navigation, per-context
//! sessions). Scenarios can be exercised end to end without a browser.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::driver::{
    BrowserHandle, ContextHandle, Driver, DriverFactory, ElementHandle, ElementState,
    FrameHandle, LaunchOptions, PageHandle, Readiness,
};
use crate::error::{E2eError, E2eResult};
use crate::selector::Selector;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// When an element is part of the rendered document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Shown {
    #[default]
    Always,
    SignedIn,
    SignedOut,
}

/// What clicking an element does to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickEffect {
    Navigate(String),
    /// Open the path in a new page of the same context
    OpenPage(String),
    /// Profile selection: remember the role and go to sign-in
    ChooseRole(String),
    SignIn {
        email: Selector,
        password: Selector,
    },
    SignUp {
        name: Selector,
        email: Selector,
        password: Selector,
        confirm: Selector,
    },
    SignOut,
}

#[derive(Debug, Clone)]
pub struct MemoryElement {
    selector: Selector,
    text: String,
    shown: Shown,
    hidden: bool,
    enabled: bool,
    detaches_on_read: bool,
    appears_after: Duration,
    on_click: Option<ClickEffect>,
    children: Vec<MemoryElement>,
}

impl MemoryElement {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            text: String::new(),
            shown: Shown::Always,
            hidden: false,
            enabled: true,
            detaches_on_read: false,
            appears_after: Duration::ZERO,
            on_click: None,
            children: Vec::new(),
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn shown(mut self, shown: Shown) -> Self {
        self.shown = shown;
        self
    }

    /// Present in the DOM but not visible.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The element is replaced by a re-render whenever its text is read.
    pub fn detaches_on_read(mut self) -> Self {
        self.detaches_on_read = true;
        self
    }

    /// Not matched by queries until `delay` after the page rendered.
    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.appears_after = delay;
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click = Some(effect);
        self
    }

    pub fn child(mut self, child: MemoryElement) -> Self {
        self.children.push(child);
        self
    }

    fn rendered_for(&self, signed_in: bool) -> bool {
        match self.shown {
            Shown::Always => true,
            Shown::SignedIn => signed_in,
            Shown::SignedOut => !signed_in,
        }
    }

    fn inner_text(&self, signed_in: bool) -> String {
        let mut parts = Vec::new();
        if !self.hidden && !self.text.is_empty() {
            parts.push(self.text.clone());
        }
        for child in self.children.iter().filter(|c| c.rendered_for(signed_in)) {
            let text = child.inner_text(signed_in);
            if !text.is_empty() {
                parts.push(text);
            }
        }
        parts.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct MemoryFrame {
    name: String,
    url: String,
    ready: bool,
    elements: Vec<MemoryElement>,
}

impl MemoryFrame {
    pub fn main() -> Self {
        Self::named("")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: String::new(),
            ready: true,
            elements: Vec::new(),
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// The frame never reaches DOMContentLoaded and never becomes interactable.
    pub fn never_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn element(mut self, element: MemoryElement) -> Self {
        self.elements.push(element);
        self
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDocument {
    title: Option<String>,
    frames: Vec<MemoryFrame>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            title: None,
            frames: vec![MemoryFrame::main()],
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Add an element to the main frame.
    pub fn element(mut self, element: MemoryElement) -> Self {
        self.frames[0].elements.push(element);
        self
    }

    /// Add an iframe after the main frame.
    pub fn frame(mut self, frame: MemoryFrame) -> Self {
        self.frames.push(frame);
        self
    }

    fn find(&self, frame: usize, path: &[usize]) -> Option<&MemoryElement> {
        let (first, rest) = path.split_first()?;
        let mut element = self.frames.get(frame)?.elements.get(*first)?;
        for index in rest {
            element = element.children.get(*index)?;
        }
        Some(element)
    }
}

#[derive(Debug, Clone)]
struct Account {
    email: String,
    password: String,
    role: String,
}

#[derive(Debug, Clone)]
struct RouteGuard {
    prefix: String,
    role: String,
}

/// Declarative model of the application under test.
#[derive(Debug, Clone)]
pub struct MemorySite {
    origin: String,
    title: String,
    sign_in_path: String,
    routes: BTreeMap<String, MemoryDocument>,
    guards: Vec<RouteGuard>,
    accounts: Vec<Account>,
    access_denied: MemoryDocument,
}

impl MemorySite {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            title: String::new(),
            sign_in_path: "/auth/sign-in".to_string(),
            routes: BTreeMap::new(),
            guards: Vec::new(),
            accounts: Vec::new(),
            access_denied: MemoryDocument::new()
                .element(MemoryElement::new(Selector::text("Acesso Negado")).text("Acesso Negado")),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    pub fn route(mut self, path: impl Into<String>, document: MemoryDocument) -> Self {
        self.routes.insert(path.into(), document);
        self
    }

    /// Paths under `prefix` need a session with `role`.
    pub fn guard(mut self, prefix: impl Into<String>, role: impl Into<String>) -> Self {
        self.guards.push(RouteGuard {
            prefix: prefix.into(),
            role: role.into(),
        });
        self
    }

    pub fn account(
        mut self,
        email: impl Into<String>,
        password: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        self.accounts.push(Account {
            email: email.into(),
            password: password.into(),
            role: role.into(),
        });
        self
    }

    pub fn access_denied(mut self, document: MemoryDocument) -> Self {
        self.access_denied = document;
        self
    }

    fn path_of(&self, url: &str) -> Option<String> {
        let path = if let Some(rest) = url.strip_prefix(&self.origin) {
            rest
        } else if url.starts_with('/') {
            url
        } else {
            return None;
        };
        let path = path.split(['?', '#']).next().unwrap_or_default();
        Some(if path.is_empty() { "/".to_string() } else { path.to_string() })
    }
}

/// Counts session resources so tests can check nothing leaks.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    pub browsers_opened: AtomicUsize,
    pub browsers_closed: AtomicUsize,
    pub contexts_opened: AtomicUsize,
    pub contexts_closed: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl MemoryLedger {
    pub fn open_browsers(&self) -> usize {
        self.browsers_opened.load(Ordering::SeqCst) - self.browsers_closed.load(Ordering::SeqCst)
    }

    pub fn open_contexts(&self) -> usize {
        self.contexts_opened.load(Ordering::SeqCst) - self.contexts_closed.load(Ordering::SeqCst)
    }
}

/// Injected failure for session tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Launch,
    NewPage,
    /// Reading page text takes this long.
    SlowContent(Duration),
}

#[derive(Debug)]
struct ContextState {
    open: bool,
    pages: Vec<String>,
    role: Option<String>,
    pending_role: Option<String>,
}

#[derive(Debug)]
struct PageState {
    context: String,
    url: String,
    generation: u64,
    rendered_at: Instant,
    document: MemoryDocument,
    values: HashMap<(usize, Vec<usize>), String>,
    banner: Option<String>,
}

#[derive(Debug, Clone)]
struct ElementRef {
    page: String,
    frame: usize,
    generation: u64,
    path: Vec<usize>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    contexts: HashMap<String, ContextState>,
    pages: HashMap<String, PageState>,
    frames: HashMap<String, (String, usize)>,
    elements: HashMap<String, ElementRef>,
    accounts: Vec<Account>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

pub struct MemoryDriver {
    site: Arc<MemorySite>,
    ledger: Arc<MemoryLedger>,
    fault: Option<Fault>,
    state: Mutex<State>,
}

impl MemoryDriver {
    pub fn new(site: Arc<MemorySite>, ledger: Arc<MemoryLedger>) -> Self {
        let state = State {
            accounts: site.accounts.clone(),
            ..State::default()
        };
        Self {
            site,
            ledger,
            fault: None,
            state: Mutex::new(state),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    fn signed_in(state: &State, page: &str) -> bool {
        state
            .pages
            .get(page)
            .and_then(|p| state.contexts.get(&p.context))
            .is_some_and(|c| c.role.is_some())
    }

    /// Renders `url` into the page, applying route guards.
    fn navigate(&self, state: &mut State, page_id: &str, url: &str) -> E2eResult<()> {
        let unreachable = |reason: &str| E2eError::Navigation {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let path = self
            .site
            .path_of(url)
            .ok_or_else(|| unreachable("net::ERR_CONNECTION_REFUSED"))?;

        let context_id = state
            .pages
            .get(page_id)
            .map(|p| p.context.clone())
            .ok_or_else(|| E2eError::Session(format!("unknown page {page_id}")))?;
        let role = state.contexts.get(&context_id).and_then(|c| c.role.clone());

        let guard = self.site.guards.iter().find(|g| path.starts_with(&g.prefix));
        let (final_path, document) = match (guard, role) {
            (Some(_), None) => {
                debug!("memory: {path} requires a session, redirecting to sign-in");
                let sign_in = self.site.sign_in_path.clone();
                let doc = self.site.routes.get(&sign_in).cloned().unwrap_or_default();
                (sign_in, doc)
            }
            (Some(g), Some(r)) if g.role != r => (path, self.site.access_denied.clone()),
            _ => {
                let doc = self
                    .site
                    .routes
                    .get(&path)
                    .cloned()
                    .ok_or_else(|| unreachable("404 route not served"))?;
                (path, doc)
            }
        };

        let page = state
            .pages
            .get_mut(page_id)
            .ok_or_else(|| E2eError::Session(format!("unknown page {page_id}")))?;
        page.url = format!("{}{}", self.site.origin, final_path);
        page.generation += 1;
        page.rendered_at = Instant::now();
        page.document = document;
        page.values.clear();
        page.banner = None;
        Ok(())
    }

    fn open_page(&self, state: &mut State, context_id: &str) -> E2eResult<String> {
        let page_id = state.id("page");
        let context = state
            .contexts
            .get_mut(context_id)
            .filter(|c| c.open)
            .ok_or_else(|| E2eError::Session(format!("context {context_id} is closed")))?;
        context.pages.push(page_id.clone());
        state.pages.insert(
            page_id.clone(),
            PageState {
                context: context_id.to_string(),
                url: "about:blank".to_string(),
                generation: 0,
                rendered_at: Instant::now(),
                document: MemoryDocument::new(),
                values: HashMap::new(),
                banner: None,
            },
        );
        Ok(page_id)
    }

    fn element(state: &State, element: &ElementHandle) -> E2eResult<(ElementRef, MemoryElement)> {
        let detached = || E2eError::Detached(element.to_string());
        let el = state.elements.get(element.as_str()).ok_or_else(detached)?;
        let page = state.pages.get(&el.page).ok_or_else(detached)?;
        if page.generation != el.generation {
            return Err(detached());
        }
        let found = page.document.find(el.frame, &el.path).ok_or_else(detached)?;
        Ok((el.clone(), found.clone()))
    }

    fn field_value(state: &State, page_id: &str, selector: &Selector) -> String {
        let Some(page) = state.pages.get(page_id) else {
            return String::new();
        };
        let signed_in = Self::signed_in(state, page_id);
        let mut matches = Vec::new();
        collect_matches(&page.document.frames[0].elements, selector, signed_in, &mut Vec::new(), &mut matches);
        matches
            .first()
            .and_then(|path| page.values.get(&(0, path.clone())))
            .cloned()
            .unwrap_or_default()
    }

    fn apply_click(&self, state: &mut State, page_id: &str, effect: ClickEffect) -> E2eResult<()> {
        let context_id = state
            .pages
            .get(page_id)
            .map(|p| p.context.clone())
            .ok_or_else(|| E2eError::Session(format!("unknown page {page_id}")))?;

        match effect {
            ClickEffect::Navigate(path) => self.navigate(state, page_id, &path),
            ClickEffect::OpenPage(path) => {
                let new_page = self.open_page(state, &context_id)?;
                self.navigate(state, &new_page, &path)
            }
            ClickEffect::ChooseRole(role) => {
                if let Some(ctx) = state.contexts.get_mut(&context_id) {
                    ctx.pending_role = Some(role);
                }
                let sign_in = self.site.sign_in_path.clone();
                self.navigate(state, page_id, &sign_in)
            }
            ClickEffect::SignIn { email, password } => {
                let email = Self::field_value(state, page_id, &email);
                let password = Self::field_value(state, page_id, &password);
                let account = state
                    .accounts
                    .iter()
                    .find(|a| a.email == email && a.password == password)
                    .cloned();
                match account {
                    Some(account) => {
                        let ctx = state
                            .contexts
                            .get_mut(&context_id)
                            .ok_or_else(|| E2eError::Session("context vanished".to_string()))?;
                        let role = ctx.pending_role.take().unwrap_or(account.role);
                        ctx.role = Some(role.clone());
                        self.navigate(state, page_id, &format!("/{role}"))
                    }
                    None => {
                        set_banner(state, page_id, "Email ou senha inválidos");
                        Ok(())
                    }
                }
            }
            ClickEffect::SignUp {
                name,
                email,
                password,
                confirm,
            } => {
                let name = Self::field_value(state, page_id, &name);
                let email = Self::field_value(state, page_id, &email);
                let password = Self::field_value(state, page_id, &password);
                let confirm = Self::field_value(state, page_id, &confirm);

                let problem = if name.trim().is_empty() {
                    Some("Nome é obrigatório")
                } else if !email.contains('@') {
                    Some("Email inválido")
                } else if password.len() < 6 {
                    Some("A senha deve ter pelo menos 6 caracteres")
                } else if password != confirm {
                    Some("As senhas não coincidem")
                } else {
                    None
                };

                if let Some(problem) = problem {
                    set_banner(state, page_id, problem);
                    return Ok(());
                }

                state.accounts.push(Account {
                    email,
                    password,
                    role: "customer".to_string(),
                });
                if let Some(ctx) = state.contexts.get_mut(&context_id) {
                    ctx.role = Some("customer".to_string());
                    ctx.pending_role = None;
                }
                self.navigate(state, page_id, "/customer")
            }
            ClickEffect::SignOut => {
                if let Some(ctx) = state.contexts.get_mut(&context_id) {
                    ctx.role = None;
                }
                let sign_in = self.site.sign_in_path.clone();
                self.navigate(state, page_id, &sign_in)
            }
        }
    }
}

fn set_banner(state: &mut State, page_id: &str, text: &str) {
    if let Some(page) = state.pages.get_mut(page_id) {
        page.banner = Some(text.to_string());
    }
}

/// Depth-first, document-order collection of element paths matching `selector`.
fn collect_matches(
    elements: &[MemoryElement],
    selector: &Selector,
    signed_in: bool,
    prefix: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    for (index, element) in elements.iter().enumerate() {
        if !element.rendered_for(signed_in) {
            continue;
        }
        prefix.push(index);
        if &element.selector == selector {
            out.push(prefix.clone());
        }
        collect_matches(&element.children, selector, signed_in, prefix, out);
        prefix.pop();
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn open(&self, launch: &LaunchOptions) -> E2eResult<BrowserHandle> {
        if self.fault == Some(Fault::Launch) {
            return Err(E2eError::Session("browser failed to launch".to_string()));
        }
        let id = self.state.lock().id(launch.browser.as_str());
        self.ledger.browsers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(BrowserHandle(id))
    }

    async fn new_context(&self, _browser: &BrowserHandle) -> E2eResult<ContextHandle> {
        let mut state = self.state.lock();
        let id = state.id("context");
        state.contexts.insert(
            id.clone(),
            ContextState {
                open: true,
                pages: Vec::new(),
                role: None,
                pending_role: None,
            },
        );
        self.ledger.contexts_opened.fetch_add(1, Ordering::SeqCst);
        Ok(ContextHandle(id))
    }

    async fn new_page(&self, context: &ContextHandle) -> E2eResult<PageHandle> {
        if self.fault == Some(Fault::NewPage) {
            return Err(E2eError::Session("page crashed on creation".to_string()));
        }
        let mut state = self.state.lock();
        self.open_page(&mut state, context.as_str()).map(PageHandle)
    }

    async fn pages(&self, context: &ContextHandle) -> E2eResult<Vec<PageHandle>> {
        let state = self.state.lock();
        let ctx = state
            .contexts
            .get(context.as_str())
            .ok_or_else(|| E2eError::Session(format!("unknown context {context}")))?;
        Ok(ctx.pages.iter().cloned().map(PageHandle).collect())
    }

    async fn goto(
        &self,
        page: &PageHandle,
        url: &str,
        _readiness: Readiness,
        _timeout: Duration,
    ) -> E2eResult<()> {
        let mut state = self.state.lock();
        self.navigate(&mut state, page.as_str(), url)
    }

    async fn wait_for_load(
        &self,
        frame: &FrameHandle,
        _readiness: Readiness,
        timeout: Duration,
    ) -> E2eResult<()> {
        let ready = {
            let state = self.state.lock();
            let (page, index) = state
                .frames
                .get(frame.as_str())
                .cloned()
                .ok_or_else(|| E2eError::Session(format!("unknown frame {frame}")))?;
            state
                .pages
                .get(&page)
                .and_then(|p| p.document.frames.get(index))
                .is_some_and(|f| f.ready)
        };

        if ready {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(E2eError::FrameReadinessTimeout {
            frame: frame.to_string(),
            timeout,
        })
    }

    async fn frames(&self, page: &PageHandle) -> E2eResult<Vec<FrameHandle>> {
        let mut state = self.state.lock();
        let count = state
            .pages
            .get(page.as_str())
            .map(|p| p.document.frames.len())
            .ok_or_else(|| E2eError::Session(format!("unknown page {page}")))?;

        let mut frames = Vec::with_capacity(count);
        for index in 0..count {
            let id = format!("{page}:frame{index}");
            state
                .frames
                .insert(id.clone(), (page.as_str().to_string(), index));
            frames.push(FrameHandle(id));
        }
        Ok(frames)
    }

    async fn frame_info(&self, frame: &FrameHandle) -> E2eResult<(String, String)> {
        let state = self.state.lock();
        let (page, index) = state
            .frames
            .get(frame.as_str())
            .ok_or_else(|| E2eError::Session(format!("unknown frame {frame}")))?;
        let page = state
            .pages
            .get(page)
            .ok_or_else(|| E2eError::Session(format!("unknown page {page}")))?;
        match page.document.frames.get(*index) {
            Some(f) if *index == 0 => Ok((f.name.clone(), page.url.clone())),
            Some(f) => Ok((f.name.clone(), f.url.clone())),
            None => Ok((String::new(), String::new())),
        }
    }

    async fn query(
        &self,
        frame: &FrameHandle,
        selector: &Selector,
        nth: usize,
    ) -> E2eResult<Option<ElementHandle>> {
        let mut state = self.state.lock();
        let Some((page_id, index)) = state.frames.get(frame.as_str()).cloned() else {
            return Ok(None);
        };
        let signed_in = Self::signed_in(&state, &page_id);
        let Some(page) = state.pages.get(&page_id) else {
            return Ok(None);
        };
        let Some(doc_frame) = page.document.frames.get(index) else {
            return Ok(None);
        };
        if !doc_frame.ready {
            return Ok(None);
        }

        let mut matches = Vec::new();
        collect_matches(&doc_frame.elements, selector, signed_in, &mut Vec::new(), &mut matches);
        let age = page.rendered_at.elapsed();
        matches.retain(|path| {
            page.document
                .find(index, path)
                .map_or(true, |e| e.appears_after <= age)
        });
        let Some(path) = matches.into_iter().nth(nth) else {
            return Ok(None);
        };

        let generation = page.generation;
        let id = state.id("el");
        state.elements.insert(
            id.clone(),
            ElementRef {
                page: page_id,
                frame: index,
                generation,
                path,
            },
        );
        Ok(Some(ElementHandle(id)))
    }

    async fn query_child(
        &self,
        element: &ElementHandle,
        selector: &Selector,
        nth: usize,
    ) -> E2eResult<Option<ElementHandle>> {
        let mut state = self.state.lock();
        let (parent, found) = Self::element(&state, element)?;
        let signed_in = Self::signed_in(&state, &parent.page);

        let mut matches = Vec::new();
        collect_matches(&found.children, selector, signed_in, &mut parent.path.clone(), &mut matches);
        let Some(path) = matches.into_iter().nth(nth) else {
            return Ok(None);
        };

        let id = state.id("el");
        state.elements.insert(id.clone(), ElementRef { path, ..parent });
        Ok(Some(ElementHandle(id)))
    }

    async fn element_state(&self, element: &ElementHandle) -> E2eResult<ElementState> {
        let state = self.state.lock();
        match Self::element(&state, element) {
            Ok((_, found)) => Ok(ElementState {
                attached: true,
                visible: !found.hidden,
                enabled: found.enabled,
            }),
            Err(E2eError::Detached(_)) => Ok(ElementState::default()),
            Err(e) => Err(e),
        }
    }

    async fn click(&self, element: &ElementHandle, timeout: Duration) -> E2eResult<()> {
        let mut state = self.state.lock();
        let (el, found) = Self::element(&state, element)?;
        let actionable = ElementState {
            attached: true,
            visible: !found.hidden,
            enabled: found.enabled,
        };
        if let Some(reason) = actionable.blocker() {
            return Err(E2eError::InteractionTimeout {
                target: element.to_string(),
                timeout,
                reason: reason.to_string(),
            });
        }
        match found.on_click {
            Some(effect) => self.apply_click(&mut state, &el.page, effect),
            None => Ok(()),
        }
    }

    async fn fill(&self, element: &ElementHandle, value: &str, _timeout: Duration) -> E2eResult<()> {
        let mut state = self.state.lock();
        let (el, _) = Self::element(&state, element)?;
        if let Some(page) = state.pages.get_mut(&el.page) {
            page.values.insert((el.frame, el.path), value.to_string());
        }
        Ok(())
    }

    async fn inner_text(&self, element: &ElementHandle) -> E2eResult<String> {
        let mut state = self.state.lock();
        let (el, found) = Self::element(&state, element)?;
        if found.detaches_on_read {
            if let Some(page) = state.pages.get_mut(&el.page) {
                page.generation += 1;
            }
            return Err(E2eError::Detached(element.to_string()));
        }
        let signed_in = Self::signed_in(&state, &el.page);
        Ok(found.inner_text(signed_in))
    }

    async fn url(&self, page: &PageHandle) -> E2eResult<String> {
        let state = self.state.lock();
        state
            .pages
            .get(page.as_str())
            .map(|p| p.url.clone())
            .ok_or_else(|| E2eError::Session(format!("unknown page {page}")))
    }

    async fn title(&self, page: &PageHandle) -> E2eResult<String> {
        let state = self.state.lock();
        let page = state
            .pages
            .get(page.as_str())
            .ok_or_else(|| E2eError::Session(format!("unknown page {page}")))?;
        Ok(page
            .document
            .title
            .clone()
            .unwrap_or_else(|| self.site.title.clone()))
    }

    async fn content(&self, page: &PageHandle) -> E2eResult<String> {
        if let Some(Fault::SlowContent(delay)) = self.fault {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock();
        let signed_in = Self::signed_in(&state, page.as_str());
        let page = state
            .pages
            .get(page.as_str())
            .ok_or_else(|| E2eError::Session(format!("unknown page {page}")))?;

        let mut parts: Vec<String> = page.banner.iter().cloned().collect();
        parts.extend(
            page.document.frames[0]
                .elements
                .iter()
                .filter(|e| e.rendered_for(signed_in))
                .map(|e| e.inner_text(signed_in))
                .filter(|t| !t.is_empty()),
        );
        Ok(parts.join("\n"))
    }

    async fn screenshot(&self, page: &PageHandle) -> E2eResult<Vec<u8>> {
        let url = self.url(page).await?;
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(url.as_bytes());
        Ok(bytes)
    }

    async fn close_context(&self, context: &ContextHandle) -> E2eResult<()> {
        let mut state = self.state.lock();
        if let Some(ctx) = state.contexts.get_mut(context.as_str()) {
            if ctx.open {
                ctx.open = false;
                self.ledger.contexts_closed.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn close_browser(&self, _browser: &BrowserHandle) -> E2eResult<()> {
        self.ledger.browsers_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> E2eResult<()> {
        self.ledger.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one [`MemoryDriver`] per session over a shared site and ledger.
#[derive(Clone)]
pub struct MemoryFactory {
    site: Arc<MemorySite>,
    ledger: Arc<MemoryLedger>,
    fault: Option<Fault>,
}

impl MemoryFactory {
    pub fn new(site: MemorySite) -> Self {
        Self {
            site: Arc::new(site),
            ledger: Arc::new(MemoryLedger::default()),
            fault: None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn ledger(&self) -> Arc<MemoryLedger> {
        self.ledger.clone()
    }
}

#[async_trait]
impl DriverFactory for MemoryFactory {
    type Driver = MemoryDriver;

    async fn connect(&self) -> E2eResult<MemoryDriver> {
        let driver = MemoryDriver::new(self.site.clone(), self.ledger.clone());
        Ok(match self.fault {
            Some(fault) => driver.with_fault(fault),
            None => driver,
        })
    }
}
