//! ZipFood E2E Scenario Engine
//!
//! This crate turns declarative, multi-role browser scenarios into pass/fail
//! verdicts with bounded, deterministic retry behavior:
//! - Drives a real browser through a Playwright bridge process
//! - Resolves the active page and frame before every step
//! - Locates elements freshly on each use, tolerating late rendering
//! - Runs login/logout sub-flows per role from a configurable layout
//! - Evaluates end-state predicates and always releases the browser session
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TestRunner (suite, app server)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioEngine                                             │
//! │    ├── acquire session (browser, context, page)             │
//! │    ├── for each Step:                                       │
//! │    │     ├── FrameResolver  -> active page / frame          │
//! │    │     ├── Locator        -> resolve / act / read         │
//! │    │     └── RoleSessionHelper -> login / logout            │
//! │    ├── verify: oracle::evaluate(Predicate) -> Evaluation    │
//! │    └── release (always, exactly once)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Driver (async trait)                                       │
//! │    ├── PlaywrightDriver  (node bridge, JSON lines)          │
//! │    └── MemoryDriver      (deterministic site model)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod frame;
pub mod locator;
pub mod memory;
pub mod oracle;
pub mod playwright;
pub mod roles;
pub mod runner;
pub mod scenario;
pub mod selector;
pub mod server;
pub mod wait;

pub use config::{EngineConfig, Timeouts};
pub use driver::{Driver, DriverFactory};
pub use engine::{ScenarioEngine, ScenarioReport, Verdict};
pub use error::{E2eError, E2eResult, FailureKind};
pub use oracle::Predicate;
pub use roles::Role;
pub use runner::{TestRunner, TestSuiteResult};
pub use scenario::{Scenario, Step};
pub use selector::{LocatorRef, Selector};
