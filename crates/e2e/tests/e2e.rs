//! E2E test harness entry point
//!
//! This file is the test binary that runs the YAML scenarios against a real
//! browser. Run with: ZIPFOOD_E2E=1 cargo test --package zipfood-e2e --test e2e -- --help

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use zipfood_e2e::driver::BrowserKind;
use zipfood_e2e::playwright::PlaywrightFactory;
use zipfood_e2e::{E2eResult, EngineConfig, Scenario, TestRunner};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BrowserArg {
    Chromium,
    Firefox,
    Webkit,
}

impl From<BrowserArg> for BrowserKind {
    fn from(arg: BrowserArg) -> Self {
        match arg {
            BrowserArg::Chromium => BrowserKind::Chromium,
            BrowserArg::Firefox => BrowserKind::Firefox,
            BrowserArg::Webkit => BrowserKind::Webkit,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "zipfood-e2e")]
#[command(about = "Scenario runner for the ZipFood web app")]
struct Args {
    /// Engine configuration file (TOML); defaults apply when absent
    #[arg(short, long, default_value = "e2e.toml")]
    config: PathBuf,

    /// Path to scenario directory
    #[arg(short, long, default_value = "tests/scenarios")]
    scenarios: PathBuf,

    /// Run only scenarios matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific scenario by name
    #[arg(short, long)]
    name: Option<String>,

    /// Base URL of the app (overrides the config file)
    #[arg(long)]
    base_url: Option<String>,

    /// Browser to use
    #[arg(long, value_enum)]
    browser: Option<BrowserArg>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Do not start or reuse the app server
    #[arg(long)]
    no_server: bool,

    /// Concurrent scenarios
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    // `cargo test` builds and runs this binary too; browser runs are opt-in.
    if std::env::var_os("ZIPFOOD_E2E").is_none() {
        println!("zipfood-e2e: set ZIPFOOD_E2E=1 to run the browser scenarios; skipping");
        return;
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    let result = rt.block_on(async_main(args));

    match result {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn apply_overrides(config: &mut EngineConfig, args: &Args) {
    if let Some(url) = &args.base_url {
        config.base_url = url.clone();
        config.server.url = url.clone();
    }
    if let Some(browser) = args.browser {
        config.launch.browser = browser.into();
    }
    if args.headed {
        config.launch.headless = false;
    }
    if args.no_server {
        config.server.enabled = false;
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    if let Some(output) = &args.output {
        config.output.screenshots_dir = output.join("screenshots");
        config.output.results_dir = output.clone();
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let mut config = EngineConfig::load(&args.config)?;
    apply_overrides(&mut config, &args);

    let factory = PlaywrightFactory::new(config.playwright.clone())?;
    let mut runner = TestRunner::new(factory, config, &args.scenarios);

    let results = if let Some(name) = &args.name {
        let selected: Vec<Scenario> = Scenario::load_all(&args.scenarios)?
            .into_iter()
            .filter(|s| &s.name == name)
            .collect();
        runner.run_scenarios(&selected).await?
    } else if let Some(tag) = &args.tag {
        runner.run_tagged(tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&results)?;
    runner.stop_server()?;

    Ok(results.success() && results.total > 0)
}
