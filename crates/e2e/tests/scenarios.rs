mod common;

use std::collections::HashSet;

use zipfood_e2e::memory::MemoryFactory;
use zipfood_e2e::{Scenario, Step, TestRunner};

/// Every shipped scenario parses, validates and carries a unique name.
#[test]
fn shipped_scenarios_load() {
    let scenarios = Scenario::load_all(common::scenarios_dir()).unwrap();
    assert!(scenarios.len() >= 7, "found {} scenarios", scenarios.len());

    let names: HashSet<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names.len(), scenarios.len(), "scenario names must be unique");

    for scenario in &scenarios {
        assert!(
            !scenario.verify.is_empty()
                || scenario.steps.iter().any(|s| matches!(s, Step::Assert { .. })),
            "{} asserts nothing",
            scenario.name
        );
    }
}

#[test]
fn smoke_tag_selects_a_subset() {
    let scenarios = Scenario::load_all(common::scenarios_dir()).unwrap();
    let smoke = Scenario::filter_by_tag(&scenarios, "smoke");
    assert!(!smoke.is_empty());
    assert!(smoke.len() < scenarios.len());
    assert!(smoke.iter().all(|s| s.tags.iter().any(|t| t == "smoke")));
}

/// The shipped scenarios pass against the modelled app, in parallel, and the
/// suite result lands in `test-results.json`.
#[tokio::test(start_paused = true)]
async fn shipped_scenarios_pass_against_model() {
    let out = tempfile::tempdir().unwrap();
    let mut config = common::config(out.path());
    config.parallelism = 3;

    let factory = MemoryFactory::new(common::zipfood_site());
    let ledger = factory.ledger();
    let mut runner = TestRunner::new(factory, config, common::scenarios_dir());

    let results = runner.run_all().await.unwrap();
    for report in &results.results {
        assert!(
            report.passed(),
            "{} failed: {:?}",
            report.name,
            report.failure()
        );
    }
    assert!(results.success());
    assert_eq!(results.total, results.passed);
    assert_eq!(ledger.open_browsers(), 0);
    assert_eq!(ledger.open_contexts(), 0);

    let path = runner.write_results(&results).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["total"], results.total);
    assert_eq!(written["results"][0]["verdict"]["verdict"], "pass");
}

#[tokio::test(start_paused = true)]
async fn run_tagged_only_runs_matching_scenarios() {
    let out = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::new(common::zipfood_site());
    let mut runner = TestRunner::new(factory, common::config(out.path()), common::scenarios_dir());

    let results = runner.run_tagged("orders").await.unwrap();
    assert_eq!(results.total, 1);
    assert_eq!(results.results[0].name, "tc014-order-history");
    assert!(results.success());
}

#[tokio::test(start_paused = true)]
async fn run_test_by_name() {
    let out = tempfile::tempdir().unwrap();
    let factory = MemoryFactory::new(common::zipfood_site());
    let mut runner = TestRunner::new(factory, common::config(out.path()), common::scenarios_dir());

    let report = runner.run_test("tc017-route-protection").await.unwrap();
    assert!(report.passed(), "{:?}", report.failure());

    assert!(runner.run_test("no-such-scenario").await.is_err());
}

#[test]
fn sample_config_parses() {
    let path = std::path::Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/e2e.toml"));
    let config = zipfood_e2e::EngineConfig::load(path).unwrap();
    assert_eq!(config.server.command, vec!["npm", "run", "dev"]);
    assert_eq!(config.timeouts.action_ms, 5_000);
    assert_eq!(config.launch.args()[0], "--window-size=1280,720");
}
