//! End-to-end scenario tests: full runs through the library API.

use zbsim_channel::ClassificationPolicy;
use zbsim_model::{
    load_scenario_from_str, load_scenarios_from_str, DependencyPolicy, RoutingMode, ScenarioConfig,
};
use zbsim_runner::export::{append_row, CSV_HEADER};
use zbsim_runner::{run_scenario, run_sweep, RunnerError, SweepGrid};

// ============================================================================
// Test Helper Functions
// ============================================================================

/// A scenario with noise and fading switched off.
fn quiet(nodes: usize, distance_m: f64) -> ScenarioConfig {
    let mut config = ScenarioConfig {
        nodes,
        distance_m,
        ..Default::default()
    };
    config.channel.noise_enabled = false;
    config.channel.fading_enabled = false;
    config
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_too_few_nodes_is_config_error() {
    let config = ScenarioConfig {
        nodes: 2,
        ..Default::default()
    };
    let err = run_scenario(&config).unwrap_err();
    assert!(matches!(err, RunnerError::Model(_)), "unexpected error: {}", err);
}

#[test]
fn test_short_free_space_links_deliver_everything() {
    let mut config = quiet(4, 5.0);
    config.channel.path_loss_exponent = 2.0;
    let result = run_scenario(&config).unwrap();

    assert_eq!(result.summary.sent, 50);
    assert_eq!(result.summary.received, 50);
    assert_eq!(result.summary.dropped, 0);
    assert_eq!(result.summary.delivery_ratio_pct, 100.0);
    assert_eq!(result.scenario.name, "D5_N4");
    // Every link is identical without noise or fading.
    assert_eq!(result.summary.snr_db.min, result.summary.snr_db.max);
    assert!(result.summary.snr_db.min > config.channel.snr_threshold_db);
}

#[test]
fn test_many_to_one_discovers_once() {
    let result = run_scenario(&quiet(6, 10.0)).unwrap();
    assert_eq!(result.summary.route_discoveries, 1);
    assert_eq!(result.summary.sent, 50);
    assert_eq!(result.summary.join_successes, 5);
}

#[test]
fn test_mesh_mode_runs_to_completion() {
    let mut config = quiet(6, 5.0);
    config.routing = RoutingMode::Mesh;
    let result = run_scenario(&config).unwrap();
    assert_eq!(result.summary.route_discoveries, 1);
    assert_eq!(result.summary.sent, 50);
    assert!(result.summary.received > 0);
}

#[test]
fn test_same_seed_same_results() {
    let config = ScenarioConfig {
        nodes: 8,
        distance_m: 15.0,
        seed: 1234,
        ..Default::default()
    };
    let first = run_scenario(&config).unwrap();
    let second = run_scenario(&config).unwrap();
    assert_eq!(first.summary, second.summary);
    assert_eq!(first.run.total_events, second.run.total_events);

    let other = run_scenario(&ScenarioConfig { seed: 4321, ..config }).unwrap();
    assert_eq!(other.summary.sent, first.summary.sent);
}

#[test]
fn test_csv_accumulates_rows_under_one_header() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("results.csv");

    for distance_m in [5.0, 10.0] {
        let result = run_scenario(&quiet(4, distance_m)).unwrap();
        append_row(&path, &result.scenario, &result.summary).unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], CSV_HEADER);
    assert!(lines[1].starts_with("D5_N4,5,4,0,0,50,"));
    assert!(lines[2].starts_with("D10_N4,10,4,0,0,50,"));
}

#[test]
fn test_waiting_policy_without_failures_never_times_out() {
    let mut config = quiet(6, 5.0);
    config.dependency = DependencyPolicy::WaitForConfirmations {
        min_joined: None,
        poll_interval_s: 0.5,
        max_wait_s: 30.0,
    };
    let result = run_scenario(&config).unwrap();
    assert_eq!(result.summary.dependency_timeouts, 0);
    assert_eq!(result.summary.sent, 50);
}

#[test]
fn test_waiting_policy_counts_timeout_when_joins_fail() {
    let mut config = quiet(4, 5.0);
    config.stack.join_failure_probability = 1.0;
    config.dependency = DependencyPolicy::WaitForConfirmations {
        min_joined: Some(3),
        poll_interval_s: 0.5,
        max_wait_s: 10.0,
    };
    let result = run_scenario(&config).unwrap();
    assert_eq!(result.summary.join_successes, 0);
    assert!(result.summary.dependency_timeouts >= 1);
}

#[test]
fn test_sweep_preserves_grid_order() {
    let mut base = quiet(4, 5.0);
    base.duration_s = 30.0;
    let grid = SweepGrid {
        distances: vec![5.0, 20.0],
        nodes: vec![4, 5],
        noise_modes: vec![false],
        fading_modes: vec![false],
    };
    let names: Vec<String> = run_sweep(&base, &grid)
        .unwrap()
        .into_iter()
        .map(|r| r.scenario.name)
        .collect();
    assert_eq!(names, vec!["D5_N4", "D5_N5", "D20_N4", "D20_N5"]);
}

#[test]
fn test_every_send_failing_in_the_stack() {
    let mut config = quiet(4, 5.0);
    config.stack.data_failure_probability = 1.0;
    let summary = run_scenario(&config).unwrap().summary;

    assert_eq!(summary.sent, 50);
    assert_eq!(summary.received, 0);
    assert_eq!(summary.protocol_failures, summary.sent);
    assert_eq!(summary.dropped, summary.sent);
    assert_eq!(
        summary.dropped_noise + summary.dropped_fading + summary.dropped_sensitivity,
        0
    );
    assert_eq!(summary.in_flight, 0);
    assert_eq!(summary.delivery_ratio_pct, 0.0);
}

#[test]
fn test_some_sends_failing_in_the_stack() {
    let mut config = quiet(4, 5.0);
    config.stack.data_failure_probability = 0.3;
    let summary = run_scenario(&config).unwrap().summary;

    assert_eq!(summary.received + summary.dropped, summary.sent);
    assert_eq!(summary.dropped, summary.protocol_failures);
    assert!(summary.protocol_failures > 0);
    assert!(summary.received > 0);
}

const FADING_EDGE: &str = "
nodes: 4
distance_m: 18
topology:
  layout: line
workload:
  packets: 200
  interval_s: 0.5
";

#[test]
fn test_margin_decomposition_from_yaml_changes_drop_split() {
    let cutoff = run_scenario(&load_scenario_from_str(FADING_EDGE).unwrap()).unwrap();
    let margin_yaml = "channel:\n  classification:\n    kind: margin_decomposition\n";
    let margin_config = load_scenarios_from_str(&[FADING_EDGE, margin_yaml]).unwrap();
    assert_eq!(margin_config.channel.classification, ClassificationPolicy::MarginDecomposition);
    let margin = run_scenario(&margin_config).unwrap();

    assert_eq!(cutoff.classification, ClassificationPolicy::default());
    assert_eq!(margin.classification, ClassificationPolicy::MarginDecomposition);

    // The policy relabels drops; it never changes which readings are lost.
    let (a, b) = (&cutoff.summary, &margin.summary);
    assert_eq!(a.sent, b.sent);
    assert_eq!(a.received, b.received);
    assert_eq!(a.dropped, b.dropped);
    assert_eq!(a.dropped_sensitivity, b.dropped_sensitivity);
    assert_eq!(a.dropped_noise + a.dropped_fading, b.dropped_noise + b.dropped_fading);
    assert!(a.dropped_noise + a.dropped_fading > 0);
    assert_ne!(
        (a.dropped_noise, a.dropped_fading),
        (b.dropped_noise, b.dropped_fading)
    );
}

#[test]
fn test_huge_reading_interval_sends_only_the_first_reading() {
    let mut config = quiet(4, 5.0);
    config.workload.interval_s = 1e15;
    config.timing.sensor_stagger_s = 1e15;
    let result = run_scenario(&config).unwrap();
    assert_eq!(result.summary.sent, 1);
    assert_eq!(result.summary.received, 1);
}
