//! CLI integration tests for the zbsim binary.
//!
//! These run the built binary against a small scenario file and check the
//! JSON result, the CSV rows and the event trace it writes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

use serde::Deserialize;

// ============================================================================
// JSON Deserialization Types
// ============================================================================

/// A trace entry from the output file. Fields depend on the entry type.
#[derive(Debug, Deserialize, Clone)]
struct TraceEntry {
    time_s: f64,
    /// Entry type: "LINK", "DELIVERY", "STEP"
    #[serde(rename = "type")]
    entry_type: String,
    /// Link outcome - present on LINK entries
    #[serde(default)]
    outcome: Option<String>,
    /// Signal-to-noise ratio - present on LINK entries
    #[serde(rename = "SNR", default)]
    snr: Option<f64>,
    /// Event label - present on STEP entries
    #[serde(default)]
    event: Option<String>,
}

// ============================================================================
// Test Helper Functions
// ============================================================================

const SCENARIO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/small_home.yaml");

/// Run the binary with `args`.
fn zbsim(args: &[&str], dir: &Path) -> Output {
    // CARGO_BIN_EXE_zbsim is set by cargo when running tests for this crate
    let binary = env!("CARGO_BIN_EXE_zbsim");
    Command::new(binary)
        .current_dir(dir)
        .args(args)
        .output()
        .expect("Failed to execute zbsim")
}

fn assert_success(output: &Output) {
    if !output.status.success() {
        panic!(
            "zbsim failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_run_writes_result_csv_and_trace() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let csv = temp_dir.path().join("results.csv");
    let trace = temp_dir.path().join("trace.json");

    let output = zbsim(
        &[
            "run",
            "--config",
            SCENARIO,
            "--csv",
            csv.to_str().unwrap(),
            "--trace",
            trace.to_str().unwrap(),
        ],
        temp_dir.path(),
    );
    assert_success(&output);

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).expect("Failed to parse result JSON");
    assert_eq!(result["scenario"]["name"], "SmallHome");
    assert_eq!(result["summary"]["sent"], 8);
    assert_eq!(result["summary"]["received"], 8);
    assert_eq!(result["classification"]["kind"], "coefficient_cutoff");

    let rows = fs::read_to_string(&csv).expect("Failed to read CSV");
    let lines: Vec<&str> = rows.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Scenario,Distance,NumNodes"));
    assert!(lines[1].starts_with("SmallHome,5,4,0,0,8,8,0,"));

    let trace_json = fs::read_to_string(&trace).expect("Failed to read trace output file");
    let entries: Vec<TraceEntry> = serde_json::from_str(&trace_json).expect("Failed to parse trace JSON");
    let links: Vec<_> = entries.iter().filter(|e| e.entry_type == "LINK").collect();
    assert_eq!(links.len(), 8);
    for link in &links {
        assert_eq!(link.outcome.as_deref(), Some("delivered"));
        assert!(link.snr.is_some());
        assert!(link.time_s <= 40.0);
    }
    assert!(entries
        .iter()
        .any(|e| e.entry_type == "STEP" && e.event.as_deref() == Some("form_network")));
    assert!(entries.windows(2).all(|w| w[0].time_s <= w[1].time_s));
}

#[test]
fn test_run_overrides_nodes_from_command_line() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = zbsim(
        &["run", "--config", SCENARIO, "--nodes", "2"],
        temp_dir.path(),
    );
    assert!(!output.status.success(), "2-node scenario should be rejected");
}

#[test]
fn test_sweep_appends_rows_in_grid_order() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let csv = temp_dir.path().join("sweep.csv");

    let output = zbsim(
        &[
            "sweep",
            "--config",
            SCENARIO,
            "--distances",
            "5,10",
            "--nodes",
            "4",
            "--noise-modes",
            "false",
            "--fading-modes",
            "false,true",
            "--csv",
            csv.to_str().unwrap(),
        ],
        temp_dir.path(),
    );
    assert_success(&output);

    let rows = fs::read_to_string(&csv).expect("Failed to read CSV");
    let names: Vec<&str> = rows
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(names, vec!["D5_N4", "D5_N4_Fading", "D10_N4", "D10_N4_Fading"]);
}

#[test]
fn test_evaluate_prints_link_report() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = zbsim(
        &[
            "evaluate",
            "--distance",
            "5",
            "--samples",
            "200",
            "--noise",
            "false",
            "--fading",
            "false",
            "--path-loss-exponent",
            "2",
        ],
        temp_dir.path(),
    );
    assert_success(&output);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("Failed to parse report JSON");
    assert_eq!(report["samples"], 200);
    assert_eq!(report["delivered"], 200);
    assert_eq!(report["classification"]["kind"], "coefficient_cutoff");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("heuristic"), "missing caveat: {}", stderr);
}

#[test]
fn test_evaluate_rejects_huge_sample_count() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let output = zbsim(
        &["evaluate", "--distance", "5", "--samples", "18446744073709551615"],
        temp_dir.path(),
    );
    assert!(!output.status.success(), "oversized sample count should be rejected");
}
