//! End-to-end tests for the healthtrends binary
//!
//! Every command runs inside its own temp directory with HOME pointed at it,
//! so no user configuration or cache leaks in.

use assert_cmd::Command;
use chrono::{Duration, Utc};
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            temp: TempDir::new().unwrap(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("healthtrends").unwrap();
        cmd.current_dir(self.temp.path())
            .env("HOME", self.temp.path())
            .env_remove("RUST_LOG")
            .arg("--quiet")
            .arg("--cache-dir")
            .arg(self.cache_dir());
        cmd
    }

    fn cache_dir(&self) -> PathBuf {
        self.temp.path().join("cache")
    }

    fn write_export(&self, contents: &str) -> PathBuf {
        let path = self.temp.path().join("export.csv");
        fs::write(&path, contents).unwrap();
        path
    }

    /// 30 days of rising steps and three heart rate readings
    fn standard_export(&self) -> PathBuf {
        let today = Utc::now().date_naive();
        let mut csv = String::from("metric,timestamp,value\n");
        for age in 0..30 {
            let day = today - Duration::days(age);
            csv.push_str(&format!("steps,{},{}\n", day, 9000 - age * 50));
        }
        for age in 0..3 {
            let day = today - Duration::days(age);
            csv.push_str(&format!("heart_rate,{},{}\n", day, 60 + age));
        }
        self.write_export(&csv)
    }
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_no_command_prints_help() {
    Workspace::new()
        .cmd()
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_metrics_lists_known_names() {
    Workspace::new()
        .cmd()
        .args(["metrics", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"steps\""))
        .stdout(predicate::str::contains("\"sum\""));
}

#[test]
fn test_analyze_reports_ready_and_insufficient_metrics() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    let output = ws
        .cmd()
        .args(["analyze", "--format", "json", "--data"])
        .arg(&export)
        .output()
        .unwrap();
    // heart_rate has too few points
    assert_eq!(output.status.code(), Some(1));

    let reports = stdout_json(&output);
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 2);

    let heart_rate = &reports[0];
    assert_eq!(heart_rate["metric"], "heart_rate");
    assert_eq!(heart_rate["status"], "insufficient_data");
    assert!(heart_rate.get("trend").is_none());

    let steps = &reports[1];
    assert_eq!(steps["metric"], "steps");
    assert_eq!(steps["status"], "ready");
    assert_eq!(steps["trend"]["direction"], "increasing");
    assert!(steps["trend"]["comparative_data"]["rolling_7_day"].is_number());

    assert!(ws.cache_dir().join("trend_steps.json").exists());
    assert!(!ws.cache_dir().join("trend_heart_rate.json").exists());
}

#[test]
fn test_analyze_single_metric_succeeds() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    ws.cmd()
        .args(["analyze", "--metric", "steps", "--data"])
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("steps"))
        .stdout(predicate::str::contains("increasing"))
        .stdout(predicate::str::contains("heart_rate").not());
}

#[test]
fn test_analyze_rejects_unknown_metric() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    ws.cmd()
        .args(["analyze", "--metric", "mood", "--data"])
        .arg(&export)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown metric 'mood'"));
}

#[test]
fn test_analyze_missing_export() {
    Workspace::new()
        .cmd()
        .args(["analyze", "--data", "nowhere.csv"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to open health export"));
}

#[test]
fn test_analyze_bad_row_is_invalid_input() {
    let ws = Workspace::new();
    let export = ws.write_export("metric,timestamp,value\nsteps,2024-01-01,10\nsteps,soon,11\n");

    ws.cmd()
        .args(["analyze", "--data"])
        .arg(&export)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("line 3"));
}

#[test]
fn test_cache_status_and_clear_after_analyze() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    ws.cmd()
        .args(["analyze", "--metric", "steps", "--data"])
        .arg(&export)
        .assert()
        .success();

    let output = ws
        .cmd()
        .args(["cache", "status", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let entries = stdout_json(&output);
    assert_eq!(entries[0]["metric"], "steps");
    assert!(entries[0]["age_hours"].as_f64().unwrap() < 1.0);

    ws.cmd()
        .args(["cache", "clear", "--metric", "steps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed cached trend for steps"));

    ws.cmd()
        .args(["cache", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached trends"));
}

#[test]
fn test_compare_historical_and_seasonal() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    let output = ws
        .cmd()
        .args([
            "compare",
            "--metric",
            "steps",
            "--seasonal",
            "--location",
            "Melbourne, Australia",
            "--format",
            "json",
            "--data",
        ])
        .arg(&export)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    assert_eq!(report["metric"], "steps");
    assert_eq!(report["lookback_days"], 365);
    assert!(report["historical"]["rolling_7_day"]["mean"].is_number());
    assert!(report["historical"]["rolling_30_day"]["mean"].is_number());
    assert_eq!(report["seasonal"]["comparison_type"], "seasonal");
    assert_eq!(report["seasonal"]["privacy_level"], "local_only");
    assert!(report.get("demographic").is_none());
    assert_eq!(report["demographic_permitted"], false);
}

#[test]
fn test_compare_demographic_needs_consent() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    ws.cmd()
        .args(["compare", "--metric", "steps", "--age", "40", "--data"])
        .arg(&export)
        .assert()
        .success()
        .stdout(predicate::str::contains("not permitted"));

    let output = ws
        .cmd()
        .args([
            "compare",
            "--metric",
            "steps",
            "--age",
            "40",
            "--share-demographics",
            "--format",
            "json",
            "--data",
        ])
        .arg(&export)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    assert_eq!(report["demographic_permitted"], true);
    assert_eq!(report["demographic"]["comparison_type"], "demographic");
    assert_eq!(report["demographic"]["privacy_level"], "anonymized");
}

#[test]
fn test_compare_rejects_bad_arguments() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    ws.cmd()
        .args(["compare", "--metric", "bad metric!", "--data"])
        .arg(&export)
        .assert()
        .code(2);

    ws.cmd()
        .args(["compare", "--metric", "steps", "--date", "31/12/2024", "--data"])
        .arg(&export)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid --date"));

    ws.cmd()
        .args(["compare", "--metric", "steps", "--age", "9", "--share-demographics", "--data"])
        .arg(&export)
        .assert()
        .code(2);
}

#[test]
fn test_compare_without_history_warns() {
    let ws = Workspace::new();
    let export = ws.standard_export();

    ws.cmd()
        .args(["compare", "--metric", "distance", "--data"])
        .arg(&export)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No history for 'distance'"));
}
