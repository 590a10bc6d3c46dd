#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn ring_file(dir: &TempDir, n: u64) -> PathBuf {
    let path = dir.path().join("ring.el");
    let body: String = (0..n).map(|i| format!("{} {}\n", i, (i + 1) % n)).collect();
    fs::write(&path, body).expect("write ring");
    path
}

#[test]
fn build_prints_json_report() {
    let dir = TempDir::new().expect("tempdir");
    let input = ring_file(&dir, 40);
    let output = cargo_bin_cmd!("shardgraph")
        .args(["--output", "json", "build", "--num-vertices", "40", "--hosts", "3"])
        .arg(&input)
        .env("XDG_CONFIG_HOME", dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["num_hosts"], 3);
    assert_eq!(json["hosts"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["ingest"]["edges"], 40);
    let masters: u64 = json["hosts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["masters"].as_u64().unwrap())
        .sum();
    assert_eq!(masters, 40);
    assert!(json["timings"]["total_ms"].is_number());
    assert!(json.get("worker_tables").is_none());
}

#[test]
fn build_prints_text_report() {
    let dir = TempDir::new().expect("tempdir");
    let input = ring_file(&dir, 10);
    let output = cargo_bin_cmd!("shardgraph")
        .args(["build", "--num-vertices", "10", "--hosts", "2", "--scale-factor", "2"])
        .arg(&input)
        .env("XDG_CONFIG_HOME", dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("hosts=2 virtual_hosts=4"));
    assert!(text.contains("host0 masters="));
    assert!(text.contains("host1 masters="));
    assert!(text.contains("Timings (ms):"));
}

#[test]
fn config_file_supplies_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let input = ring_file(&dir, 12);
    let config = dir.path().join("options.toml");
    fs::write(&config, "num_hosts = 4\nscale_factor = 1\n").expect("write config");
    let output = cargo_bin_cmd!("shardgraph")
        .args(["--output", "json", "--config"])
        .arg(&config)
        .args(["build", "--num-vertices", "12"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["num_hosts"], 4);
    assert_eq!(json["num_virtual_hosts"], 4);
}

#[test]
fn edge_lists_need_a_vertex_count() {
    let dir = TempDir::new().expect("tempdir");
    let input = ring_file(&dir, 4);
    let assert = cargo_bin_cmd!("shardgraph")
        .args(["build"])
        .arg(&input)
        .env("XDG_CONFIG_HOME", dir.path())
        .assert()
        .failure();
    assert!(stderr_of(&assert).contains("--num-vertices"));
}

#[test]
fn bad_wmd_records_fail_unless_skipped() {
    let dir = TempDir::new().expect("tempdir");
    let input = dir.path().join("data.csv");
    fs::write(&input, "Person,1,,,,,,,,\nMystery,,,,,,,,,\nPerson,2,,,,,,,,\n").expect("write");

    let assert = cargo_bin_cmd!("shardgraph")
        .args(["build", "--format", "wmd"])
        .arg(&input)
        .env("XDG_CONFIG_HOME", dir.path())
        .assert()
        .failure();
    assert!(stderr_of(&assert).contains("unrecognized record type"));

    let output = cargo_bin_cmd!("shardgraph")
        .args(["--output", "json", "build", "--format", "wmd", "--skip-bad-records"])
        .arg(&input)
        .env("XDG_CONFIG_HOME", dir.path())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["ingest"]["rejected"], 1);
    assert_eq!(json["ingest"]["vertices"], 2);
}

fn stderr_of(assert: &Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stderr).into_owned()
}
