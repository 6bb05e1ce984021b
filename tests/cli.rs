use std::fs;
use std::process::Command;

use tempfile::tempdir;

#[test]
fn cli_writes_a_config_simulates_and_fits_margins() {
    let tmp = tempdir().expect("temporary directory");
    let exe = env!("CARGO_BIN_EXE_copula-risk");

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["init-config", "study.toml"])
        .status()
        .expect("run copula-risk init-config");
    assert!(status.success(), "init-config exited with status {status:?}");
    assert!(tmp.path().join("study.toml").exists(), "study.toml missing");

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "simulate",
            "--config",
            "study.toml",
            "--copula",
            "clayton",
            "--n",
            "300",
            "--out",
            "data.csv",
        ])
        .status()
        .expect("run copula-risk simulate");
    assert!(status.success(), "simulate exited with status {status:?}");
    let csv = fs::read_to_string(tmp.path().join("data.csv")).expect("read dataset");
    assert!(csv.starts_with("closure_time,cause\n"));
    assert_eq!(csv.lines().count(), 301);

    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit-margins", "--dataset", "data.csv"])
        .output()
        .expect("run copula-risk fit-margins");
    assert!(output.status.success(), "fit-margins failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Cause 1"), "{stdout}");
    assert!(stdout.contains("Cause 2"), "{stdout}");
}

#[test]
fn cli_reports_invalid_parameters_and_exits_with_failure() {
    let tmp = tempdir().expect("temporary directory");
    let output = Command::new(env!("CARGO_BIN_EXE_copula-risk"))
        .current_dir(tmp.path())
        .args(["simulate", "--copula", "clayton", "--theta", "-1", "--n", "10"])
        .output()
        .expect("run copula-risk simulate");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "{stderr}");
    assert!(!tmp.path().join("dataset.csv").exists());
}
