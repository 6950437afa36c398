#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Output};

pub fn acc_trend_bin() -> &'static str {
    env!("CARGO_BIN_EXE_acc-trend")
}

/// Address nothing listens on.
pub fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{port}")
}

/// Write the three configuration tables for one device and one step.
pub fn write_config(dir: &Path) {
    std::fs::write(
        dir.join("buildkite-devs.json"),
        r#"[["GPU1", "host1", "gpu-node-1"]]"#,
    )
    .expect("write devices");
    std::fs::write(dir.join("buildkite-metric.json"), r#"{"GPU1": [0, 100]}"#)
        .expect("write metrics");
    std::fs::write(dir.join("buildkite-steps.json"), r#"{"OpenCL DBCSR fp64": {}}"#)
        .expect("write steps");
}

/// Write a cache for the default focus with builds 7 and 8 of GPU1.
pub fn write_cache(dir: &Path) {
    std::fs::write(dir.join("buildkite-23x23x23.last"), "8\n").expect("write watermark");
    std::fs::write(
        dir.join("buildkite-23x23x23.json"),
        r#"{"OpenCL DBCSR fp64": {"GPU1": [
            [[50.0, 1], [120.0, 1], [80.0, 1], 120.0, 7],
            [[50.0, 1], [120.0, 1], [80.0, 1], 120.0, 8]
        ]}}"#,
    )
    .expect("write series");
}

/// Run acc-trend in `dir` without inheriting provider credentials.
pub fn run_in(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(acc_trend_bin());
    cmd.current_dir(dir);
    cmd.env_remove("ACC_TREND_URL");
    cmd.env_remove("ACC_TREND_TOKEN");
    for arg in args {
        cmd.arg(arg);
    }
    cmd.output().expect("run acc-trend")
}

pub fn assert_ok(output: &Output, context: &str) {
    assert!(
        output.status.success(),
        "{context} failed (status {:?})\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn stdout_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
