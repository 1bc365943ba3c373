#![cfg(all(unix, feature = "cli"))]

use std::process::Command;

fn releasechan() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_releasechan"));
    cmd.env_remove("RELEASECHAN_SOCKET_BUFFER")
        .arg("--log-level")
        .arg("error");
    cmd
}

#[test]
fn probe_json_reports_every_release_in_order() {
    let output = releasechan()
        .args(["--format", "json", "probe", "--count", "4", "--interval", "0ms"])
        .args(["--fence", "--max-acquired", "2"])
        .output()
        .expect("probe command should run");

    assert!(
        output.status.success(),
        "probe failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout should be UTF-8");
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect();
    assert_eq!(lines.len(), 4);

    for (seq, line) in lines.iter().enumerate() {
        assert_eq!(line["seq"], seq);
        assert_eq!(line["buffer_id"], seq as i64);
        assert_eq!(line["frame_number"], seq as u64 + 1);
        assert_eq!(line["max_acquired_buffer_count"], 2);
        assert_eq!(line["has_fence"], true);
    }
}

#[test]
fn probe_raw_emits_wire_frames() {
    let output = releasechan()
        .args(["--format", "raw", "probe", "--count", "2", "--interval", "0"])
        .output()
        .expect("probe command should run");

    assert!(output.status.success());
    assert_eq!(output.stdout.len(), 2 * 24);
    assert_eq!(&output.stdout[..4], &0u32.to_ne_bytes());
    assert_eq!(&output.stdout[24 + 4..24 + 8], &1u32.to_ne_bytes());
}

#[test]
fn bench_json_reports_latency_summary() {
    let output = releasechan()
        .args(["--format", "json", "bench", "--count", "50"])
        .output()
        .expect("bench command should run");

    assert!(output.status.success());
    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("bench output should be JSON");
    assert_eq!(summary["count"], 50);
    let min = summary["min_us"].as_f64().expect("min_us should be a number");
    let max = summary["max_us"].as_f64().expect("max_us should be a number");
    assert!(min <= max);
}

#[test]
fn doctor_json_passes_locally() {
    let output = releasechan()
        .args(["--format", "json", "doctor"])
        .output()
        .expect("doctor command should run");

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("doctor output should be JSON");
    assert_eq!(report["overall"], "pass");
}

#[test]
fn invalid_interval_is_usage_error() {
    let output = releasechan()
        .args(["probe", "--interval", "soon"])
        .output()
        .expect("probe command should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn oversized_socket_buffer_is_transport_error() {
    let output = releasechan()
        .args(["probe", "--socket-buffer", "99999999999"])
        .output()
        .expect("probe command should run");

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn version_prints_package_version() {
    let output = releasechan()
        .arg("version")
        .output()
        .expect("version command should run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(&format!("releasechan {}", env!("CARGO_PKG_VERSION"))));
}
