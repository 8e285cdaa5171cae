//! CLI end-to-end tests
//!
//! Tests for the streamvio command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the streamvio binary
#[allow(deprecated)]
fn streamvio_cmd() -> Command {
    Command::cargo_bin("streamvio").unwrap()
}

/// Write a config that keeps all state under `dir`.
fn write_config(dir: &Path, native: Option<&Path>) -> std::path::PathBuf {
    let mut config = serde_json::json!({
        "storage": {
            "output_dir": dir.join("out"),
            "db_path": dir.join("db/streamvio.db"),
        },
        "transcode": { "progress_interval_secs": 2 }
    });
    if let Some(native) = native {
        config["tools"] = serde_json::json!({ "native_transcoder_path": native });
    }
    let path = dir.join("config.json");
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = streamvio_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = streamvio_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("streamvio"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = streamvio_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_profiles_lists_catalog() {
    let mut cmd = streamvio_cmd();
    cmd.arg("profiles").assert().success().stdout(
        predicate::str::contains("mobile-low")
            .and(predicate::str::contains("standard"))
            .and(predicate::str::contains("3840x2160")),
    );
}

#[test]
fn test_cli_select_profile() {
    let mut cmd = streamvio_cmd();
    cmd.args(["select-profile", "--mobile", "--connection", "3g", "--bandwidth", "800"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("mobile-low"));

    let mut cmd = streamvio_cmd();
    cmd.args(["select-profile", "--connection", "ethernet", "--bandwidth", "20000"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ultra"));
}

#[test]
fn test_cli_select_profile_rejects_unknown_connection() {
    let mut cmd = streamvio_cmd();
    cmd.args(["select-profile", "--connection", "carrier-pigeon"])
        .assert()
        .failure();
}

#[test]
fn test_cli_check_tools_command() {
    let mut cmd = streamvio_cmd();
    cmd.arg("check-tools").assert().success().stdout(
        predicate::str::contains("ffmpeg").and(predicate::str::contains("streamvio-transcoder")),
    );
}

#[test]
fn test_cli_validate_reports_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"transcode": {"max_concurrent_jobs": 0}}"#).unwrap();

    let mut cmd = streamvio_cmd();
    cmd.arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("max_concurrent_jobs is 0"));
}

#[test]
fn test_cli_validate_rejects_malformed_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ not json").unwrap();

    let mut cmd = streamvio_cmd();
    cmd.arg("validate").arg(&path).assert().failure();
}

#[test]
fn test_cli_status_of_unknown_job() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), None);

    let mut cmd = streamvio_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["status", "00000000-0000-4000-8000-000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_cli_transcode_missing_input_fails() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), None);

    let mut cmd = streamvio_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["transcode", "/nonexistent/movie.mkv"])
        .assert()
        .failure();
}

#[cfg(unix)]
#[test]
fn test_cli_transcode_with_native_backend() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let native = dir.path().join("streamvio-transcoder");
    fs::write(
        &native,
        "#!/bin/sh\ncase \"$1\" in\n  transcode) printf encoded > \"$3\" ;;\n  *) exit 1 ;;\nesac\n",
    )
    .unwrap();
    fs::set_permissions(&native, fs::Permissions::from_mode(0o755)).unwrap();
    let config = write_config(dir.path(), Some(&native));

    let input = dir.path().join("movie.mkv");
    fs::write(&input, b"source").unwrap();

    let mut cmd = streamvio_cmd();
    let output = cmd
        .arg("--config")
        .arg(&config)
        .args(["transcode", "--profile", "mobile-high"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    assert!(dir.path().join("out/movie_mobile-high.mp4").is_file());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let job_id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("Job "))
        .and_then(|l| l.split_whitespace().next())
        .unwrap()
        .to_string();

    let mut cmd = streamvio_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["status", &job_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: completed"))
        .stdout(predicate::str::contains("Progress: 100%"));
}
