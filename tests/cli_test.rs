use httpmock::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

const CHECK_UUID: &str = "0b7a2d40-6f3e-4c59-8d21-93a1c4e5f607";

// A stand-in for borg: records its arguments, reports the repository on
// stderr, lists one changed file for `create` and exits with $FAKE_RC.
const FAKE_BORG: &str = r#"#!/bin/sh
echo "$@" >> "$FAKE_BORG_CALLS"
echo "repo=$BORG_REPO" >&2
case "$1" in
  create) echo "A $FAKE_CHANGED" >&2 ;;
  list) echo "host-2026-10-19T02:00:00  Mon, 2026-10-19 02:00:00 [0123abcd]" ;;
esac
exit ${FAKE_RC:-0}
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self::with_settings("")
    }

    fn with_settings(extra: &str) -> Self {
        let dir = tempdir().expect("Failed to create temp config directory");
        let script = dir.path().join("fake-borg");
        fs::write(&script, FAKE_BORG).expect("Failed to write fake borg");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake borg executable");

        fs::write(dir.path().join("roots.lst"), "/srv/data\n").expect("Failed to write roots");
        fs::write(dir.path().join("changed.txt"), "0123456789").expect("Failed to write file");

        let settings = format!(
            "[borg]\nbinary = \"{}\"\n\n[healthchecks]\nretries = 1\ntimeout_seconds = 5\n{}",
            script.display(),
            extra
        );
        fs::write(dir.path().join("borgpilot.toml"), settings).expect("Failed to write settings");

        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn logs(&self) -> PathBuf {
        self.path().join("logs")
    }

    fn calls(&self) -> String {
        fs::read_to_string(self.path().join("calls")).unwrap_or_default()
    }

    // Run the CLI with an isolated environment and capture output
    fn run(&self, args: &[&str], env_vars: &[(&str, &str)]) -> (i32, String) {
        let mut command = Command::new(env!("CARGO_BIN_EXE_borgpilot"));
        command
            .args(args)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("BORG_CONFIG_DIR", self.path())
            .env("BORG_REPO", "ssh://backup@nas/./remote")
            .env("BORG_LOCAL_REPO", self.path().join("local-repo"))
            .env("FAKE_BORG_CALLS", self.path().join("calls"))
            .env("FAKE_CHANGED", self.path().join("changed.txt"));

        for (key, value) in env_vars {
            command.env(key, value);
        }

        let output = command.output().expect("Failed to execute borgpilot");
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let output_text = format!("{}\n{}", stdout, stderr);

        (output.status.code().unwrap_or(-1), output_text)
    }
}

// Test the help command
#[test]
fn test_help_command() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["--help"], &[]);
    assert_eq!(code, 0, "Help command failed: {}", output);
    assert!(output.contains("borgpilot"), "Help output doesn't name the tool");
    for sub in ["create", "prune", "check", "compact", "list", "log"] {
        assert!(output.contains(sub), "Help output missing {}", sub);
    }
}

#[test]
fn test_create_writes_rotated_log_with_changes() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["create"], &[]);
    assert_eq!(code, 0, "create failed: {}", output);

    let latest = fs::read_to_string(fixture.logs().join("create-latest.log"))
        .expect("create-latest.log should exist");
    assert!(latest.contains("repo=ssh://backup@nas/./remote"));
    assert!(latest.contains("# changes: 1 added, 0 modified"));
    assert!(latest.contains("total 10B"));
    assert!(latest.contains("# finished rc=0 (success)"));
    assert!(!fixture.logs().join("create.log").exists());
    assert!(!fixture.path().join("borgpilot.lock").exists());

    let calls = fixture.calls();
    assert!(calls.starts_with("create --info --list --filter=AME --show-rc --stats"));
    assert!(calls.trim_end().ends_with("/srv/data"));
}

#[test]
fn test_warning_exit_is_tolerated() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["prune"], &[("FAKE_RC", "1")]);
    assert_eq!(code, 0, "prune warning should not fail: {}", output);
    assert!(output.contains("warnings"), "warning not reported: {}", output);

    let latest = fs::read_to_string(fixture.logs().join("prune-latest.log")).unwrap();
    assert!(latest.contains("# finished rc=1 (warning rc=1)"));
}

#[test]
fn test_error_exit_propagates() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["check"], &[("FAKE_RC", "2")]);
    assert_eq!(code, 2, "check error should propagate: {}", output);
}

#[test]
fn test_local_flag_selects_local_repo_and_log() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["compact", "--local"], &[]);
    assert_eq!(code, 0, "compact --local failed: {}", output);

    let latest = fs::read_to_string(fixture.logs().join("compact-local-latest.log"))
        .expect("compact-local-latest.log should exist");
    let local_repo = fixture.path().join("local-repo");
    assert!(latest.contains(&format!("repo={}", local_repo.display())));
    assert!(!fixture.logs().join("compact-latest.log").exists());
}

#[test]
fn test_missing_repository_is_reported() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["create"], &[("BORG_REPO", "")]);
    assert_eq!(code, 2);
    assert!(output.contains("BORG_REPO is not set"), "unexpected output: {}", output);
    assert!(fixture.calls().is_empty());
}

#[test]
fn test_dry_run_prints_compact_without_running_borg() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["--dry-run", "compact"], &[]);
    assert_eq!(code, 0, "dry-run compact failed: {}", output);
    assert!(output.contains("compact --info --show-rc"));
    assert!(fixture.calls().is_empty());
}

#[test]
fn test_dry_run_create_uses_dry_run_log() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["create", "--dry-run"], &[]);
    assert_eq!(code, 0, "dry-run create failed: {}", output);
    assert!(fixture.calls().contains("--dry-run"));
    assert!(fixture.logs().join("create-dry-run-latest.log").exists());
    assert!(!fixture.logs().join("create-latest.log").exists());
}

#[test]
fn test_list_prints_archives() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["list"], &[]);
    assert_eq!(code, 0, "list failed: {}", output);
    assert!(output.contains("host-2026-10-19T02:00:00"));
}

#[test]
fn test_log_command_shows_latest_log() {
    let fixture = Fixture::new();
    let (code, output) = fixture.run(&["log"], &[]);
    assert_eq!(code, 0, "log without history failed: {}", output);
    assert!(output.contains("No create log"));

    fixture.run(&["create"], &[]);
    let (code, output) = fixture.run(&["log", "create"], &[]);
    assert_eq!(code, 0, "log failed: {}", output);
    assert!(output.contains("==> "));
    assert!(output.contains("# borgpilot create started"));
}

#[test]
fn test_required_mount_is_checked() {
    let fixture = Fixture::new();
    let unmounted = fixture.path().join("mnt");
    fs::create_dir(&unmounted).unwrap();

    let (code, output) = fixture.run(&["create"], &[("BORG_MNT_REQD", unmounted.to_str().unwrap())]);
    assert_eq!(code, 2);
    assert!(output.contains("not mounted"), "unexpected output: {}", output);
    assert!(fixture.calls().is_empty());
}

#[test]
fn test_healthcheck_pings_start_and_result() {
    let server = MockServer::start();
    let start = server.mock(|when, then| {
        when.method(POST)
            .path(format!("/{}/start", CHECK_UUID))
            .query_param_exists("rid");
        then.status(200).body("OK");
    });
    let result = server.mock(|when, then| {
        when.method(POST)
            .path(format!("/{}/0", CHECK_UUID))
            .query_param_exists("rid")
            .body_contains("# changes: 1 added");
        then.status(200).body("OK");
    });

    let fixture = Fixture::with_settings(&format!("base_url = \"{}\"\n", server.base_url()));
    fs::write(fixture.path().join("healthchecks.uuid"), CHECK_UUID).unwrap();

    let (code, output) = fixture.run(&["create"], &[("FAKE_RC", "1")]);
    assert_eq!(code, 0, "create failed: {}", output);

    start.assert();
    result.assert();
}

#[test]
fn test_failed_run_pings_exit_code() {
    let server = MockServer::start();
    let failure = server.mock(|when, then| {
        when.method(POST).path(format!("/{}/2", CHECK_UUID));
        then.status(200).body("OK");
    });
    let start = server.mock(|when, then| {
        when.method(POST).path(format!("/{}/start", CHECK_UUID));
        then.status(200).body("OK");
    });

    let fixture = Fixture::with_settings(&format!("base_url = \"{}\"\n", server.base_url()));
    fs::write(fixture.path().join("healthchecks.uuid"), CHECK_UUID).unwrap();

    let (code, _) = fixture.run(&["prune"], &[("FAKE_RC", "2")]);
    assert_eq!(code, 2);
    start.assert();
    failure.assert();

    // dry runs never ping
    fixture.run(&["prune", "--dry-run"], &[]);
    start.assert_hits(1);
}
