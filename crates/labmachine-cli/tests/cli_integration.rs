//! CLI subprocess integration tests.
//!
//! These tests run the `labctl` binary against the mock providers, with the
//! mock cloud persisted in a temp dir so state survives between invocations.

use std::path::Path;
use std::process::{Command, Output};

struct Workspace {
    dir: tempfile::TempDir,
    cloud: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            cloud: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn labctl(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_labctl"))
            .args(args)
            .current_dir(self.dir.path())
            .env("LABMACHINE_MOCK_CLOUD", self.cloud.path())
            .env_remove("LABCTL_LOG")
            .output()
            .unwrap()
    }

    fn init(&self) {
        let out = self.labctl(&[
            "init",
            "-p",
            "demo",
            "-C",
            "mock",
            "-D",
            "mock",
            "-l",
            "mock-zone",
            "--dns-id",
            "mock-zone",
        ]);
        assert!(out.status.success(), "init failed: {}", stderr(&out));
    }
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout)
        .unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", stdout(out)))
}

#[test]
fn cli_version_exits_zero() {
    let ws = Workspace::new();
    let out = ws.labctl(&["--version"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("labctl"));
}

#[test]
fn cli_help_lists_commands() {
    let ws = Workspace::new();
    let out = ws.labctl(&["--help"]);
    assert!(out.status.success());
    let text = stdout(&out);
    for cmd in ["init", "up", "fetch", "destroy", "clean", "volumes"] {
        assert!(text.contains(cmd), "help is missing {cmd}");
    }
}

#[test]
fn cli_full_lab_lifecycle() {
    let ws = Workspace::new();
    ws.init();
    assert!(ws.path().join("labmachine.toml").exists());
    assert!(ws.path().join("state.json").exists());

    let out = ws.labctl(&["volumes", "create", "-n", "data", "-S", "20"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let out = ws.labctl(&["up", "--volume", "data", "--poll-interval", "0", "--json"]);
    assert!(out.status.success(), "up failed: {}", stderr(&out));
    let handle = json(&out);
    assert!(handle["url"].as_str().unwrap().ends_with(".lab.example.test"));
    assert!(!handle["token"].as_str().unwrap().is_empty());

    let out = ws.labctl(&["fetch", "--json"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let report = json(&out);
    assert_eq!(report["lab"], "demo");
    assert_eq!(report["instance"]["status"], "running");
    assert_eq!(report["has_drift"], false);

    let out = ws.labctl(&["volumes", "list", "--json"]);
    let volumes = json(&out);
    assert_eq!(volumes[0]["name"], "data");
    assert_eq!(volumes[0]["status"], "attached");

    let out = ws.labctl(&["destroy"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let out = ws.labctl(&["fetch", "--json"]);
    assert!(json(&out)["instance"].is_null());

    let out = ws.labctl(&["volumes", "destroy", "-n", "data", "--yes"]);
    assert!(out.status.success(), "{}", stderr(&out));

    let out = ws.labctl(&["clean", "--yes"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(!ws.path().join("state.json").exists());
    assert!(!ws.path().join("labmachine.toml").exists());
}

#[test]
fn cli_second_init_keeps_existing_state() {
    let ws = Workspace::new();
    ws.init();
    let before = std::fs::read(ws.path().join("state.json")).unwrap();
    let out = ws.labctl(&[
        "init", "-p", "demo", "-C", "mock", "-D", "mock", "--dns-id", "mock-zone",
    ]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).contains("already exists"));
    assert_eq!(std::fs::read(ws.path().join("state.json")).unwrap(), before);
}

#[test]
fn cli_fetch_without_init_is_state_error() {
    let ws = Workspace::new();
    let out = ws.labctl(&["fetch"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("state error"));
}

#[test]
fn cli_unknown_provider_is_provider_error() {
    let ws = Workspace::new();
    let out = ws.labctl(&[
        "init", "-p", "demo", "-C", "nowhere", "-D", "mock", "--dns-id", "mock-zone",
    ]);
    assert_eq!(out.status.code(), Some(3));
    assert!(stderr(&out).contains("nowhere"));
    assert!(!ws.path().join("state.json").exists());
}

#[test]
fn cli_up_twice_is_rejected() {
    let ws = Workspace::new();
    ws.init();
    let out = ws.labctl(&["up", "--poll-interval", "0"]);
    assert!(out.status.success(), "{}", stderr(&out));
    let out = ws.labctl(&["up", "--poll-interval", "0"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("already provisioned"));
}

#[test]
fn cli_up_with_untracked_volume_fails() {
    let ws = Workspace::new();
    ws.init();
    let out = ws.labctl(&["up", "--volume", "missing", "--poll-interval", "0"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("not tracked"));
}

#[test]
fn cli_volume_resize_cannot_shrink() {
    let ws = Workspace::new();
    ws.init();
    ws.labctl(&["volumes", "create", "-n", "data", "-S", "10"]);

    let out = ws.labctl(&["volumes", "resize", "-n", "data", "-S", "5"]);
    assert_eq!(out.status.code(), Some(1));

    let out = ws.labctl(&["volumes", "resize", "-n", "data", "-S", "30", "--json"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(json(&out)["resized"], true);
}

#[test]
fn cli_volume_destroy_requires_yes_without_tty() {
    let ws = Workspace::new();
    ws.init();
    ws.labctl(&["volumes", "create", "-n", "data"]);
    let out = ws.labctl(&["volumes", "destroy", "-n", "data"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("--yes"));
}

#[test]
fn cli_list_providers_json() {
    let ws = Workspace::new();
    let out = ws.labctl(&["list-providers", "--json"]);
    assert!(out.status.success());
    let providers = json(&out);
    let compute: Vec<&str> = providers["compute"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(compute.contains(&"mock"));
    assert!(compute.contains(&"gce"));

    let out = ws.labctl(&["list-providers", "dns", "--json"]);
    let dns_only = json(&out);
    assert!(dns_only.get("compute").is_none());
    assert!(dns_only["dns"].is_array());
}

#[test]
fn cli_list_locations_filters_country() {
    let ws = Workspace::new();
    let out = ws.labctl(&["list-locations", "-C", "mock"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("mock-zone"));

    let out = ws.labctl(&["list-locations", "-C", "mock", "-c", "XX", "--json"]);
    assert_eq!(json(&out), serde_json::json!([]));
}

#[test]
fn cli_list_dns_zones() {
    let ws = Workspace::new();
    let out = ws.labctl(&["list-dns", "-D", "mock", "--json"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(json(&out)[0]["id"], "mock-zone");
}

#[test]
fn cli_completions_bash() {
    let ws = Workspace::new();
    let out = ws.labctl(&["completions", "bash"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("labctl"));
}
