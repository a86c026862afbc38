//! Batch-mode runs of the `quarry` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ROOT_CONFIG: &str = r#"{
    "archs": { "x64": { "suffix": "64", "bitness": "64" } },
    "configs": { "Debug": {}, "Release": {} }
}"#;

struct Sandbox {
    root: TempDir,
    payload: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("quarry.json"), ROOT_CONFIG).unwrap();
        std::fs::create_dir_all(root.path().join("modules")).unwrap();
        let payload = TempDir::new().unwrap();
        std::fs::write(payload.path().join("COPYING"), "GPL").unwrap();
        std::fs::write(payload.path().join("data.txt"), "payload").unwrap();
        Self { root, payload }
    }

    fn module(&self, name: &str, deps: &[&str]) {
        let deps: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
        let body = format!(
            r#"{{
                "type": "prebuilt",
                "dependencies": [{}],
                "source": {{ "type": "copy", "path": "{}" }}
            }}"#,
            deps.join(", "),
            self.payload.path().display()
        );
        std::fs::write(self.root.path().join(format!("modules/{name}.json")), body).unwrap();
    }

    fn quarry(&self) -> Command {
        let mut cmd = Command::cargo_bin("quarry").unwrap();
        cmd.arg("--root").arg(self.root.path()).arg("--platform").arg("testplat");
        cmd
    }
}

#[test]
fn batch_runs_all_stages_for_every_match() {
    let sandbox = Sandbox::new();
    sandbox.module("liba", &[]);
    sandbox.module("libb", &[]);
    sandbox.module("tool", &[]);

    let assert = sandbox.quarry().args(["batch", "lib*"]).assert().success();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("- project: liba"));
    assert!(stderr.contains("- project: libb"));
    assert!(!stderr.contains("- project: tool"));
    for stage in ["import liba", "configure liba", "build liba"] {
        assert!(stderr.contains(&format!("--- {stage}: ok")), "missing banner for {stage}");
    }

    let root = sandbox.root.path();
    for name in ["liba", "libb"] {
        assert!(root.join(format!("flags/{name}-built-testplat-x64")).is_file());
    }
    assert!(!root.join("flags/tool-imported").exists());
}

#[test]
fn batch_pulls_in_dependencies_of_selected_projects() {
    let sandbox = Sandbox::new();
    sandbox.module("base", &[]);
    sandbox.module("libapp", &["base"]);

    let assert = sandbox.quarry().args(["batch", "lib*"]).assert().success();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    // the dependency runs first, marked as dependency-only
    assert!(stderr.contains("- project: base (dep)"));
    let base_pos = stderr.find("- project: base").unwrap();
    let app_pos = stderr.find("- project: libapp").unwrap();
    assert!(base_pos < app_pos);

    assert!(sandbox.root.path().join("flags/base-built-testplat-x64").is_file());
}

#[test]
fn batch_reports_failures_but_finishes_the_rest() {
    let sandbox = Sandbox::new();
    sandbox.module("good", &[]);
    // no license anywhere and not local: the import stage fails
    let bare = TempDir::new().unwrap();
    std::fs::write(bare.path().join("data.txt"), "x").unwrap();
    std::fs::write(
        sandbox.root.path().join("modules/broken.json"),
        format!(
            r#"{{"type": "prebuilt", "source": {{ "type": "copy", "path": "{}" }}}}"#,
            bare.path().display()
        ),
    )
    .unwrap();

    let assert = sandbox.quarry().args(["batch", "*"]).assert().failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("--- import broken: failed"));
    assert!(stderr.contains("--- build good: ok"));

    let root = sandbox.root.path();
    assert!(root.join("flags/good-built-testplat-x64").is_file());
    assert!(!root.join("flags/broken-imported").exists());
}

#[test]
fn batch_without_matches_fails() {
    let sandbox = Sandbox::new();
    sandbox
        .quarry()
        .args(["batch", "nothing*"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no projects match"));
}
