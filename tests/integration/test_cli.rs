use assert_cmd::Command;
use predicates::str::{contains, starts_with};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const BIN: &str = "chancery";

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write file");
    path
}

/// Template, fixture, and working directory for one CLI invocation.
/// Running from the temp dir means no chancery.toml is found and the
/// built-in defaults apply.
fn workspace() -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().expect("temp dir");
    let template = write_file(
        dir.path(),
        "template.json",
        &json!({
            "id": "cli-template",
            "rules": [
                {"performerUnits": [42], "signerUsers": ["signer-1"]},
                {"calcPerformerUsers": {"$expr": "|docs, user, units, events| [user.id]"}},
                {
                    "reassignTrigger": {
                        "source": "data.assignee",
                        "calcPerformerUsers": {"$expr": "|ctx| [\"after-1\"]"}
                    }
                }
            ]
        })
        .to_string(),
    );
    let fixture = write_file(
        dir.path(),
        "fixture.json",
        &json!({"user": {"id": "clerk-1"}}).to_string(),
    );
    (dir, template, fixture)
}

fn chancery(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin(BIN).expect("binary should build");
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn version_flag_prints_crate_version() {
    let expected = format!("{BIN} {}", chancery::VERSION);

    Command::cargo_bin(BIN)
        .expect("binary should build")
        .arg("--version")
        .assert()
        .success()
        .stdout(starts_with(expected));
}

#[test]
fn help_output_lists_template_commands() {
    let version_banner = format!("{BIN} {}", chancery::VERSION);

    Command::cargo_bin(BIN)
        .expect("binary should build")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains(version_banner))
        .stdout(contains("TEMPLATE COMMANDS:"))
        .stdout(contains("resolve"))
        .stdout(contains("params"))
        .stdout(contains("reassign"))
        .stdout(contains("lint"));
}

#[test]
fn resolve_prints_the_merged_permission_set() {
    let (dir, template, fixture) = workspace();

    chancery(&dir)
        .arg("resolve")
        .arg(&template)
        .arg(&fixture)
        .assert()
        .success()
        .stdout(contains("\"performerUnits\""))
        .stdout(contains("42"))
        .stdout(contains("clerk-1"))
        .stdout(contains("signer-1"));
}

#[test]
fn resolve_report_adds_descriptor_outcomes() {
    let (dir, template, fixture) = workspace();

    chancery(&dir)
        .arg("resolve")
        .arg(&template)
        .arg(&fixture)
        .arg("--report")
        .assert()
        .success()
        .stdout(contains("\"outcomes\""))
        .stdout(contains("\"applied\": true"))
        .stdout(contains("\"kind\": \"static\""));
}

#[test]
fn params_prints_the_calculated_values() {
    let dir = tempdir().expect("temp dir");
    let template = write_file(
        dir.path(),
        "template.json",
        &json!({
            "id": "params-template",
            "params": {
                "name": {"$expr": "|docs, user, units, events| \"task for \" + user.id"}
            },
            "rules": []
        })
        .to_string(),
    );
    let fixture = write_file(
        dir.path(),
        "fixture.json",
        &json!({"user": {"id": "clerk-2"}}).to_string(),
    );

    chancery(&dir)
        .arg("params")
        .arg(&template)
        .arg(&fixture)
        .assert()
        .success()
        .stdout(contains("task for clerk-2"));
}

#[test]
fn reassign_prints_null_when_no_trigger_matches() {
    let (dir, template, fixture) = workspace();

    chancery(&dir)
        .arg("reassign")
        .arg(&template)
        .arg(&fixture)
        .arg("--path")
        .arg("data.untracked")
        .assert()
        .success()
        .stdout(starts_with("null"));
}

#[test]
fn reassign_prints_the_outcome_with_audit_entry() {
    let (dir, template, fixture) = workspace();
    let previous = write_file(
        dir.path(),
        "previous.json",
        &json!({"performerUsers": ["before-1"]}).to_string(),
    );

    chancery(&dir)
        .arg("reassign")
        .arg(&template)
        .arg(&fixture)
        .arg("--path")
        .arg("data.assignee")
        .arg("--previous")
        .arg(&previous)
        .assert()
        .success()
        .stdout(contains("\"triggerSource\": \"data.assignee\""))
        .stdout(contains("\"activityEntry\""))
        .stdout(contains("after-1"))
        .stdout(contains("before-1"));
}

#[test]
fn lint_reports_errors_and_exits_nonzero() {
    let dir = tempdir().expect("temp dir");
    let template = write_file(
        dir.path(),
        "template.json",
        &json!({
            "id": "stranding-template",
            "rules": [{"reassignTrigger": {"source": "data.state"}}]
        })
        .to_string(),
    );

    chancery(&dir)
        .arg("lint")
        .arg(&template)
        .assert()
        .failure()
        .stdout(contains("TPE-LINT-002"))
        .stdout(contains("1 finding(s) in template stranding-template"))
        .stderr(contains("failed lint with 1 error(s)"));
}

#[test]
fn lint_passes_a_clean_template() {
    let (dir, template, _fixture) = workspace();

    chancery(&dir)
        .arg("lint")
        .arg(&template)
        .assert()
        .success()
        .stdout(contains("template cli-template: no findings"));
}

#[test]
fn lint_json_format_is_machine_readable() {
    let dir = tempdir().expect("temp dir");
    let template = write_file(
        dir.path(),
        "template.json",
        &json!({
            "id": "zero-unit-template",
            "rules": [{"performerUnits": [0, 4]}]
        })
        .to_string(),
    );

    let output = chancery(&dir)
        .arg("lint")
        .arg(&template)
        .arg("--format")
        .arg("json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let findings: serde_json::Value =
        serde_json::from_slice(&output).expect("lint output should be JSON");
    assert_eq!(findings[0]["code"], "TPE-LINT-004");
    assert_eq!(findings[0]["severity"], "warning");
}

#[test]
fn missing_template_file_is_a_clean_error() {
    let (dir, _template, fixture) = workspace();

    chancery(&dir)
        .arg("resolve")
        .arg("does-not-exist.json")
        .arg(&fixture)
        .assert()
        .failure()
        .stderr(contains("does-not-exist.json"));
}
