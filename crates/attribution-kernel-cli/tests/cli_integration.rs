use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_ak<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_ak"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute ak binary: {err}"))
}

fn parse_stdout(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_ak(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "ak command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }
    parse_stdout(&output)
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn write_json(path: &Path, value: &Value) {
    let body = serde_json::to_string_pretty(value)
        .unwrap_or_else(|err| panic!("fixture should serialize: {err}"));
    fs::write(path, body)
        .unwrap_or_else(|err| panic!("failed to write JSON file {}: {err}", path.display()));
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn fixture_input() -> Value {
    json!({
        "resources": {
            "parent": {
                "child": 1,
                "node_modules": {
                    "pkg": {"index.js": 1}
                }
            },
            "archive.zip": {"inner.js": 1}
        },
        "manualAttributions": {
            "attributions": {
                "uuid1": {"packageName": "React", "packageVersion": "18.0.0"},
                "uuid2": {"packageName": "React", "packageVersion": "18.0.0"}
            },
            "resourcesToAttributions": {
                "/parent/": ["uuid1"],
                "/archive.zip/": ["uuid2"]
            }
        },
        "externalAttributions": {
            "attributions": {
                "ext1": {"packageName": "Vue", "originIds": ["origin-1"]}
            },
            "resourcesToAttributions": {
                "/parent/child": ["ext1"]
            }
        },
        "attributionBreakpoints": ["/parent/node_modules/"],
        "filesWithChildren": ["/archive.zip/"]
    })
}

// Test IDs: TCLI-001
#[test]
fn summary_reports_counts_and_contract_version() {
    let sandbox = unique_temp_dir("attribution-kernel-cli-summary");
    let input = sandbox.join("input.json");
    write_json(&input, &fixture_input());

    let summary = run_json(["summary", "--input", path_str(&input)]);

    assert_eq!(as_str(&summary, "contract_version"), "cli.v1");
    assert_eq!(as_u64(&summary, "manual_attributions"), 2);
    assert_eq!(as_u64(&summary, "external_attributions"), 1);
    assert_eq!(as_u64(&summary, "links"), 2);
    assert_eq!(as_u64(&summary, "attribution_breakpoints"), 1);
    assert!(as_str(&summary, "snapshot_id").starts_with("snap_"));
    assert_eq!(summary.get("has_unsaved_changes"), Some(&Value::Bool(false)));

    let again = run_json(["summary", "--input", path_str(&input)]);
    assert_eq!(as_str(&again, "snapshot_id"), as_str(&summary, "snapshot_id"));
}

// Test IDs: TCLI-002
#[test]
fn check_accepts_consistent_input_and_rejects_bad_links() {
    let sandbox = unique_temp_dir("attribution-kernel-cli-check");
    let input = sandbox.join("input.json");
    write_json(&input, &fixture_input());

    let report = run_json(["check", "--input", path_str(&input)]);
    assert_eq!(report.get("consistent"), Some(&Value::Bool(true)));

    let mut broken = fixture_input();
    broken["manualAttributions"]["resourcesToAttributions"]["/parent/child"] = json!(["missing"]);
    let broken_input = sandbox.join("broken.json");
    write_json(&broken_input, &broken);

    let output = run_ak(["check", "--input", path_str(&broken_input)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing"), "stderr should name the unknown id:\n{stderr}");
}

// Test IDs: TCLI-003
#[test]
fn apply_runs_a_script_and_writes_the_save_file() {
    let sandbox = unique_temp_dir("attribution-kernel-cli-apply");
    let input = sandbox.join("input.json");
    let commands = sandbox.join("commands.json");
    let output = sandbox.join("output.json");
    write_json(&input, &fixture_input());
    write_json(
        &commands,
        &json!([
            {"command": "link", "resource_path": "/parent/child", "attribution_id": "uuid1"},
            {
                "command": "create",
                "resource_path": "/parent/node_modules/pkg/",
                "package_info": {"packageName": "left-pad"}
            },
            {"command": "resolve", "attribution_ids": ["ext1"]}
        ]),
    );

    let result = run_json([
        "apply",
        "--input",
        path_str(&input),
        "--commands",
        path_str(&commands),
        "--output",
        path_str(&output),
        "--verify",
    ]);

    let outcomes = result
        .get("outcomes")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing outcomes in payload: {result}"));
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[1].get("created_attribution_id").and_then(Value::as_str).is_some());
    let summary = result.get("summary").unwrap_or_else(|| panic!("missing summary: {result}"));
    assert_eq!(summary.get("has_unsaved_changes"), Some(&Value::Bool(false)));

    let saved = read_json_file(&output);
    assert_eq!(saved["metadata"]["contractVersion"], "api.v1");
    assert_eq!(saved["resolvedExternalAttributions"], json!(["ext1"]));
    assert_eq!(saved["resourcesToAttributions"]["/parent/"], json!(["uuid1"]));
    assert!(saved["resourcesToAttributions"].get("/parent/child").is_none());
    assert_eq!(saved["manualAttributions"].as_object().map(serde_json::Map::len), Some(3));
}

// Test IDs: TCLI-004
#[test]
fn apply_without_output_prints_the_save_payload_and_fails_atomically() {
    let sandbox = unique_temp_dir("attribution-kernel-cli-apply-stdout");
    let input = sandbox.join("input.json");
    let commands = sandbox.join("commands.json");
    write_json(&input, &fixture_input());
    write_json(
        &commands,
        &json!([{"command": "delete", "attribution_id": "uuid2"}]),
    );

    let result = run_json([
        "apply",
        "--input",
        path_str(&input),
        "--commands",
        path_str(&commands),
    ]);
    let payload = result.get("output_file").unwrap_or_else(|| panic!("missing output_file: {result}"));
    assert!(payload["resourcesToAttributions"].get("/archive.zip/").is_none());

    let failing = sandbox.join("failing.json");
    write_json(
        &failing,
        &json!([
            {"command": "delete", "attribution_id": "uuid2"},
            {"command": "update", "attribution_id": "nope", "package_info": {}}
        ]),
    );
    let output = run_ak([
        "apply",
        "--input",
        path_str(&input),
        "--commands",
        path_str(&failing),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("command #1 (update)"), "stderr should name the failing command:\n{stderr}");
}

// Test IDs: TCLI-005
#[test]
fn resource_reports_parent_attributions_and_flags() {
    let sandbox = unique_temp_dir("attribution-kernel-cli-resource");
    let input = sandbox.join("input.json");
    write_json(&input, &fixture_input());

    let child = run_json(["resource", "--input", path_str(&input), "--path", "/parent/child"]);
    assert_eq!(as_str(&child, "contract_version"), "cli.v1");
    assert_eq!(as_str(&child, "closestParent"), "/parent/");
    assert_eq!(child["externalAttributions"][0]["packageName"], "Vue");

    let blocked = run_json([
        "resource",
        "--input",
        path_str(&input),
        "--path",
        "/parent/node_modules/pkg/index.js",
    ]);
    assert_eq!(blocked.get("closestParent"), Some(&Value::Null));

    let archive = run_json(["resource", "--input", path_str(&input), "--path", "/archive.zip/"]);
    assert_eq!(archive.get("isFileWithChildren"), Some(&Value::Bool(true)));
    assert_eq!(archive["manualAttributions"][0]["packageName"], "React");

    let output = run_ak(["resource", "--input", path_str(&input), "--path", "/nope"]);
    assert!(!output.status.success());
}
