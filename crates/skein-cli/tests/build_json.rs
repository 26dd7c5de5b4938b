//! Integration tests for `skein build --json` output.
//!
//! These tests verify:
//! - JSON output is always valid JSON
//! - Schema version is present
//! - `ok` boolean is present
//! - Error codes are SCREAMING_SNAKE_CASE
//! - Output files land in the configured directory

use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "skein-cli", "--bin", "skein", "--"]);
    cmd
}

fn write_project(dir: &std::path::Path) {
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(
        dir.join("src/index.js"),
        "import './util.js';\nconsole.log('hello');\n",
    )
    .unwrap();
    std::fs::write(dir.join("src/util.js"), "export const util = 1;\n").unwrap();
}

#[test]
fn test_build_json_success_shape() {
    let dir = tempdir().unwrap();
    write_project(dir.path());

    let output = cargo_bin()
        .args(["build", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("failed to run build command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("output should be valid JSON");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(json["ok"], true);
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["modules"], 2);
    assert!(json["issues"].as_array().unwrap().is_empty());

    let outputs: Vec<&str> = json["outputs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(outputs.contains(&"index.js"));
    assert!(outputs.contains(&"index.html"));

    // Outputs actually hit the disk.
    assert!(dir.path().join("build/index.js").exists());
    assert!(dir.path().join("build/index.html").exists());
}

#[test]
fn test_build_json_missing_import_fails_with_code() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/index.js"), "import './nope.js';\n").unwrap();

    let output = cargo_bin()
        .args(["build", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("failed to run build command");

    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("output should be valid JSON");

    assert_eq!(json["ok"], false);
    let issues = json["issues"].as_array().unwrap();
    assert_eq!(issues.len(), 1);

    let code = issues[0]["code"].as_str().unwrap();
    assert_eq!(code, "RESOLVE_NOT_FOUND");
    assert!(
        code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
        "code should be SCREAMING_SNAKE_CASE: {code}"
    );
    assert!(issues[0]["message"].as_str().unwrap().contains("./nope.js"));
}

#[test]
fn test_build_respects_config_file() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("app")).unwrap();
    std::fs::write(dir.path().join("app/main.js"), "console.log('custom');\n").unwrap();
    std::fs::write(
        dir.path().join("skein.config.json"),
        r#"{ "entry": { "app": "app/main.js" }, "outputDir": "dist" }"#,
    )
    .unwrap();

    let output = cargo_bin()
        .args(["build", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("failed to run build command");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(dir.path().join("dist/app.js").exists());

    let html = std::fs::read_to_string(dir.path().join("dist/index.html")).unwrap();
    assert!(html.contains("<script src=\"/app.js\">"));
}
