//! Integration tests for `shipyard build --json` output.

use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn shipyard() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shipyard"));
    cmd.env_remove("SHIPYARD_MODE").env_remove("RUST_LOG");
    cmd
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn build_json(root: &Path, extra: &[&str]) -> (bool, serde_json::Value) {
    let output = shipyard()
        .args(["build", "--json", "--cwd"])
        .arg(root)
        .args(extra)
        .output()
        .expect("Failed to run build command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(stdout.trim()).expect("Output should be valid JSON");
    (output.status.success(), json)
}

#[test]
fn test_build_json_reports_chunks() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.js", "import msg from './msg';\nconsole.log(msg);\n");
    write(dir.path(), "src/msg.js", "export default 'hello';\n");

    let (success, json) = build_json(dir.path(), &["--mode", "development"]);
    assert!(success);
    assert_eq!(json["ok"], true);
    assert_eq!(json["mode"], "development");
    assert_eq!(json["modules"], 2);
    assert_eq!(json["html"], "index.html");

    let chunks = json["chunks"].as_array().unwrap();
    let files: Vec<&str> = chunks.iter().map(|c| c["file"].as_str().unwrap()).collect();
    assert_eq!(files, vec!["js/main.bundle.js", "js/runtime.bundle.js"]);
    assert!(dir.path().join("dist/js/main.bundle.js").is_file());
    assert!(dir.path().join("dist/index.html").is_file());
}

#[test]
fn test_build_json_respects_config_file() {
    let dir = tempdir().unwrap();
    write(dir.path(), "app/start.js", "export default 1;\n");
    write(
        dir.path(),
        "shipyard.json",
        r#"{ "entry": "./app/start.js", "output": { "path": "public_html" }, "optimization": { "runtimeChunk": false } }"#,
    );

    let (success, json) = build_json(dir.path(), &[]);
    assert!(success);
    assert_eq!(json["mode"], "production");
    assert_eq!(json["chunks"].as_array().unwrap().len(), 1);
    assert!(dir.path().join("public_html/index.html").is_file());
}

#[test]
fn test_build_json_error_has_stable_code() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.js", "import './nowhere';\n");

    let (success, json) = build_json(dir.path(), &[]);
    assert!(!success);
    assert_eq!(json["ok"], false);

    let code = json["error"]["code"].as_str().unwrap();
    assert_eq!(code, "BUNDLE_RESOLVE_ERROR");
    assert!(
        code.chars().all(|c| c.is_uppercase() || c == '_'),
        "Error code should be SCREAMING_SNAKE_CASE"
    );
    assert!(json["error"]["message"].as_str().unwrap().contains("./nowhere"));
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_build_json_invalid_config() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.js", "export default 1;\n");
    write(dir.path(), "shipyard.json", r#"{ "rules": [{ "test": ["vue"], "use": ["vue-sfc"] }] }"#);

    let (success, json) = build_json(dir.path(), &[]);
    assert!(!success);
    assert_eq!(json["error"]["code"], "BUNDLE_CONFIG_INVALID");
}

#[test]
fn test_base_url_is_substituted_at_emit() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.js", "console.log(process.env.BASE_URL);\n");

    let output = shipyard()
        .env("BASE_URL", "/app/")
        .args(["build", "--json", "--mode", "dev", "--cwd"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let main = std::fs::read_to_string(dir.path().join("dist/js/main.bundle.js")).unwrap();
    assert!(main.contains("console.log(\"/app/\");"));
}
