//! End-to-end tests for the udf CLI.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use udf_core::{Backend, EngineConfig, ToolchainManager};

// =============================================================================
// Test Helpers
// =============================================================================

/// Temporary directory holding UDF sources, artifacts and buffers.
struct TestDir {
    temp_dir: TempDir,
}

impl TestDir {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("Failed to write file");
        path
    }
}

fn udf() -> Command {
    Command::cargo_bin("udf").unwrap()
}

/// Lua UDF bytecode built with the embedded interpreter.
fn lua_artifact(udf_source: &str) -> Vec<u8> {
    let backend = Backend::from_extension("lua", EngineConfig::default()).unwrap();
    let unit = backend
        .bundled_template()
        .replacen(backend.placeholder(), udf_source, 1);

    let lua = mlua::Lua::new();
    lua.load(unit.as_str()).into_function().unwrap().dump(true)
}

fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

const SCALE_UDF: &str = r#"
function dynamic_dataset()
    local a = lib.getData("a")
    local out = lib.getData("out")
    for i = 0, lib.getGridSize("out") - 1 do
        out[i] = a[i] * 3
    end
end
"#;

const MANIFEST: &str = r#"{
    "output": {"name": "out", "type": "int32", "dims": [4], "path": "out.bin"},
    "inputs": [{"name": "a", "type": "int32", "dims": [4], "path": "a.bin"}]
}"#;

// =============================================================================
// Help
// =============================================================================

#[test]
fn test_help_lists_commands() {
    udf()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("deps"))
        .stdout(predicate::str::contains("run"));
}

// =============================================================================
// Deps Command
// =============================================================================

#[test]
fn test_deps_lua() {
    let dir = TestDir::new();
    let source = dir.write(
        "udf.lua",
        r#"
function dynamic_dataset()
    local temp = lib.getData("temperature")
    -- local old = lib.getData("legacy")
    --[==[
    local skipped = lib.getData("skipped")
    ]==]
    local out = lib.getData("out")
end
"#,
    );

    udf()
        .arg("deps")
        .arg(&source)
        .assert()
        .success()
        .stdout("temperature\nout\n");
}

#[test]
fn test_deps_unsupported_language() {
    let dir = TestDir::new();
    let source = dir.write("udf.py", "lib.getData('a')\n");

    udf()
        .arg("deps")
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no backend for"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_deps_malformed_reference() {
    let dir = TestDir::new();
    let source = dir.write("udf.lua", "local a = lib.getData(name)\n");

    udf()
        .arg("deps")
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed dataset reference on line 1"));
}

// =============================================================================
// Compile Command
// =============================================================================

#[test]
fn test_compile_missing_source() {
    udf()
        .args(["compile", "/nonexistent/udf.lua"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("UDF source not found"));
}

#[test]
fn test_compile_missing_compiler() {
    let dir = TestDir::new();
    let source = dir.write("udf.lua", SCALE_UDF);

    udf()
        .arg("compile")
        .arg(&source)
        .env("UDF_LUAJIT", "/nonexistent/luajit")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found in PATH"))
        .stderr(predicate::str::contains("hint:"));

    assert!(!dir.path("udf.lua.udf").exists());
}

#[test]
fn test_compile_writes_artifact() {
    if !ToolchainManager::is_available(Path::new("luajit")) {
        eprintln!("skipping: luajit not installed");
        return;
    }
    let dir = TestDir::new();
    let source = dir.write("udf.lua", SCALE_UDF);

    udf()
        .arg("compile")
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("Compiled"));

    let artifact = fs::read(dir.path("udf.lua.udf")).unwrap();
    assert!(!artifact.is_empty());
}

// =============================================================================
// Run Command
// =============================================================================

#[test]
fn test_run_lua_artifact() {
    let dir = TestDir::new();
    let artifact = dir.write("scale.udf", lua_artifact(SCALE_UDF));
    dir.write("a.bin", i32_bytes(&[1, 2, 3, -4]));
    let manifest = dir.write("run.json", MANIFEST);

    udf()
        .arg("run")
        .arg(&artifact)
        .args(["--lang", "lua"])
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ran"));

    assert_eq!(fs::read(dir.path("out.bin")).unwrap(), i32_bytes(&[3, 6, 9, -12]));
}

#[test]
fn test_run_failure_still_writes_output() {
    let dir = TestDir::new();
    let artifact = dir.write(
        "fail.udf",
        lua_artifact(
            r#"
function dynamic_dataset()
    local out = lib.getData("out")
    out[0] = 11
    error("stopped early")
end
"#,
        ),
    );
    dir.write("a.bin", i32_bytes(&[0, 0, 0, 0]));
    let manifest = dir.write("run.json", MANIFEST);

    udf()
        .arg("run")
        .arg(&artifact)
        .args(["--lang", "lua", "--no-new-privs"])
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("dynamic_dataset"))
        .stderr(predicate::str::contains("stopped early"));

    assert_eq!(fs::read(dir.path("out.bin")).unwrap(), i32_bytes(&[11, 0, 0, 0]));
}

#[test]
fn test_run_unloadable_artifact_keeps_output() {
    let dir = TestDir::new();
    let artifact = dir.write("bad.udf", "function dynamic_dataset() end\n");
    dir.write("out.bin", [1u8, 2, 3, 4]);
    let manifest = dir.write(
        "run.json",
        r#"{"output": {"name": "out", "type": "uint8", "dims": [4], "path": "out.bin"}}"#,
    );

    udf()
        .arg("run")
        .arg(&artifact)
        .args(["--lang", "lua"])
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load bytecode"))
        .stderr(predicate::str::contains("Output written").not());

    assert_eq!(fs::read(dir.path("out.bin")).unwrap(), vec![1u8, 2, 3, 4]);
}

#[test]
fn test_run_timeout() {
    let dir = TestDir::new();
    let artifact = dir.write(
        "spin.udf",
        lua_artifact("function dynamic_dataset()\n    while true do end\nend\n"),
    );
    dir.write("a.bin", i32_bytes(&[0, 0, 0, 0]));
    let manifest = dir.write("run.json", MANIFEST);

    udf()
        .arg("run")
        .arg(&artifact)
        .args(["--lang", "lua", "--timeout", "1"])
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("killed after"));
}

#[test]
fn test_run_missing_input_buffer() {
    let dir = TestDir::new();
    let artifact = dir.write("scale.udf", lua_artifact(SCALE_UDF));
    let manifest = dir.write("run.json", MANIFEST);

    udf()
        .arg("run")
        .arg(&artifact)
        .args(["--lang", "lua"])
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read input 'a'"));
}

#[test]
fn test_run_short_input_buffer() {
    let dir = TestDir::new();
    let artifact = dir.write("scale.udf", lua_artifact(SCALE_UDF));
    dir.write("a.bin", i32_bytes(&[1, 2]));
    let manifest = dir.write("run.json", MANIFEST);

    udf()
        .arg("run")
        .arg(&artifact)
        .args(["--lang", "lua"])
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid dataset"));
}
