//! Integration tests that shell out to the real compilers.
//!
//! Each test returns early when its toolchain (`g++` or `luajit`) is not
//! installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use udf_core::{
    Backend, DatasetDescriptor, ElementType, EngineConfig, Error, SandboxContext, ToolchainManager,
};

fn have(tool: &str) -> bool {
    let found = ToolchainManager::is_available(Path::new(tool));
    if !found {
        eprintln!("skipping: {} not installed", tool);
    }
    found
}

/// Scratch directory used both for UDF sources and for transient files.
struct Workspace {
    sources: TempDir,
    scratch: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            sources: TempDir::new().expect("Failed to create source directory"),
            scratch: TempDir::new().expect("Failed to create scratch directory"),
        }
    }

    fn write(&self, name: &str, text: &str) -> PathBuf {
        let path = self.sources.path().join(name);
        fs::write(&path, text).expect("Failed to write source");
        path
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::default().with_temp_dir(self.scratch.path())
    }

    fn scratch_is_empty(&self) -> bool {
        fs::read_dir(self.scratch.path()).unwrap().next().is_none()
    }
}

fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

// =============================================================================
// Native backend
// =============================================================================

const DOUBLE_CPP: &str = r#"
extern "C" void dynamic_dataset()
{
    auto a = lib.getData<int32_t>("a");
    auto out = lib.getData<int32_t>("out");
    for (size_t i = 0; i < lib.getGridSize("out"); ++i)
        out[i] = a[i] * 2;
}
"#;

#[test]
fn test_native_compile_and_run() {
    if !have("g++") {
        return;
    }
    let ws = Workspace::new();
    let source = ws.write("double.cpp", DOUBLE_CPP);
    let backend = Backend::for_source(&source, ws.config()).unwrap();

    let artifact = backend.compile_bundled(&source).unwrap();
    assert!(!artifact.is_empty());
    assert!(ws.scratch_is_empty());

    let mut a = i32_bytes(&[1, 2, 3, 4, 5, 6]);
    let mut out = vec![0u8; 24];
    let inputs = vec![DatasetDescriptor::new("a", ElementType::Int32, vec![2, 3], &mut a).unwrap()];
    let mut output = DatasetDescriptor::new("out", ElementType::Int32, vec![2, 3], &mut out).unwrap();

    backend
        .run(&SandboxContext::default(), &inputs, &mut output, None, &artifact)
        .unwrap();

    assert_eq!(out, i32_bytes(&[2, 4, 6, 8, 10, 12]));
    assert!(ws.scratch_is_empty());
}

#[test]
fn test_native_compile_failure_cleans_up() {
    if !have("g++") {
        return;
    }
    let ws = Workspace::new();
    let source = ws.write("broken.cpp", "extern \"C\" void dynamic_dataset() { this is not c++ }\n");
    let backend = Backend::for_source(&source, ws.config()).unwrap();

    let err = backend.compile_bundled(&source).unwrap_err();

    assert!(matches!(err, Error::CompilerInvocationFailed { .. }), "got {:?}", err);
    assert!(ws.scratch_is_empty());
}

#[test]
fn test_native_missing_symbol_writes_nothing() {
    if !have("g++") {
        return;
    }
    let ws = Workspace::new();
    // Exports everything except udf_meta.
    let source = ws.write(
        "partial.cpp",
        r#"
extern "C" {
    void **udf_data = nullptr;
    const char **udf_names = nullptr;
    void dynamic_dataset() { static_cast<int *>(udf_data[0])[0] = 1; }
}
"#,
    );
    let module = ws.sources.path().join("partial.so");
    let status = Command::new("g++")
        .args(["-shared", "-fPIC"])
        .arg(&source)
        .arg("-o")
        .arg(&module)
        .status()
        .unwrap();
    assert!(status.success());
    let artifact = fs::read(&module).unwrap();

    let backend = Backend::from_extension("cpp", ws.config()).unwrap();
    let mut out = i32_bytes(&[-5]);
    let mut output = DatasetDescriptor::new("out", ElementType::Int32, vec![1], &mut out).unwrap();

    let err = backend
        .run(&SandboxContext::default(), &[], &mut output, None, &artifact)
        .unwrap_err();

    assert!(
        matches!(err, Error::SymbolResolutionFailed { symbol: "udf_meta", .. }),
        "got {:?}",
        err
    );
    assert_eq!(out, i32_bytes(&[-5]));
    assert!(ws.scratch_is_empty());
}

#[test]
fn test_native_scan_ignores_comments() {
    if !have("g++") {
        return;
    }
    let ws = Workspace::new();
    let source = ws.write(
        "scan.cpp",
        r#"
extern "C" void dynamic_dataset()
{
    auto a = lib.getData<float>("A");
    // auto b = lib.getData<float>("B");
    /*
    auto c = lib.getData<float>("C");
    */
    auto out = lib.getData<float>("out");
}
"#,
    );
    let backend = Backend::for_source(&source, ws.config()).unwrap();

    let names = backend.scan_dataset_names(&source).unwrap();
    assert_eq!(names, vec!["A", "out"]);
}

// =============================================================================
// Bytecode backend
// =============================================================================

#[test]
fn test_luajit_compile_and_run() {
    if !have("luajit") {
        return;
    }
    let ws = Workspace::new();
    let source = ws.write(
        "scale.lua",
        r#"
function dynamic_dataset()
    local a = lib.getData("a")
    local out = lib.getData("out")
    for i = 0, lib.getGridSize("out") - 1 do
        out[i] = a[i] * 10
    end
end
"#,
    );
    let backend = Backend::for_source(&source, ws.config()).unwrap();

    let artifact = backend.compile_bundled(&source).unwrap();
    assert!(ws.scratch_is_empty());

    let mut a = i32_bytes(&[1, -2, 3]);
    let mut out = vec![0u8; 12];
    let inputs = vec![DatasetDescriptor::new("a", ElementType::Int32, vec![3], &mut a).unwrap()];
    let mut output = DatasetDescriptor::new("out", ElementType::Int32, vec![3], &mut out).unwrap();

    backend
        .run(&SandboxContext::default(), &inputs, &mut output, None, &artifact)
        .unwrap();

    assert_eq!(out, i32_bytes(&[10, -20, 30]));
}

#[test]
fn test_luajit_compile_failure_cleans_up() {
    if !have("luajit") {
        return;
    }
    let ws = Workspace::new();
    let source = ws.write("broken.lua", "function dynamic_dataset(\n");
    let backend = Backend::for_source(&source, ws.config()).unwrap();

    let err = backend.compile_bundled(&source).unwrap_err();

    assert!(matches!(err, Error::CompilerInvocationFailed { .. }), "got {:?}", err);
    assert!(ws.scratch_is_empty());
}

// =============================================================================
// Failures before any tool runs
// =============================================================================

#[test]
fn test_missing_compiler() {
    let ws = Workspace::new();
    let source = ws.write("udf.lua", "function dynamic_dataset() end\n");
    let mut config = ws.config();
    config.bytecode_compiler = PathBuf::from("/nonexistent/luajit");
    let backend = Backend::for_source(&source, config).unwrap();

    let err = backend.compile_bundled(&source).unwrap_err();

    match err {
        Error::CompilerInvocationFailed { tool, message } => {
            assert_eq!(tool, "luajit");
            assert!(message.contains("not found"));
        }
        other => panic!("expected CompilerInvocationFailed, got {:?}", other),
    }
    assert!(ws.scratch_is_empty());
}

#[test]
fn test_compiler_producing_nothing() {
    if !have("true") {
        return;
    }
    let ws = Workspace::new();
    let source = ws.write("udf.cpp", DOUBLE_CPP);
    let mut config = ws.config();
    config.native_compiler = PathBuf::from("true");
    let backend = Backend::for_source(&source, config).unwrap();

    let err = backend.compile_bundled(&source).unwrap_err();

    match err {
        Error::CompilerInvocationFailed { tool, message } => {
            assert_eq!(tool, "true");
            assert_eq!(message, "no module was produced");
        }
        other => panic!("expected CompilerInvocationFailed, got {:?}", other),
    }
    assert!(ws.scratch_is_empty());
}

#[test]
fn test_missing_source() {
    if !have("luajit") {
        return;
    }
    let ws = Workspace::new();
    let backend = Backend::from_extension("lua", ws.config()).unwrap();

    let err = backend
        .compile_bundled(&ws.sources.path().join("absent.lua"))
        .unwrap_err();

    assert!(matches!(err, Error::SourceUnreadable { .. }), "got {:?}", err);
    assert!(ws.scratch_is_empty());
}

#[test]
fn test_lua_scan_through_backend() {
    let ws = Workspace::new();
    let source = ws.write(
        "scan.lua",
        r#"
local a = lib.getData("a") -- lib.getData("b")
--[[
local c = lib.getData("c")
]]
local d, e = lib.getData('d'), lib.getData("e")
"#,
    );
    let backend = Backend::for_source(&source, ws.config()).unwrap();

    let names = backend.scan_dataset_names(&source).unwrap();
    assert_eq!(names, vec!["a", "d", "e"]);
}

#[test]
fn test_lua_scan_malformed() {
    let ws = Workspace::new();
    let source = ws.write("bad.lua", "local x = 1\nlocal a = lib.getData(\"unterminated)\n");
    let backend = Backend::for_source(&source, ws.config()).unwrap();

    let err = backend.scan_dataset_names(&source).unwrap_err();
    assert!(matches!(err, Error::MalformedDependencyDeclaration { line: 2, .. }), "got {:?}", err);
}
