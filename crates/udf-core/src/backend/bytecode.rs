//! Managed-bytecode backend.
//!
//! The UDF is spliced into a Lua template and compiled to LuaJIT bytecode.
//! At run time the bytecode is loaded into an embedded interpreter, but the
//! UDF callbacks (`init`, then `dynamic_dataset`) run in a forked child so a
//! sandbox policy can restrict or kill them without touching the host.
//! The output dataset is redirected to shared memory and copied back into
//! the caller's buffer once the child is gone.

use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::rc::Rc;

use mlua::{ChunkMode, Function, LightUserData, Lua, LuaOptions, StdLib, Value};

use crate::compile::{DependencyScanner, ToolchainManager, assemble};
use crate::config::EngineConfig;
use crate::dataset::DatasetDescriptor;
use crate::error::{Error, Result};
use crate::isolate::{ChildReport, IsolatedChild, SandboxContext, SharedRegion};

use super::registry::DatasetRegistry;

/// Marker replaced by the user's source in the Lua template.
pub const PLACEHOLDER: &str = "-- user_callback_placeholder";

/// Source extension handled by this backend.
pub const EXTENSION: &str = ".lua";

/// Global resolving a dataset name to its buffer (light userdata).
pub const GET_DATA: &str = "udf_get_data";

/// Global resolving a dataset name to its element type name.
pub const GET_TYPE: &str = "udf_get_type";

/// Global resolving a dataset name to its pointer cast declaration.
pub const GET_CAST: &str = "udf_get_cast";

/// Global resolving a dataset name to its `"AxB"` dimensions.
pub const GET_DIMS: &str = "udf_get_dims";

/// Interpreter libraries UDFs may use. The base library is always loaded.
fn allowed_libraries() -> StdLib {
    StdLib::MATH | StdLib::STRING | StdLib::FFI | StdLib::JIT | StdLib::PACKAGE | StdLib::TABLE
}

/// Lua UDFs compiled to LuaJIT bytecode.
#[derive(Debug, Clone, Default)]
pub struct BytecodeBackend {
    config: EngineConfig,
}

impl BytecodeBackend {
    /// Create a backend with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assemble `source` into `template` and compile it to bytecode.
    pub fn compile(&self, source: &Path, template: &Path) -> Result<Vec<u8>> {
        let compiler = ToolchainManager::locate(&self.config.bytecode_compiler)?;
        let temp_dir = self.config.temp_dir();

        let unit = assemble(source, template, PLACEHOLDER, EXTENSION, &temp_dir)?;
        let build_dir = tempfile::Builder::new()
            .prefix("udf-build-")
            .tempdir_in(&temp_dir)
            .map_err(Error::TempFileCreationFailed)?;
        let bytecode = build_dir.path().join("udf.bc");

        let mut cmd = compiler.command();
        cmd.args(&self.config.bytecode_flags)
            .arg(unit.as_os_str())
            .arg(&bytecode)
            .stdin(Stdio::null());
        tracing::debug!("Running: {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| compiler.invocation_error(format!("failed to run: {}", e)))?;

        if !output.status.success() || !bytecode.exists() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                "no bytecode was produced".to_string()
            } else {
                stderr
            };
            tracing::error!("{} failed on {}:\n{}", compiler.tool(), source.display(), message);
            return Err(compiler.invocation_error(message));
        }

        let bytes = fs::read(&bytecode)?;
        tracing::debug!("Bytecode has {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Run bytecode against the given datasets.
    ///
    /// Once the child has been started, the shared output region is copied
    /// into `output` whatever the outcome, so partial writes survive a
    /// failing or killed UDF. Earlier failures leave `output` untouched.
    pub fn run(
        &self,
        sandbox: &SandboxContext,
        inputs: &[DatasetDescriptor<'_>],
        output: &mut DatasetDescriptor<'_>,
        output_cast: Option<&str>,
        artifact: &[u8],
    ) -> Result<()> {
        // SAFETY: UDFs need the FFI library to reach dataset buffers.
        let lua = unsafe { Lua::unsafe_new_with(allowed_libraries(), LuaOptions::new()) };

        let shm = SharedRegion::new(output.storage_size())?;
        let registry = Rc::new(DatasetRegistry::new(
            output,
            shm.as_mut_ptr().cast(),
            output_cast,
            inputs,
        ));
        register_callbacks(&lua, &registry).map_err(|e| {
            Error::InterpreterLoadFailed(format!("failed to register callbacks: {}", e))
        })?;

        lua.load(artifact)
            .set_name("udf")
            .set_mode(ChunkMode::Binary)
            .exec()
            .map_err(|e| {
                tracing::error!("Failed to load bytecode: {}", e);
                Error::InterpreterLoadFailed(e.to_string())
            })?;

        let filter_path = sandbox.filter_path().to_string_lossy().into_owned();
        let child = IsolatedChild::spawn(sandbox, || {
            call_global(&lua, "init", filter_path.as_str())?;
            call_global(&lua, "dynamic_dataset", ())
        })?;

        let outcome = child.wait(self.config.run_timeout);
        shm.copy_to(output.as_bytes_mut());
        outcome
    }

    /// Dataset names the UDF reads, skipping commented-out calls.
    pub fn scan_dataset_names(&self, source: &Path) -> Result<Vec<String>> {
        let text = fs::read_to_string(source).map_err(|e| Error::SourceUnreadable {
            path: source.to_path_buf(),
            source: e,
        })?;

        let mut scanner = DependencyScanner::new();
        scanner.scan_lua(&text)?;
        Ok(scanner.into_names())
    }
}

/// Expose the registry to Lua as four lookup functions.
///
/// A name that is not registered yields `nil` and an error log entry.
fn register_callbacks(lua: &Lua, registry: &Rc<DatasetRegistry>) -> mlua::Result<()> {
    let globals = lua.globals();

    let reg = Rc::clone(registry);
    globals.set(
        GET_DATA,
        lua.create_function(move |_, name: String| {
            Ok(match reg.lookup(&name) {
                Some(entry) => Value::LightUserData(LightUserData(entry.data)),
                None => missing(&name),
            })
        })?,
    )?;

    let reg = Rc::clone(registry);
    globals.set(
        GET_TYPE,
        lua.create_function(move |lua, name: String| match reg.lookup(&name) {
            Some(entry) => lua.create_string(&entry.type_name).map(Value::String),
            None => Ok(missing(&name)),
        })?,
    )?;

    let reg = Rc::clone(registry);
    globals.set(
        GET_CAST,
        lua.create_function(move |lua, name: String| match reg.lookup(&name) {
            Some(entry) => lua.create_string(&entry.cast).map(Value::String),
            None => Ok(missing(&name)),
        })?,
    )?;

    let reg = Rc::clone(registry);
    globals.set(
        GET_DIMS,
        lua.create_function(move |lua, name: String| match reg.lookup(&name) {
            Some(entry) => lua.create_string(&entry.dims).map(Value::String),
            None => Ok(missing(&name)),
        })?,
    )?;

    Ok(())
}

fn missing(name: &str) -> Value {
    tracing::error!("Dataset '{}' is not available to this UDF", name);
    Value::Nil
}

/// Call a global function defined by the bytecode.
fn call_global(
    lua: &Lua,
    name: &str,
    args: impl mlua::IntoLuaMulti,
) -> std::result::Result<(), ChildReport> {
    let function: Function = lua
        .globals()
        .get(name)
        .map_err(|e| ChildReport::call_failed(name, format!("not defined: {}", e)))?;

    function
        .call::<()>(args)
        .map_err(|e| ChildReport::call_failed(name, e.to_string()))
}
