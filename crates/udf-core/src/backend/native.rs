//! Compiled-native backend.
//!
//! The UDF is spliced into a C++ template, built into a shared object and
//! executed in-process. The template exports four symbols the loader fills
//! in before calling the entry point:
//!
//! ```text
//! void  dynamic_dataset(void);                      entry point
//! void **udf_data;                                  [output, input_0, ...]
//! const char **udf_names;                           same order, NULL-terminated
//! const struct udf_dataset_meta *udf_meta;          {type, cast, rank, dims}
//! ```
//!
//! Running a module in-process gives no isolation; the caller's own process
//! boundary is the only protection against a faulty module.

use std::ffi::{CString, c_char, c_void};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;

use libloading::{Library, Symbol};
use tempfile::TempPath;

use crate::compile::{DependencyScanner, ToolchainManager, assemble, write_transient};
use crate::config::EngineConfig;
use crate::dataset::DatasetDescriptor;
use crate::error::{Error, Result};
use crate::isolate::SandboxContext;

/// Marker replaced by the user's source in the C++ template.
pub const PLACEHOLDER: &str = "// user_callback_placeholder";

/// Source extension handled by this backend.
pub const EXTENSION: &str = ".cpp";

/// Entry point exported by every module.
pub const ENTRY_SYMBOL: &str = "dynamic_dataset";

/// Exported `void **` filled with dataset buffers.
pub const DATA_SYMBOL: &str = "udf_data";

/// Exported `const char **` filled with dataset names.
pub const NAMES_SYMBOL: &str = "udf_names";

/// Exported `const struct udf_dataset_meta *` filled with dataset metadata.
pub const META_SYMBOL: &str = "udf_meta";

/// Per-dataset metadata as laid out in the C++ template.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DatasetMeta {
    pub type_name: *const c_char,
    pub cast_type: *const c_char,
    pub rank: usize,
    pub dims: *const u64,
}

/// Entry point signature.
type EntryFn = unsafe extern "C" fn();

/// C++ UDFs built into loadable modules.
#[derive(Debug, Clone, Default)]
pub struct NativeBackend {
    config: EngineConfig,
}

impl NativeBackend {
    /// Create a backend with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assemble `source` into `template` and build a loadable module.
    ///
    /// Returns the module image. The assembled source and the module file
    /// are deleted before this returns, on success and on failure.
    pub fn compile(&self, source: &Path, template: &Path) -> Result<Vec<u8>> {
        let compiler = ToolchainManager::locate(&self.config.native_compiler)?;
        let temp_dir = self.config.temp_dir();

        let unit = assemble(source, template, PLACEHOLDER, EXTENSION, &temp_dir)?;
        let build_dir = tempfile::Builder::new()
            .prefix("udf-build-")
            .tempdir_in(&temp_dir)
            .map_err(Error::TempFileCreationFailed)?;
        let module = build_dir.path().join("udf.so");

        let mut cmd = compiler.command();
        cmd.args(&self.config.native_flags)
            .arg(unit.as_os_str())
            .arg("-o")
            .arg(&module)
            .stdin(Stdio::null());
        tracing::debug!("Running: {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| compiler.invocation_error(format!("failed to run: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!("{} failed on {}:\n{}", compiler.tool(), source.display(), stderr);
            return Err(compiler.invocation_error(stderr));
        }
        if !module.exists() {
            tracing::error!("{} produced no module for {}", compiler.tool(), source.display());
            return Err(compiler.invocation_error("no module was produced".to_string()));
        }

        let bytes = fs::read(&module)?;
        tracing::debug!("Module has {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Load a module image and call its entry point in-process.
    ///
    /// All four exports are resolved before anything is written, so a
    /// module missing any of them never touches the output buffer.
    pub fn run(
        &self,
        _sandbox: &SandboxContext,
        inputs: &[DatasetDescriptor<'_>],
        output: &mut DatasetDescriptor<'_>,
        output_cast: Option<&str>,
        artifact: &[u8],
    ) -> Result<()> {
        let table = NativeTable::new(output, output_cast, inputs)?;
        let module = LoadedModule::load(artifact, &self.config.temp_dir())?;
        let exports = module.exports()?;

        tracing::debug!("Calling {} with {} datasets", ENTRY_SYMBOL, table.len());
        // SAFETY: the table outlives the call and matches the template's layout.
        unsafe {
            exports.bind(&table);
            (exports.entry)();
            exports.unbind();
        }

        Ok(())
    }

    /// Dataset names the UDF reads, found after comment-stripping
    /// preprocessing by the native compiler.
    pub fn scan_dataset_names(&self, source: &Path) -> Result<Vec<String>> {
        fs::metadata(source).map_err(|e| Error::SourceUnreadable {
            path: source.to_path_buf(),
            source: e,
        })?;

        let preprocessor = ToolchainManager::locate(&self.config.native_compiler)?;
        let mut cmd = preprocessor.command();
        cmd.args(&self.config.preprocess_flags)
            .arg(source)
            .stdin(Stdio::null());
        tracing::debug!("Running: {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| preprocessor.invocation_error(format!("failed to run: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(preprocessor.invocation_error(stderr));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut scanner = DependencyScanner::new();
        scanner.scan_preprocessed(&text)?;
        Ok(scanner.into_names())
    }
}

/// Owned C-side view of the datasets handed to a module.
struct NativeTable {
    data: Vec<*mut c_void>,
    names: Vec<*const c_char>,
    meta: Vec<DatasetMeta>,
    // Backing storage for the pointers above.
    _strings: Vec<CString>,
    _dims: Vec<Vec<u64>>,
}

impl NativeTable {
    fn new(
        output: &DatasetDescriptor<'_>,
        output_cast: Option<&str>,
        inputs: &[DatasetDescriptor<'_>],
    ) -> Result<Self> {
        let count = inputs.len() + 1;
        let mut table = Self {
            data: Vec::with_capacity(count + 1),
            names: Vec::with_capacity(count + 1),
            meta: Vec::with_capacity(count + 1),
            _strings: Vec::with_capacity(count * 3),
            _dims: Vec::with_capacity(count),
        };

        table.push(output, output_cast)?;
        for input in inputs {
            table.push(input, None)?;
        }

        table.data.push(std::ptr::null_mut());
        table.names.push(std::ptr::null());
        table.meta.push(DatasetMeta {
            type_name: std::ptr::null(),
            cast_type: std::ptr::null(),
            rank: 0,
            dims: std::ptr::null(),
        });

        Ok(table)
    }

    fn push(&mut self, dataset: &DatasetDescriptor<'_>, cast: Option<&str>) -> Result<()> {
        let name = self.c_string(&dataset.name)?;
        let type_name = self.c_string(dataset.element_type.type_name())?;
        let cast_type = self.c_string(cast.unwrap_or(dataset.element_type.cast_declaration()))?;

        let dims = dataset.dimensions.clone();
        let meta = DatasetMeta {
            type_name,
            cast_type,
            rank: dims.len(),
            dims: dims.as_ptr(),
        };
        self._dims.push(dims);

        self.data.push(dataset.data_ptr());
        self.names.push(name);
        self.meta.push(meta);
        Ok(())
    }

    /// Keep a C copy of `s` alive for the table's lifetime.
    fn c_string(&mut self, s: &str) -> Result<*const c_char> {
        let owned = CString::new(s)
            .map_err(|_| Error::InvalidDataset(format!("'{}' contains a NUL byte", s)))?;
        // The heap buffer does not move when the CString is moved into the Vec.
        let ptr = owned.as_ptr();
        self._strings.push(owned);
        Ok(ptr)
    }

    /// Number of datasets, excluding the terminator.
    fn len(&self) -> usize {
        self.data.len() - 1
    }
}

/// A module image loaded from a transient file.
struct LoadedModule {
    // Field order matters: the library is closed before the file is removed.
    library: Library,
    _file: TempPath,
}

impl LoadedModule {
    fn load(artifact: &[u8], temp_dir: &Path) -> Result<Self> {
        let file = write_transient(artifact, ".so", temp_dir)?;
        fs::set_permissions(&file, fs::Permissions::from_mode(0o755))?;

        // SAFETY: loading runs the module's static initializers; the module
        // was built from our template.
        let path = file.to_path_buf();
        let library = unsafe { Library::new(&path) }.map_err(|e| {
            tracing::error!("Failed to load UDF module: {}", e);
            Error::LibraryLoad(e)
        })?;

        Ok(Self {
            library,
            _file: file,
        })
    }

    fn exports(&self) -> Result<NativeExports<'_>> {
        // SAFETY: the symbol types match the declarations in the template.
        unsafe {
            Ok(NativeExports {
                entry: resolve(&self.library, ENTRY_SYMBOL)?,
                data: resolve(&self.library, DATA_SYMBOL)?,
                names: resolve(&self.library, NAMES_SYMBOL)?,
                meta: resolve(&self.library, META_SYMBOL)?,
            })
        }
    }
}

/// The four symbols every module exports.
struct NativeExports<'lib> {
    entry: Symbol<'lib, EntryFn>,
    /// Address of `void **udf_data`
    data: Symbol<'lib, *mut *mut *mut c_void>,
    /// Address of `const char **udf_names`
    names: Symbol<'lib, *mut *const *const c_char>,
    /// Address of `const struct udf_dataset_meta *udf_meta`
    meta: Symbol<'lib, *mut *const DatasetMeta>,
}

impl NativeExports<'_> {
    /// Point the module's globals at `table`.
    ///
    /// # Safety
    /// `table` must stay alive until [`unbind`](Self::unbind) is called.
    unsafe fn bind(&self, table: &NativeTable) {
        unsafe {
            **self.data = table.data.as_ptr().cast_mut();
            **self.names = table.names.as_ptr();
            **self.meta = table.meta.as_ptr();
        }
    }

    /// Clear the module's globals.
    unsafe fn unbind(&self) {
        unsafe {
            **self.data = std::ptr::null_mut();
            **self.names = std::ptr::null();
            **self.meta = std::ptr::null();
        }
    }
}

unsafe fn resolve<'lib, T>(library: &'lib Library, symbol: &'static str) -> Result<Symbol<'lib, T>> {
    unsafe { library.get(symbol.as_bytes()) }.map_err(|source| {
        tracing::error!("Module does not export '{}'", symbol);
        Error::SymbolResolutionFailed { symbol, source }
    })
}
