//! Execution backends.
//!
//! Exactly two languages are supported, so the backend is a closed enum
//! rather than a trait object:
//!
//! - [`NativeBackend`]: C++ built into a loadable module, run in-process
//! - [`BytecodeBackend`]: Lua compiled to LuaJIT bytecode, run in a forked
//!   child with a shared-memory output
//!
//! The source file's extension picks the variant.

pub mod bytecode;
pub mod native;
pub mod registry;

use std::path::Path;

pub use bytecode::BytecodeBackend;
pub use native::NativeBackend;
pub use registry::{DatasetRegistry, RegistryEntry};

use crate::compile::write_transient;
use crate::config::EngineConfig;
use crate::dataset::DatasetDescriptor;
use crate::error::{Error, Result};
use crate::isolate::SandboxContext;

const NATIVE_TEMPLATE: &str = include_str!("../../templates/udf_template.cpp");
const BYTECODE_TEMPLATE: &str = include_str!("../../templates/udf_template.lua");

/// A UDF language backend.
#[derive(Debug, Clone)]
pub enum Backend {
    Native(NativeBackend),
    Bytecode(BytecodeBackend),
}

impl Backend {
    /// Pick the backend for a file extension, with or without the dot.
    pub fn from_extension(extension: &str, config: EngineConfig) -> Result<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "cpp" => Ok(Self::Native(NativeBackend::new(config))),
            "lua" => Ok(Self::Bytecode(BytecodeBackend::new(config))),
            other => Err(Error::UnsupportedLanguage(other.to_string())),
        }
    }

    /// Pick the backend for a UDF source file.
    pub fn for_source(source: &Path, config: EngineConfig) -> Result<Self> {
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| Error::UnsupportedLanguage(source.display().to_string()))?;
        Self::from_extension(extension, config).map_err(|_| {
            Error::UnsupportedLanguage(source.display().to_string())
        })
    }

    /// Language name for display.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Native(_) => "C++",
            Self::Bytecode(_) => "LuaJIT",
        }
    }

    /// Canonical source extension, including the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Native(_) => native::EXTENSION,
            Self::Bytecode(_) => bytecode::EXTENSION,
        }
    }

    /// Placeholder the template must contain.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Native(_) => native::PLACEHOLDER,
            Self::Bytecode(_) => bytecode::PLACEHOLDER,
        }
    }

    /// Template shipped with this crate.
    pub fn bundled_template(&self) -> &'static str {
        match self {
            Self::Native(_) => NATIVE_TEMPLATE,
            Self::Bytecode(_) => BYTECODE_TEMPLATE,
        }
    }

    fn config(&self) -> &EngineConfig {
        match self {
            Self::Native(backend) => backend.config(),
            Self::Bytecode(backend) => backend.config(),
        }
    }

    /// Compile `source` with `template` into an artifact.
    pub fn compile(&self, source: &Path, template: &Path) -> Result<Vec<u8>> {
        tracing::info!("Compiling {} UDF {}", self.name(), source.display());
        match self {
            Self::Native(backend) => backend.compile(source, template),
            Self::Bytecode(backend) => backend.compile(source, template),
        }
    }

    /// Compile `source` with the bundled template.
    pub fn compile_bundled(&self, source: &Path) -> Result<Vec<u8>> {
        let template = write_transient(
            self.bundled_template().as_bytes(),
            self.extension(),
            &self.config().temp_dir(),
        )?;
        self.compile(source, &template)
    }

    /// Run an artifact produced by [`compile`](Self::compile).
    pub fn run(
        &self,
        sandbox: &SandboxContext,
        inputs: &[DatasetDescriptor<'_>],
        output: &mut DatasetDescriptor<'_>,
        output_cast: Option<&str>,
        artifact: &[u8],
    ) -> Result<()> {
        output.describe("Output");
        for input in inputs {
            input.describe("Input");
        }

        let result = match self {
            Self::Native(backend) => backend.run(sandbox, inputs, output, output_cast, artifact),
            Self::Bytecode(backend) => backend.run(sandbox, inputs, output, output_cast, artifact),
        };
        if let Err(e) = &result {
            tracing::error!("{} UDF failed: {}", self.name(), e);
        }
        result
    }

    /// Names of the datasets `source` reads, in textual order.
    pub fn scan_dataset_names(&self, source: &Path) -> Result<Vec<String>> {
        match self {
            Self::Native(backend) => backend.scan_dataset_names(source),
            Self::Bytecode(backend) => backend.scan_dataset_names(source),
        }
    }
}
