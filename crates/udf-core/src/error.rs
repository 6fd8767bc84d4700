//! Error types for udf-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for udf-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling, scanning or running a UDF.
#[derive(Debug, Error)]
pub enum Error {
    /// Template path was empty or could not be read.
    #[error("template not found: {}", path.display())]
    TemplateMissing { path: PathBuf },

    /// The template does not contain the language placeholder.
    #[error("placeholder '{placeholder}' not found in {}", template.display())]
    PlaceholderNotFound {
        template: PathBuf,
        placeholder: String,
    },

    /// The UDF source file could not be read.
    #[error("failed to read UDF source {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No unique temporary file could be allocated.
    #[error("failed to create temporary file: {0}")]
    TempFileCreationFailed(#[source] std::io::Error),

    /// Compiler missing, failed, or produced no artifact.
    #[error("{tool} failed: {message}")]
    CompilerInvocationFailed { tool: String, message: String },

    /// A required export is missing from a native module.
    #[error("symbol '{symbol}' not found in UDF module: {source}")]
    SymbolResolutionFailed {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// Failed to load dynamic library.
    #[error("failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// The interpreter could not be created or the bytecode could not be loaded.
    #[error("failed to load bytecode: {0}")]
    InterpreterLoadFailed(String),

    /// A UDF callback raised an error inside the interpreter.
    #[error("failed to invoke the {callback} callback: {message}")]
    InterpreterCallFailed { callback: String, message: String },

    /// The sandbox policy refused to install in the child process.
    #[error("sandbox initialization failed: {0}")]
    SandboxInitFailed(String),

    /// The UDF process was terminated by a signal.
    #[error("UDF process terminated by signal {signal}")]
    ChildCrashed { signal: i32 },

    /// The UDF process exited with a failure code and no report.
    #[error("UDF process exited with status {code}")]
    ChildFailed { code: i32 },

    /// The UDF process exceeded its time budget and was killed.
    #[error("UDF process killed after {0:?}")]
    Timeout(Duration),

    /// A data-access call does not carry a well-formed quoted name.
    #[error("malformed dataset reference on line {line}: {text}")]
    MalformedDependencyDeclaration { line: usize, text: String },

    /// Dataset descriptor violates its invariants.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// No backend handles this source file.
    #[error("no backend for '{0}'")]
    UnsupportedLanguage(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Communication error with the UDF process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the UDF process was started before this failure.
    ///
    /// Only then has the output buffer received the shared-memory copy;
    /// on every other failure it is exactly what the caller passed in.
    pub fn output_copied_back(&self) -> bool {
        matches!(
            self,
            Self::InterpreterCallFailed { .. }
                | Self::SandboxInitFailed(_)
                | Self::ChildCrashed { .. }
                | Self::ChildFailed { .. }
                | Self::Timeout(_)
                | Self::Ipc(_)
                | Self::Serialization(_)
        )
    }

    /// Render the error together with a short recovery hint, if one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::TemplateMissing { .. } => {
                Some("pass --template or run from a checkout that ships templates/")
            }
            Self::PlaceholderNotFound { .. } => {
                Some("the template must contain the language placeholder exactly once")
            }
            Self::CompilerInvocationFailed { .. } => {
                Some("check that the compiler is installed, or set UDF_CXX / UDF_LUAJIT")
            }
            Self::SymbolResolutionFailed { .. } => {
                Some("the artifact was not built from a compatible template; recompile it")
            }
            Self::MalformedDependencyDeclaration { .. } => {
                Some("dataset names must be passed as a quoted literal, e.g. lib.getData(\"name\")")
            }
            Self::Timeout(_) => Some("raise UDF_RUN_TIMEOUT_SECS or pass --timeout"),
            Self::UnsupportedLanguage(_) => Some("supported extensions are .cpp and .lua"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}
