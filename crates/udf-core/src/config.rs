//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default wall-clock budget for one isolated UDF run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration shared by both backends.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Native compiler (C++ frontend)
    pub native_compiler: PathBuf,

    /// Flags producing a position-independent loadable module
    pub native_flags: Vec<String>,

    /// Flags for the comment-stripping preprocessor pass
    pub preprocess_flags: Vec<String>,

    /// Bytecode compiler
    pub bytecode_compiler: PathBuf,

    /// Flags placed before `<input> <output>` on the bytecode compiler command line
    pub bytecode_flags: Vec<String>,

    /// Directory for transient files. `None` uses the platform default.
    pub temp_dir: Option<PathBuf>,

    /// Time budget for an isolated run. `None` waits forever, including on a
    /// child stuck on a lock inherited across `fork`.
    pub run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            native_compiler: PathBuf::from("g++"),
            native_flags: ["-rdynamic", "-shared", "-fPIC", "-flto", "-Os", "-C"]
                .map(String::from)
                .to_vec(),
            preprocess_flags: ["-fpreprocessed", "-dD", "-E"].map(String::from).to_vec(),
            bytecode_compiler: PathBuf::from("luajit"),
            bytecode_flags: ["-O3", "-b"].map(String::from).to_vec(),
            temp_dir: None,
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults overridden by environment variables.
    ///
    /// - `UDF_CXX`: native compiler
    /// - `UDF_LUAJIT`: bytecode compiler
    /// - `UDF_TMPDIR`: directory for transient files
    /// - `UDF_RUN_TIMEOUT_SECS`: run budget in seconds, `0` disables it
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(cxx) = std::env::var("UDF_CXX") {
            config.native_compiler = PathBuf::from(cxx);
        }
        if let Ok(luajit) = std::env::var("UDF_LUAJIT") {
            config.bytecode_compiler = PathBuf::from(luajit);
        }
        if let Ok(dir) = std::env::var("UDF_TMPDIR") {
            config.temp_dir = Some(PathBuf::from(dir));
        }
        if let Ok(secs) = std::env::var("UDF_RUN_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) => config.run_timeout = Self::timeout_from_secs(secs),
                Err(_) => tracing::warn!("Ignoring invalid UDF_RUN_TIMEOUT_SECS={}", secs),
            }
        }

        config
    }

    /// Override the transient-file directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Override the run budget.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Convert a seconds count into a budget, where `0` means unbounded.
    pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Resolve the directory used for transient files.
    ///
    /// `std::env::temp_dir` already honors `TMPDIR`.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
