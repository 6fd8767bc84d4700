//! Toolchain discovery for UDF compilation.
//!
//! Locates the external compilers each backend shells out to.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Locates and describes an external compiler.
#[derive(Debug, Clone)]
pub struct ToolchainManager {
    /// Display name used in diagnostics
    tool: String,

    /// Resolved executable path
    path: PathBuf,
}

impl ToolchainManager {
    /// Resolve `program` through `PATH` (or verify it if it is already a path).
    pub fn locate(program: &Path) -> Result<Self> {
        let tool = program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());

        let path = which::which(program).map_err(|_| Error::CompilerInvocationFailed {
            tool: tool.clone(),
            message: format!("{} not found in PATH", program.display()),
        })?;

        Ok(Self { tool, path })
    }

    /// Whether `program` can be resolved at all.
    pub fn is_available(program: &Path) -> bool {
        which::which(program).is_ok()
    }

    /// Display name of the tool.
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Resolved executable path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a command for this tool.
    pub fn command(&self) -> Command {
        Command::new(&self.path)
    }

    /// First line of the tool's version banner.
    ///
    /// `luajit -v` and `g++ --version` both print a banner; try both spellings.
    pub fn version(&self) -> Result<String> {
        for flag in ["--version", "-v"] {
            let output = Command::new(&self.path)
                .arg(flag)
                .stdin(Stdio::null())
                .output()
                .map_err(|e| self.invocation_error(format!("failed to run: {}", e)))?;

            if output.status.success() {
                let text = if output.stdout.is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                let banner = String::from_utf8_lossy(&text);
                if let Some(line) = banner.lines().next() {
                    return Ok(line.trim().to_string());
                }
            }
        }

        Err(self.invocation_error("failed to get version".to_string()))
    }

    /// Build a `CompilerInvocationFailed` error for this tool.
    pub fn invocation_error(&self, message: String) -> Error {
        Error::CompilerInvocationFailed {
            tool: self.tool.clone(),
            message,
        }
    }
}
