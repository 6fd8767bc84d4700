//! Dataset manifest for `udf run`.
//!
//! ```json
//! {
//!   "output": { "name": "out", "type": "float", "dims": [10, 20], "path": "out.bin" },
//!   "inputs": [
//!     { "name": "a", "type": "float", "dims": [10, 20], "path": "a.bin" }
//!   ],
//!   "cast": "float*"
//! }
//! ```
//!
//! Buffers are raw little-endian element arrays. Relative paths resolve
//! against the manifest's directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use udf_core::ElementType;

/// One dataset backed by a raw buffer file.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub dims: Vec<u64>,
    pub path: PathBuf,
}

impl DatasetSpec {
    /// Bytes the dataset occupies.
    pub fn storage_size(&self) -> anyhow::Result<usize> {
        self.dims
            .iter()
            .try_fold(self.element_type.size() as u64, |acc, &d| acc.checked_mul(d))
            .and_then(|bytes| usize::try_from(bytes).ok())
            .with_context(|| format!("dataset '{}' is too large", self.name))
    }
}

/// Output and inputs for one run.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub output: DatasetSpec,
    #[serde(default)]
    pub inputs: Vec<DatasetSpec>,
    /// Cast declaration overriding the output's default
    #[serde(default)]
    pub cast: Option<String>,
}

impl Manifest {
    /// Read a manifest and resolve its buffer paths.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let mut manifest: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("invalid manifest {}", path.display()))?;

        let base = path.parent().unwrap_or(Path::new("."));
        manifest.output.path = base.join(&manifest.output.path);
        for input in &mut manifest.inputs {
            input.path = base.join(&input.path);
        }

        Ok(manifest)
    }
}
