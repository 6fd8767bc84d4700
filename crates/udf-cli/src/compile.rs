//! Compile command implementation.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use udf_core::{Backend, EngineConfig};

use crate::colors;

/// Compile a UDF source file and write the artifact.
pub fn execute(source: &str, template: Option<&str>, output: Option<&str>) -> anyhow::Result<()> {
    let source = Path::new(source);
    if !source.exists() {
        anyhow::bail!("UDF source not found: {}", source.display());
    }

    let backend = Backend::for_source(source, EngineConfig::from_env())?;
    let start = Instant::now();

    let artifact = match template {
        Some(template) => backend.compile(source, Path::new(template))?,
        None => backend.compile_bundled(source)?,
    };

    let out_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| default_artifact_path(source));
    fs::write(&out_path, &artifact)?;

    println!(
        "{}Compiled{} {} UDF {} -> {} {}({} bytes, {:.2}s){}",
        colors::GREEN,
        colors::RESET,
        backend.name(),
        source.display(),
        out_path.display(),
        colors::DIM,
        artifact.len(),
        start.elapsed().as_secs_f64(),
        colors::RESET
    );

    Ok(())
}

/// `<source>.udf`, next to the source.
fn default_artifact_path(source: &Path) -> PathBuf {
    let mut path = OsString::from(source.as_os_str());
    path.push(".udf");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_artifact_path() {
        assert_eq!(
            default_artifact_path(Path::new("udfs/sum.lua")),
            PathBuf::from("udfs/sum.lua.udf")
        );
    }
}
