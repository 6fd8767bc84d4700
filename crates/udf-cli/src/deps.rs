//! Deps command implementation.
//!
//! Prints the dataset names a UDF reads, one per line, without running it.

use std::path::Path;

use udf_core::{Backend, EngineConfig};

/// List the datasets referenced by a UDF source.
pub fn execute(source: &str) -> anyhow::Result<()> {
    let source = Path::new(source);
    let backend = Backend::for_source(source, EngineConfig::from_env())?;

    let names = backend.scan_dataset_names(source)?;
    tracing::debug!("{} dataset reference(s) in {}", names.len(), source.display());

    for name in names {
        println!("{}", name);
    }
    Ok(())
}
