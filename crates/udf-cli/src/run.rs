//! Run command implementation.
//!
//! Loads the buffers named in a manifest, runs the artifact and writes the
//! output buffer back to its file. A run that fails before the UDF process
//! starts leaves the output file untouched.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use udf_core::{Backend, DatasetDescriptor, EngineConfig, NoNewPrivileges, SandboxContext};

use crate::colors;
use crate::manifest::Manifest;

/// Options for `udf run`.
pub struct RunOptions {
    pub lang: String,
    pub filter_path: Option<String>,
    pub timeout: Option<u64>,
    pub no_new_privs: bool,
}

/// Run an artifact against the datasets in `manifest_path`.
pub fn execute(artifact_path: &str, manifest_path: &str, options: &RunOptions) -> anyhow::Result<()> {
    let artifact = fs::read(artifact_path)
        .with_context(|| format!("failed to read artifact {}", artifact_path))?;
    let manifest = Manifest::load(Path::new(manifest_path))?;

    let mut config = EngineConfig::from_env();
    if let Some(secs) = options.timeout {
        config = config.with_run_timeout(EngineConfig::timeout_from_secs(secs));
    }
    let backend = Backend::from_extension(&options.lang, config)?;
    let sandbox = sandbox_context(options)?;

    let mut input_buffers = manifest
        .inputs
        .iter()
        .map(|spec| {
            fs::read(&spec.path)
                .with_context(|| format!("failed to read input '{}' from {}", spec.name, spec.path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut output_buffer = vec![0u8; manifest.output.storage_size()?];

    let start = Instant::now();
    let result = {
        let inputs = manifest
            .inputs
            .iter()
            .zip(input_buffers.iter_mut())
            .map(|(spec, buffer)| {
                DatasetDescriptor::new(spec.name.clone(), spec.element_type, spec.dims.clone(), buffer)
            })
            .collect::<udf_core::Result<Vec<_>>>()?;
        let mut output = DatasetDescriptor::new(
            manifest.output.name.clone(),
            manifest.output.element_type,
            manifest.output.dims.clone(),
            &mut output_buffer,
        )?;

        backend.run(&sandbox, &inputs, &mut output, manifest.cast.as_deref(), &artifact)
    };

    // Partial results are written once the UDF process has run; earlier
    // failures leave the output file alone.
    let wrote_output = match &result {
        Ok(()) => true,
        Err(e) => e.output_copied_back(),
    };
    if wrote_output {
        fs::write(&manifest.output.path, &output_buffer).with_context(|| {
            format!("failed to write output to {}", manifest.output.path.display())
        })?;
    }

    match result {
        Ok(()) => {
            println!(
                "{}Ran{} {} UDF {} {}({} bytes -> {}, {:.2}s){}",
                colors::GREEN,
                colors::RESET,
                backend.name(),
                artifact_path,
                colors::DIM,
                output_buffer.len(),
                manifest.output.path.display(),
                start.elapsed().as_secs_f64(),
                colors::RESET
            );
            Ok(())
        }
        Err(e) => {
            if wrote_output {
                eprintln!(
                    "{}Output written despite failure:{} {}",
                    colors::YELLOW,
                    colors::RESET,
                    manifest.output.path.display()
                );
            }
            Err(e.into())
        }
    }
}

fn sandbox_context(options: &RunOptions) -> anyhow::Result<SandboxContext> {
    let filter_path = match &options.filter_path {
        Some(path) => PathBuf::from(path),
        None => std::env::current_exe().context("failed to resolve the current executable")?,
    };

    let sandbox = SandboxContext::new(filter_path);
    Ok(if options.no_new_privs {
        sandbox.with_policy(NoNewPrivileges)
    } else {
        sandbox
    })
}
