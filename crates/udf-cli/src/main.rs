//! udf - compile, inspect and run user-defined dataset functions.

mod colors;
mod compile;
mod deps;
mod manifest;
mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "udf")]
#[command(about = "Compile and run user-defined functions over array datasets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a UDF source file (.cpp or .lua) into an artifact
    Compile {
        /// Path to the UDF source
        source: String,

        /// Template to splice the source into (defaults to the bundled one)
        #[arg(short, long)]
        template: Option<String>,

        /// Output path for the artifact (default: <source>.udf)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List the datasets a UDF source reads
    Deps {
        /// Path to the UDF source
        source: String,
    },

    /// Run a compiled artifact against datasets described by a manifest
    Run {
        /// Path to the artifact produced by `udf compile`
        artifact: String,

        /// Language of the artifact (cpp or lua)
        #[arg(short, long)]
        lang: String,

        /// JSON manifest describing the output and input datasets
        #[arg(short, long)]
        manifest: String,

        /// Path handed to the UDF's init callback
        #[arg(long)]
        filter_path: Option<String>,

        /// Time budget in seconds (0 waits forever)
        #[arg(long)]
        timeout: Option<u64>,

        /// Forbid privilege gain in the UDF process
        #[arg(long)]
        no_new_privs: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format udf-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(udf_err) = err.downcast_ref::<udf_core::Error>() {
            anyhow::anyhow!("{}", udf_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Compile {
            source,
            template,
            output,
        } => compile::execute(&source, template.as_deref(), output.as_deref())
            .map_err(format_error)?,

        Commands::Deps { source } => deps::execute(&source).map_err(format_error)?,

        Commands::Run {
            artifact,
            lang,
            manifest,
            filter_path,
            timeout,
            no_new_privs,
        } => {
            let options = run::RunOptions {
                lang,
                filter_path,
                timeout,
                no_new_privs,
            };
            run::execute(&artifact, &manifest, &options).map_err(format_error)?;
        }
    }

    Ok(())
}
