//! Offload CLI - run JavaScript functions and bundles in isolated worker processes.

mod bundle;
mod clean;
mod colors;
mod exec;
mod output;
mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use offload_core::{BundleFormat, Executor, ExecutorConfig, Platform};

#[derive(Parser)]
#[command(name = "offload")]
#[command(about = "Run JavaScript functions and bundles in isolated worker processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Pool settings shared by the commands that execute code.
#[derive(Args)]
struct PoolArgs {
    /// Workers started up front (overrides OFFLOAD_MIN_WORKERS)
    #[arg(long)]
    min_workers: Option<usize>,

    /// Maximum concurrent workers (overrides OFFLOAD_MAX_WORKERS)
    #[arg(long)]
    max_workers: Option<usize>,

    /// Directory searched for dependencies (repeatable)
    #[arg(long = "module-path")]
    module_paths: Vec<PathBuf>,

    /// Path to the offload-worker binary
    #[arg(long)]
    worker: Option<PathBuf>,
}

impl PoolArgs {
    fn executor(&self) -> anyhow::Result<Executor> {
        let mut config = ExecutorConfig::from_env()?;
        if let Some(min) = self.min_workers {
            config.pool.min_workers = min;
        }
        if let Some(max) = self.max_workers {
            config.pool.max_workers = max;
        }
        if !self.module_paths.is_empty() {
            config.pool.module_paths = self.module_paths.clone();
        }
        if let Some(worker) = &self.worker {
            config.pool.worker_binary = Some(worker.clone());
        }
        Ok(Executor::new(config)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a function from a source file with injected dependencies
    Run {
        /// File containing the function source
        file: PathBuf,

        /// Name of the function to call
        #[arg(short, long)]
        target: String,

        /// Positional argument as JSON (repeatable)
        #[arg(short, long = "arg")]
        args: Vec<String>,

        /// Dependency injected before the arguments (repeatable)
        #[arg(short, long = "dep")]
        deps: Vec<String>,

        /// Require a synchronous return value
        #[arg(long)]
        sync: bool,

        #[command(flatten)]
        pool: PoolArgs,
    },

    /// Bundle an entry module with esbuild
    Bundle {
        /// Entry module
        entry: PathBuf,

        /// Output format (cjs or esm)
        #[arg(long, default_value = "cjs")]
        format: BundleFormat,

        /// Target platform (node or browser)
        #[arg(long, default_value = "node")]
        platform: Platform,

        /// Module left out of the bundle (repeatable)
        #[arg(long)]
        external: Vec<String>,

        /// Minify the output
        #[arg(long)]
        minify: bool,

        /// Write the bundle here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Path to the esbuild binary
        #[arg(long)]
        esbuild: Option<PathBuf>,
    },

    /// Bundle an entry module and call one of its exports
    Exec {
        /// Entry module
        #[arg(required_unless_present = "inline", conflicts_with = "inline")]
        entry: Option<PathBuf>,

        /// Module source given on the command line
        #[arg(long)]
        inline: Option<String>,

        /// Name of the exported function to call
        #[arg(short, long)]
        target: String,

        /// Positional argument as JSON (repeatable)
        #[arg(short, long = "arg")]
        args: Vec<String>,

        /// Target platform (node or browser)
        #[arg(long, default_value = "node")]
        platform: Platform,

        /// Module left out of the bundle (repeatable)
        #[arg(long)]
        external: Vec<String>,

        /// Minify the bundle before running it
        #[arg(long)]
        minify: bool,

        #[command(flatten)]
        pool: PoolArgs,
    },

    /// Remove temporary entry files left behind by killed runs
    Clean,
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
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Helper to format offload-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(offload_err) = err.downcast_ref::<offload_core::Error>() {
            anyhow::anyhow!("{}", offload_err.with_hint())
        } else {
            err
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let success = match cli.command {
        Commands::Run {
            file,
            target,
            args,
            deps,
            sync,
            pool,
        } => runtime
            .block_on(run::execute(&file, &target, &args, deps, sync, &pool))
            .map_err(format_error)?,

        Commands::Bundle {
            entry,
            format,
            platform,
            external,
            minify,
            output,
            esbuild,
        } => {
            let options = offload_core::BundleOptions {
                format,
                platform,
                external,
                minify,
            };
            bundle::execute(&entry, &options, output.as_deref(), esbuild).map_err(format_error)?;
            true
        }

        Commands::Exec {
            entry,
            inline,
            target,
            args,
            platform,
            external,
            minify,
            pool,
        } => {
            let source = match (entry, inline) {
                (_, Some(code)) => offload_core::EntrySource::Inline(code),
                (Some(path), None) => offload_core::EntrySource::Path(path),
                (None, None) => anyhow::bail!("Either an entry path or --inline is required"),
            };
            // Workers evaluate CommonJS, so the format is fixed
            let options = offload_core::BundleOptions {
                format: BundleFormat::Cjs,
                platform,
                external,
                minify,
            };
            runtime
                .block_on(exec::execute(source, &target, &args, options, &pool))
                .map_err(format_error)?
        }

        Commands::Clean => {
            clean::execute().map_err(format_error)?;
            true
        }
    };

    drop(runtime);
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
