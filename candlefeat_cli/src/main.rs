mod cli;
mod export;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use candlefeat_rs::run_pipeline;
use cli::{Cli, Commands};
use export::{ExportOptions, export_feature_set};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, prelude::*};

const LOG_FILE: &str = "candlefeat.log";

/// Stdout logging, plus an append-only `candlefeat.log` when `log_file` is set.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = NonBlocking::new(open_log_file(path)?);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize tracing: {err}"))?;
    Ok(guard)
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

fn log_invocation(log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    tracing::info!("==================== new candlefeat run ====================");
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        log_file = ?log_file,
        argv = ?argv,
        "candlefeat invoked"
    );
    if argv.len() >= 2 {
        tracing::info!(
            "cargo_repro_command=cargo run --release -p candlefeat_cli -- {}",
            argv[1..].join(" ")
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Prepare(args) => {
            if args.no_file_log {
                None
            } else {
                Some(args.output_dir.join(LOG_FILE))
            }
        }
    };

    // Dropping the guard at the end of main flushes the file layer.
    let _log_guard = init_logging(log_file.as_deref())?;
    log_invocation(log_file.as_ref());

    match cli.command {
        Commands::Prepare(args) => {
            let output_dir = args.output_dir.clone();
            let options = ExportOptions {
                ack_new_output: args.ack_new_output,
            };
            let config = args.into_config()?;
            let set = run_pipeline(&config)?;
            let files = export_feature_set(&set, &config, &output_dir, options)?;
            tracing::info!(
                rows = set.height(),
                features = %files.features.display(),
                labels = ?files.labels,
                run_config = %files.run_config.display(),
                "Prepared feature set"
            );
            Ok(())
        }
    }
}
