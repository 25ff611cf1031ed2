//! Registry administration command line

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use registry::RegistryConfig;

/// Administer a registry's storage.
#[derive(Debug, Parser)]
#[command(name = "registry", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Delete blobs that no manifest references.
    ///
    /// Writes to the registry must be stopped while this runs, unless
    /// `--dry-run` is given.
    GarbageCollect {
        /// Path to the registry configuration file.
        config: Utf8PathBuf,

        /// Report what would be deleted without deleting anything.
        #[arg(short = 'd', long)]
        dry_run: bool,

        /// Number of repositories to mark at once. Overrides the config file.
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::GarbageCollect {
            config,
            dry_run,
            concurrency,
        } => garbage_collect(config, dry_run, concurrency).await,
    }
}

async fn garbage_collect(
    path: Utf8PathBuf,
    dry_run: bool,
    concurrency: Option<usize>,
) -> eyre::Result<()> {
    let config = RegistryConfig::open(&path)
        .await
        .wrap_err_with(|| format!("loading {path}"))?;
    let registry = config
        .registry()
        .await
        .wrap_err("failed to open registry storage")?;

    let report = registry
        .garbage_collector()
        .dry_run(dry_run)
        .concurrency(concurrency.unwrap_or(config.gc.concurrency))
        .run()
        .await
        .wrap_err("failed to garbage collect")?;

    if dry_run {
        print!("{report}");
    } else {
        tracing::info!(
            marked = report.marked,
            deleted = report.deleted,
            "garbage collection complete"
        );
    }

    Ok(())
}
