//! harvest-indexer: keeps a Solr index and an image object store in sync
//! with a directory of harvested Dublin Core records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bridge_traits::time::LogLevel;
use clap::Parser;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use core_runtime::{EventBus, IndexerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "harvest-indexer", version)]
#[command(about = "Publish harvested metadata records to a search index and object store")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "HARVEST_INDEXER_CONFIG")]
    config: PathBuf,

    /// Override `watch.root`
    #[arg(long)]
    harvest_dir: Option<PathBuf>,

    /// Parse and log what would change without publishing anything
    #[arg(long)]
    dry_run: bool,

    /// pretty, json or compact
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Level for the indexer's own crates
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Full filter directive; overrides --log-level
    #[arg(long, env = "RUST_LOG")]
    log_filter: Option<String>,

    /// Reconcile once, process the changes and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default().with_level(cli.log_level);
    if let Some(format) = cli.log_format {
        logging = logging.with_format(format);
    }
    if let Some(filter) = &cli.log_filter {
        logging = logging.with_filter(filter.clone());
    }
    init_logging(logging).context("failed to initialize logging")?;

    let mut config = IndexerConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(root) = cli.harvest_dir {
        config.watch.root = root;
    }
    config.dry_run |= cli.dry_run;
    config.validate().context("invalid configuration")?;

    info!(
        config = %cli.config.display(),
        root = %config.watch.root.display(),
        index = %config.index.base_url,
        index_token = ?config
            .index
            .auth_token
            .as_deref()
            .map(|token| redact_if_sensitive("auth_token", token)),
        dry_run = config.dry_run,
        "Configuration loaded"
    );

    let service = core_service::bootstrap_desktop(config, EventBus::new(1024))
        .await
        .context("failed to start the indexer")?;

    if cli.once {
        let report = service.run_once().await?;
        if report.failed > 0 {
            warn!(failed = report.failed, "Some records could not be processed");
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));
    service.run(cancel).await?;
    Ok(())
}

/// Cancel `token` on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested");
    token.cancel();
}
