mod migrate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trackwatch_core::config::LogConfig;
use trackwatch_core::{load_config, Coordinator, Observer};
use trackwatch_core::storage::Driver;

/// Torrent tracker observer daemon.
#[derive(Debug, Parser)]
#[command(name = "trackwatch", version)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// One-shot storage migration instead of observing
    #[arg(short = 'm', long = "migrate")]
    migrate: bool,

    /// Migration source driver
    #[arg(short = 'f', long = "from", requires = "migrate")]
    from: Option<Driver>,

    /// Migration destination driver
    #[arg(short = 't', long = "to", requires = "migrate")]
    to: Option<Driver>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // The subscriber may not be installed yet when config loading fails.
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(&config.log)?;

    if args.migrate {
        let from = args.from.context("-f DRIVER is required with -m")?;
        let to = args.to.context("-t DRIVER is required with -m")?;
        return migrate::run(&config, from, to);
    }

    let observer = Arc::new(
        Observer::init(config.clone())
            .await
            .context("observer initialization failed")?,
    );

    match config.cluster {
        Some(cluster) => {
            let coordinator = Coordinator::new(cluster, Arc::clone(&observer) as _);
            coordinator
                .start()
                .await
                .context("cluster connect failed")?;
            wait_for_shutdown().await;
            coordinator.stop().await;
        }
        None => {
            info!("no cluster configured, crawling standalone");
            observer.start_crawl();
            wait_for_shutdown().await;
        }
    }

    observer.close().await;
    Ok(())
}

fn init_logging(log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match &log.file {
        Some(path) if !path.is_empty() => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = term.recv() => info!("termination requested"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received");
}
