//! CLI binary that counts access-log lines per server, client and endpoint.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use logcount_analysis::DEFAULT_SERVER_ID;
use logcount_api::{ApiServer, ApiState, router};
use logcount_counts::CountStore;
use logcount_counts_fs::FsCountStore;
use logcount_counts_memory::MemoryCountStore;
use logcount_pipeline::{Pipeline, PipelineConfig};
use logcount_source::ReaderSource;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP API error
    #[error(transparent)]
    Api(#[from] logcount_api::Error),

    /// Pipeline setup error
    #[error(transparent)]
    Pipeline(#[from] logcount_pipeline::Error),

    /// Input could not be opened
    #[error(transparent)]
    Source(#[from] logcount_source::Error),

    /// Count store could not be opened
    #[error(transparent)]
    Store(#[from] logcount_counts_fs::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// File to read access-log lines from, or `-` for standard input
    #[arg(long, default_value = "-", env = "LOGCOUNT_INPUT")]
    input: PathBuf,

    /// Snapshot file for persistent counts (counts are kept in memory if unset)
    #[arg(long, env = "LOGCOUNT_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// Aggregation window in milliseconds
    #[arg(long, default_value_t = 1000, env = "LOGCOUNT_WINDOW_MS")]
    window_ms: u64,

    /// Capacity of each queue between pipeline stages
    #[arg(long, default_value_t = 1000, env = "LOGCOUNT_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Server id for lines without a `serverID:` prefix
    #[arg(long, default_value = DEFAULT_SERVER_ID, env = "LOGCOUNT_DEFAULT_SERVER_ID")]
    default_server_id: String,

    /// Address to serve the query API on (no API if unset)
    #[arg(long, env = "LOGCOUNT_API_LISTEN_ADDR")]
    api_listen_addr: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(long, default_value_t = false, env = "LOGCOUNT_DEBUG")]
    debug: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            window: Duration::from_millis(self.window_ms),
            queue_capacity: self.queue_capacity,
            default_server_id: self.default_server_id.clone(),
        }
    }

    fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == "-"
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    match args.store_path.clone() {
        Some(path) => run(args, FsCountStore::open(path).await?, shutdown_token).await,
        None => {
            warn!("no store path given, counts will be lost on exit");
            run(args, MemoryCountStore::new(), shutdown_token).await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received interrupt signal");
}

async fn run<S>(args: Args, store: S, shutdown_token: CancellationToken) -> Result<(), Error>
where
    S: CountStore,
{
    let pipeline = Pipeline::new(args.pipeline_config(), store)?;

    let api_server = match args.api_listen_addr {
        Some(listen_addr) => {
            let server = ApiServer::new(listen_addr);
            server
                .start(router(ApiState {
                    store: pipeline.store().clone(),
                    registry: Some(pipeline.metrics().registry().clone()),
                }))
                .await?;
            Some(server)
        }
        None => None,
    };

    if args.reads_stdin() {
        info!("reading access log from stdin");
        pipeline.start(ReaderSource::stdin())?;
    } else {
        info!(path = %args.input.display(), "reading access log");
        pipeline.start(ReaderSource::open(&args.input).await?)?;
    }

    tokio::select! {
        () = shutdown_token.cancelled() => {
            pipeline.shutdown().await;
        }
        () = pipeline.wait() => {
            info!("input exhausted, all windows flushed");

            if api_server.is_some() {
                info!("serving queries until shutdown");
                shutdown_token.cancelled().await;
            }
        }
    }

    if let Some(server) = api_server {
        server.shutdown().await;
    }

    info!(metrics = ?pipeline.metrics(), "done");

    Ok(())
}
