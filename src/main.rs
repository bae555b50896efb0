//! carshift — migrates CAR shards between object stores and rebuilds the
//! block-location index. Thin axum front end over `worker::{hash,copy,reindex}`.

use axum::routing::get;
use axum::Router;
use carshift::api::{copy_handler, hash_handler, reindex_handler, AppState};
use carshift::config::Config;
use carshift::objectio::S3ObjectIo;
use carshift::table::DynamoDbBlockIndexTable;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn version_long() -> &'static str {
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("CARSHIFT_BUILD_TIME"),
        )
    })
}

/// carshift — CAR shard migration service (Hash / Copy / Reindex)
#[derive(Parser, Debug)]
#[command(name = "carshift")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let initial_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("carshift=trace,tower_http=trace")
        } else {
            EnvFilter::new("carshift=info,tower_http=info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(initial_filter).init();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!(
        "Starting carshift v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("CARSHIFT_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);
    info!("  Allowed source regions: {:?}", config.allowed_source_regions);
    info!(
        "  Destination buckets: carpark={} satnav={} dudewhere={}",
        config.dest.carpark_bucket, config.dest.satnav_bucket, config.dest.dudewhere_bucket
    );
    info!(
        "  Block index table: {} ({})",
        config.block_index.table, config.block_index.region
    );

    let io = Arc::new(S3ObjectIo::new());
    let table = Arc::new(
        DynamoDbBlockIndexTable::new(&config.block_index.region, config.block_index.table.clone())
            .await,
    );

    let listen_addr = config.listen_addr;
    let state = Arc::new(AppState { config, io, table });

    let app = Router::new()
        .route("/hash", get(hash_handler))
        .route("/copy", get(copy_handler))
        .route("/reindex", get(reindex_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("carshift listening on http://{}", listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("carshift shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
