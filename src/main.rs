//! PoolGate -- S3-compatible gateway for pooled object-storage clusters.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

/// Command-line arguments for the PoolGate server.
#[derive(Parser, Debug)]
#[command(
    name = "poolgate",
    version,
    about = "S3-compatible gateway for pooled object-storage clusters"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "poolgate.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = poolgate::config::load_config(&cli.config)?;

    // Initialize tracing / logging per config, RUST_LOG wins when set.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        poolgate::metrics::init_metrics();
        poolgate::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // Initialize metadata store based on config.
    let metadata: Arc<dyn poolgate::metadata::store::MetadataStore> =
        match config.metadata.engine.as_str() {
            "memory" => {
                info!("In-memory metadata store initialized");
                Arc::new(poolgate::metadata::memory::MemoryMetadataStore::new())
            }
            _ => {
                let path = &config.metadata.path;
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = poolgate::metadata::sqlite::SqliteMetadataStore::new(path)?;
                info!("SQLite metadata store initialized at {}", path);
                Arc::new(store)
            }
        };

    // Initialize storage cluster backend based on config.
    let cluster: Arc<dyn poolgate::cluster::backend::StorageBackend> =
        match config.cluster.backend.as_str() {
            "memory" => {
                info!("In-memory cluster backend initialized");
                Arc::new(poolgate::cluster::memory::MemoryClusterBackend::new())
            }
            _ => {
                let backend = poolgate::cluster::http::HttpClusterBackend::new(&config.cluster)?;
                info!(
                    "HTTP cluster backend initialized: endpoint={} pools={:?}",
                    config.cluster.endpoint, config.cluster.pools
                );
                Arc::new(backend)
            }
        };

    let credentials = Arc::new(poolgate::credentials::StaticCredentialStore::from_config(
        &config.auth.credentials,
    ));
    info!("Loaded {} static credential(s)", config.auth.credentials.len());

    let state = Arc::new(poolgate::AppState {
        config: config.clone(),
        credentials,
        metadata,
        cluster,
        auth_cache: poolgate::auth::AuthCache::new(),
    });

    let app = poolgate::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("PoolGate listening on {}", bind_addr);

    // Graceful shutdown: on SIGTERM/SIGINT, stop accepting new connections
    // and wait for in-flight requests to complete.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("PoolGate shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
