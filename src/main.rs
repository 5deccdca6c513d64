use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use covers::catalog::InMemoryCatalog;
use covers::clock::SystemClock;
use covers::engine::Engine;
use covers::notify::NotifyHub;
use covers::observability;
use covers::{compactor, wire};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server settings, all from `COVERS_*` environment variables.
struct Config {
    bind: String,
    port: String,
    data_dir: PathBuf,
    catalog_path: PathBuf,
    password: String,
    max_connections: usize,
    compact_threshold: u64,
    metrics_port: Option<u16>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Config {
    fn from_env() -> Self {
        Self {
            bind: env_or("COVERS_BIND", "0.0.0.0"),
            port: env_or("COVERS_PORT", "5433"),
            data_dir: env_or("COVERS_DATA_DIR", "./data").into(),
            catalog_path: env_or("COVERS_CATALOG", "./catalog.json").into(),
            password: env_or("COVERS_PASSWORD", "covers"),
            max_connections: env_parse("COVERS_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: env_parse("COVERS_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: env_parse("COVERS_METRICS_PORT"),
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Wait until every connection permit is back, or give up after the timeout.
async fn drain_connections(semaphore: &Semaphore, max_connections: usize) {
    let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    while semaphore.available_permits() < max_connections {
        tokio::select! {
            _ = &mut deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
    info!("all connections drained");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    observability::init(config.metrics_port)?;
    let tls_acceptor = covers::tls::load_from_env()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let catalog = InMemoryCatalog::load_file(&config.catalog_path)?;
    info!(
        "catalog {}: {} restaurants, {} tables",
        config.catalog_path.display(),
        catalog.restaurant_count(),
        catalog.table_count()
    );

    let engine = Arc::new(Engine::new(
        config.data_dir.join("reservations.wal"),
        Arc::new(catalog),
        Arc::new(SystemClock),
        Arc::new(NotifyHub::new()),
    )?);

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    let semaphore = Arc::new(Semaphore::new(config.max_connections));
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("covers listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  reservations loaded: {}", engine.reservation_count());
    info!("  max_connections: {}", config.max_connections);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    tracing::warn!("connection limit reached, rejecting {peer}");
                    metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                    continue;
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();
                let password = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, engine, password, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    tracing::error!("signal handler failed: {e}");
                }
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    drain_connections(&semaphore, config.max_connections).await;
    info!("covers stopped");
    Ok(())
}
