use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use bunkhouse::cache::MemoryCache;
use bunkhouse::catalog::RoomCatalog;
use bunkhouse::clock::{Clock, SystemClock};
use bunkhouse::config::Config;
use bunkhouse::engine::Engine;
use bunkhouse::store::LedgerStore;
use bunkhouse::{observability, sweeper, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;
    let catalog = Arc::new(RoomCatalog::load(&config.catalog_path)?);
    let store = Arc::new(LedgerStore::open(&config.wal_path(), &catalog)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(MemoryCache::new(clock.clone()));
    let engine = Arc::new(Engine::new(
        catalog.clone(),
        store.clone(),
        cache.clone(),
        clock,
        config.engine_settings(),
    ));

    tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        config.sweep_interval,
        config.hold_retention,
    ));
    tokio::spawn(sweeper::run_compactor(store, config.compact_threshold));
    tokio::spawn(sweeper::run_cache_purger(cache, config.cache_ttl));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("bunkhouse listening on {addr}");
    info!(
        "  catalog: {} ({} rooms, {} beds)",
        config.catalog_path.display(),
        catalog.len(),
        catalog.total_capacity()
    );
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  hold_ttl: {:?}, cache_ttl: {:?}", config.hold_ttl, config.cache_ttl);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
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

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("bunkhouse stopped");
    Ok(())
}
