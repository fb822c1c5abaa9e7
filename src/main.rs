use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use roomclock::cache::InMemoryCache;
use roomclock::clock::SystemClock;
use roomclock::config::Config;
use roomclock::scheduler::Scheduler;
use roomclock::service::ReservationService;
use roomclock::store::WalStore;
use roomclock::sweeper;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roomclock::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let clock = Arc::new(SystemClock);
    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let cache = Arc::new(InMemoryCache::new(clock.clone()));
    let scheduler = Scheduler::new(store.clone(), cache.clone(), clock.clone(), config.cache_ttl);
    let service = ReservationService::new(
        scheduler.clone(),
        store.clone(),
        cache,
        clock,
        config.cache_ttl,
    );

    let restored = service.initialize().await?;
    info!("roomclock started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  restored: {restored} live reservations");
    info!("  sweep every: {}s", config.sweep_interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(sweeper::run_sweeper(scheduler.clone(), config.sweep_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(
        store,
        config.compact_threshold,
        COMPACT_CHECK_INTERVAL,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received, cancelling {} timers", scheduler.pending_timers());
    sweeper.abort();
    compactor.abort();
    scheduler.shutdown();
    info!("roomclock stopped");
    Ok(())
}
