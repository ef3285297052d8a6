use anyhow::Context;
use marquee_core::SystemClock;
use marquee_reservation::{spawn_reaper, ReservationService};
use marquee_store::{Config, DbClient, PgCatalog, PgReservationStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee_worker=debug,marquee_reservation=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Reservation worker failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting reservation worker");

    // Database Connection
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to load business rules")?;
    rules.check();
    tracing::info!(
        "Seat holds last {}s, reaper runs every {}s",
        rules.seat_hold_seconds,
        rules.reap_interval_seconds
    );

    let service = Arc::new(ReservationService::new(
        Arc::new(PgReservationStore::new(db.pool.clone())),
        Arc::new(PgCatalog::new(db.pool.clone())),
        Arc::new(SystemClock),
        &rules,
    ));

    let seeded = service
        .seed_seat_maps(&config.seat_map.layout())
        .await
        .context("Failed to seed seat maps")?;
    tracing::info!("Seeded seat maps for {} showtimes", seeded);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = spawn_reaper(service, rules.reap_interval(), shutdown_rx);

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    // The reaper also stops if the receiver sees the sender dropped
    let _ = shutdown_tx.send(true);
    reaper.await.context("Reaper task panicked")?;
    Ok(())
}
