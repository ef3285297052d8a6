use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::service::ReservationService;

/// Reaps lapsed holds every `every` until `shutdown` flips to `true`
/// or its sender is dropped. A pass that overruns the period skips the
/// missed ticks instead of bursting.
pub async fn run_reaper(service: Arc<ReservationService>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Hold reaper started, interval {:?}", every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.reap_expired().await {
                    Ok(report) => debug!(
                        "Reap pass: {} released, {} skipped, {} failed",
                        report.released, report.skipped, report.failed
                    ),
                    Err(e) => warn!("Reap pass failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Hold reaper stopped");
}

pub fn spawn_reaper(
    service: Arc<ReservationService>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_reaper(service, every, shutdown))
}
