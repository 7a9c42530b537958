use std::sync::Arc;

use chrono::Utc;
use sideline_booking::{BookingManager, ReviewWorkflow, SideEffectExecutor};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

const SWEEP_BATCH: i64 = 100;

/// Drains the side-effect outbox forever
pub async fn start_outbox_worker(executor: Arc<SideEffectExecutor>, every: Duration, batch_size: i64) {
    info!("Outbox worker started, polling every {:?}", every);
    let mut ticker = interval(every);

    loop {
        ticker.tick().await;
        match executor.run_once(Utc::now(), batch_size).await {
            Ok(report) if report.delivered + report.retried + report.failed > 0 => {
                info!(
                    delivered = report.delivered,
                    retried = report.retried,
                    failed = report.failed,
                    "Outbox batch drained"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Outbox drain failed: {}", e),
        }
    }
}

/// Expires overdue film reviews and cancels checkouts nobody completed
pub async fn start_sweep_worker(
    workflow: Arc<ReviewWorkflow>,
    bookings: Arc<BookingManager>,
    every: Duration,
    abandoned_after: chrono::Duration,
) {
    info!("Sweep worker started, running every {:?}", every);
    let mut ticker = interval(every);

    loop {
        ticker.tick().await;
        let now = Utc::now();

        match workflow.expire_overdue(now, SWEEP_BATCH).await {
            Ok(expired) if !expired.is_empty() => {
                warn!(count = expired.len(), "Expired film reviews past their deadline");
            }
            Ok(_) => debug!("No overdue film reviews"),
            Err(e) => error!("Deadline sweep failed: {}", e),
        }

        match bookings.cancel_abandoned(now, abandoned_after, SWEEP_BATCH).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Cancelled abandoned checkouts"),
            Err(e) => error!("Abandoned checkout sweep failed: {}", e),
        }
    }
}
