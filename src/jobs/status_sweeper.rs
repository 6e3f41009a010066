use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::services::clock::Clock;
use crate::services::lifecycle;

/// Starts the periodic lifecycle sweep. The returned scheduler is owned by
/// the caller so shutdown is deterministic; a failed sweep is logged and the
/// next tick retries, the job itself never dies.
pub async fn start(
    pool: PgPool,
    clock: Arc<dyn Clock>,
    interval_secs: u64,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_repeated_async(Duration::from_secs(interval_secs), move |_id, _lock| {
        let pool = pool.clone();
        let clock = clock.clone();
        Box::pin(async move {
            match lifecycle::run_sweep(&pool, clock.as_ref()).await {
                Ok(stats) => {
                    tracing::debug!(
                        completed = stats.completed,
                        went_live = stats.went_live,
                        "Scheduled lifecycle sweep finished"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Lifecycle sweep failed, retrying on next tick");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    tracing::info!(interval_secs, "Lifecycle sweeper started");

    Ok(scheduler)
}
