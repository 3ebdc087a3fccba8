//! Periodic execution of the analytics jobs.
//!
//! Each job gets its own timer task. A task awaits its run before the next
//! tick, so a job never overlaps with itself; different jobs do run
//! concurrently. Ticks missed while a run is in progress are skipped.

use std::sync::Arc;
use std::time::Duration;

use quakewatch_store::AnalyticsStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::jobs::Job;

/// Spawns the periodic task for `job`.
pub fn spawn<S>(job: Job, period: Duration, store: Arc<S>) -> JoinHandle<()>
where
    S: AnalyticsStore + 'static,
{
    tokio::spawn(async move {
        log::info!("Scheduling {} every {period:?}", job.name());

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            run_once(&job, &store).await;
        }
    })
}

/// Runs `job` once on the blocking pool, logs the result and returns
/// whether it succeeded. Failures are not propagated.
pub async fn run_once<S>(job: &Job, store: &Arc<S>) -> bool
where
    S: AnalyticsStore + 'static,
{
    let name = job.name();
    let task = {
        let job = job.clone();
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || job.run(store.as_ref()))
    };

    match task.await {
        Ok(Ok(outcome)) => {
            log::info!("{name} run finished: {outcome}");
            true
        }
        Ok(Err(e)) => {
            log::error!("{name} run failed: {e}");
            false
        }
        Err(e) => {
            log::error!("{name} run aborted: {e}");
            false
        }
    }
}

/// Runs every job on its period until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the shutdown signal cannot be installed.
pub async fn run<S>(jobs: [(Job, Duration); 3], store: Arc<S>) -> std::io::Result<()>
where
    S: AnalyticsStore + 'static,
{
    let handles: Vec<JoinHandle<()>> = jobs
        .into_iter()
        .map(|(job, period)| spawn(job, period, Arc::clone(&store)))
        .collect();

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down scheduler");

    for handle in handles {
        handle.abort();
    }
    Ok(())
}
