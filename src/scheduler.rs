// src/scheduler.rs
// Fixed-interval trigger loop. One pipeline instance runs to completion per
// tick; if a run is still in flight the tick is skipped (the store's overlap
// guard refuses it) and the next tick tries again.

use metrics::counter;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::model::{TriggerOrigin, WindowOverrides};
use crate::runner::{run_pipeline, PipelineDeps};

pub fn spawn_scheduler(deps: PipelineDeps) -> JoinHandle<()> {
    let interval = deps.cfg.run_interval;
    let mut shutdown = deps.shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; that is the boot-time run.
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("scheduler stopping");
                        return;
                    }
                    continue;
                }
            }

            counter!("scheduler_ticks_total").increment(1);
            match run_pipeline(&deps, WindowOverrides::default(), TriggerOrigin::Scheduler).await {
                Ok(summary) => {
                    tracing::info!(
                        insights = summary.insights_scored,
                        events = summary.events_scored,
                        duration_ms = summary.duration_ms,
                        "scheduled run complete"
                    );
                }
                Err(PipelineError::RunInProgress) => {
                    tracing::debug!("scheduled tick skipped, run already in progress");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "scheduled run failed");
                }
            }
        }
    })
}
