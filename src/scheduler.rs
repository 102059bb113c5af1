// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::PipelineError;
use crate::pipeline::Pipeline;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval_secs: u64,
}

/// Spawn a periodic trigger. The first run fires one full interval after start;
/// ticks that land while a run is active are skipped.
pub fn spawn_scheduler(cfg: SchedulerCfg, pipeline: Arc<Pipeline>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(cfg.interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match pipeline.run().await {
                Ok(report) => tracing::info!(
                    target: "scheduler",
                    curated = report.stats.articles_curated,
                    "scheduled run finished"
                ),
                Err(PipelineError::AlreadyRunning) => {
                    tracing::debug!(target: "scheduler", "run already in progress; tick skipped")
                }
                Err(e) => tracing::warn!(target: "scheduler", error = %e, "scheduled run failed"),
            }
        }
    })
}
