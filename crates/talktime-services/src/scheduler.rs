//! Cron-driven job runner
//!
//! Each job runs in its own task: compute the next occurrence of its
//! six-field expression (UTC), sleep until then, run, repeat. All jobs stop on
//! the shared cancellation token.

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::BoxFuture;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use talktime_core::{config::EntitlementConfig, AppError, AppResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::resolver::EntitlementResolver;
use crate::sweeper::ExpirySweeper;

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct ScheduledJob {
    name: String,
    schedule: Schedule,
    run: JobFn,
}

impl ScheduledJob {
    pub fn new<F, Fut>(name: &str, expression: &str, run: F) -> AppResult<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            AppError::Config(format!(
                "Invalid cron expression '{}' for job {}: {}",
                expression, name, e
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            schedule,
            run: Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(run()) }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First occurrence strictly after `t`
    pub fn next_after(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&t).next()
    }

    async fn run_until(self, shutdown: CancellationToken) {
        let mut last = Utc::now();

        loop {
            let Some(next) = self.next_after(last.max(Utc::now())) else {
                warn!(job = %self.name, "Schedule has no further occurrences");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!(job = %self.name, next = %next, "Next run scheduled");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    info!(job = %self.name, "Running scheduled job");
                    (self.run)().await;
                    last = next;
                }
            }
        }

        info!(job = %self.name, "Scheduled job stopped");
    }
}

/// Owner of the scheduled jobs
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job: ScheduledJob) -> Self {
        self.jobs.push(job);
        self
    }

    /// Nightly expiry sweep plus the periodic resolver cache clear
    pub fn for_entitlements(
        config: &EntitlementConfig,
        sweeper: Arc<ExpirySweeper>,
        resolver: Arc<EntitlementResolver>,
    ) -> AppResult<Self> {
        let sweep = ScheduledJob::new("entitlement-sweep", &config.sweep_cron, move || {
            let sweeper = sweeper.clone();
            async move {
                if let Err(e) = sweeper.sweep().await {
                    error!("Scheduled entitlement sweep failed: {}", e);
                }
            }
        })?;

        let refresh = ScheduledJob::new("entitlement-cache-refresh", &config.cache_refresh_cron, move || {
            let resolver = resolver.clone();
            async move { resolver.clear_cache() }
        })?;

        Ok(Self::new().with_job(sweep).with_job(refresh))
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Start one task per job
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        info!("Starting scheduler with {} jobs", self.jobs.len());
        self.jobs
            .into_iter()
            .map(|job| tokio::spawn(job.run_until(shutdown.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use talktime_db::MemoryStore;
    use tokio::sync::mpsc;

    #[test]
    fn test_invalid_expression_is_a_config_error() {
        let job = ScheduledJob::new("broken", "every day at noon", || async {});
        assert!(matches!(job, Err(AppError::Config(_))));
    }

    #[test]
    fn test_midnight_schedule() {
        let job = ScheduledJob::new("sweep", "0 0 0 * * *", || async {}).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 15, 30, 0).unwrap();

        assert_eq!(
            job.next_after(t),
            Some(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_default_entitlement_jobs() {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(EntitlementResolver::new(store.clone(), store.clone()));
        let sweeper = Arc::new(ExpirySweeper::new(store.clone(), store, resolver.clone(), 7));

        let scheduler =
            Scheduler::for_entitlements(&EntitlementConfig::default(), sweeper, resolver).unwrap();
        assert_eq!(
            scheduler.job_names(),
            vec!["entitlement-sweep", "entitlement-cache-refresh"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_and_stops_on_shutdown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = ScheduledJob::new("tick", "* * * * * *", move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
            }
        })
        .unwrap();

        let shutdown = CancellationToken::new();
        let handles = Scheduler::new().with_job(job).spawn(shutdown.clone());

        assert!(rx.recv().await.is_some());

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
